//! Client peer-id generation (§6): `-RT0001-` followed by 12 random ASCII
//! alphanumeric bytes. Grounded on the teacher's
//! `tracker::generate_peer_id`, lifted out of the tracker module since the
//! engine generates one peer-id per instance and shares it with the
//! tracker client and every peer session.
use rand::Rng;

const PREFIX: &[u8] = b"-RT0001-";

/// Generates a fresh 20-byte peer-id.
pub fn generate() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..PREFIX.len()].copy_from_slice(PREFIX);
    let mut rng = rand::rng();
    for byte in &mut id[PREFIX.len()..] {
        *byte = random_alphanumeric(&mut rng);
    }
    id
}

fn random_alphanumeric(rng: &mut impl Rng) -> u8 {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    CHARSET[rng.random_range(0..CHARSET.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_expected_prefix_and_length() {
        let id = generate();
        assert_eq!(id.len(), 20);
        assert_eq!(&id[..8], b"-RT0001-");
    }

    #[test]
    fn suffix_is_alphanumeric() {
        let id = generate();
        assert!(id[8..].iter().all(|b| b.is_ascii_alphanumeric()));
    }
}
