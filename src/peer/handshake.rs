//! BitTorrent peer handshake (BEP 3 §3.1): the first message exchanged
//! between two peers, verifying both sides are talking about the same
//! torrent via `info_hash` and exchanging peer ids. Carried over from the
//! teacher's `peer::handshake` largely unchanged, with `do_handshake`
//! rewritten to reuse `serialize`/`read`/`validate` instead of duplicating
//! the wire parsing inline.
use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// A parsed 68-byte handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_len: u8,
    pub protocol: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Builds our own handshake to send, with all reserved bits unset (no
    /// extension bits are advertised; see `spec.md` §7 Non-goals).
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol_len: 19,
            protocol: *PROTOCOL,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serializes into the 68-byte wire format:
    /// `1 + 19 + 8 + 20 + 20` bytes.
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = self.protocol_len;
        buf[1..20].copy_from_slice(&self.protocol);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads and validates a 68-byte handshake from `stream`.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> Result<Self> {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await?;

        let protocol_len = buf[0];
        if protocol_len != 19 {
            anyhow::bail!("invalid protocol length: {protocol_len}");
        }

        let mut protocol = [0u8; 19];
        protocol.copy_from_slice(&buf[1..20]);
        if &protocol != PROTOCOL {
            anyhow::bail!("invalid protocol string: {protocol:?}");
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self {
            protocol_len,
            protocol,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Checks this handshake's info hash against the torrent we expect.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> Result<()> {
        if self.info_hash != expected_info_hash {
            anyhow::bail!(
                "info hash mismatch: got {:?}, expected {:?}",
                self.info_hash,
                expected_info_hash
            );
        }
        Ok(())
    }

    /// Connects to `peer_addr`, exchanges handshakes, and validates the
    /// peer's reply against `info_hash`. Returns the open stream alongside
    /// the peer's handshake so the caller can keep talking on it.
    #[instrument(skip(info_hash, peer_id))]
    pub async fn do_handshake(
        peer_addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<(TcpStream, Handshake)> {
        let mut stream = TcpStream::connect(peer_addr).await?;

        let ours = Handshake::new(info_hash, peer_id);
        stream.write_all(&ours.serialize()).await?;

        let theirs = Handshake::read(&mut stream).await?;
        theirs.validate(info_hash)?;

        Ok((stream, theirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_matches_wire_layout() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        let buf = hs.serialize();
        assert_eq!(buf[0], 19);
        assert_eq!(&buf[1..20], PROTOCOL);
        assert_eq!(&buf[28..48], &[1u8; 20]);
        assert_eq!(&buf[48..68], &[2u8; 20]);
    }

    #[test]
    fn validate_rejects_mismatched_info_hash() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(hs.validate([9u8; 20]).is_err());
        assert!(hs.validate([1u8; 20]).is_ok());
    }

    #[tokio::test]
    async fn round_trips_over_a_real_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let info_hash = [7u8; 20];
        let server_peer_id = [8u8; 20];
        let client_peer_id = [9u8; 20];

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let received = Handshake::read(&mut socket).await.unwrap();
            received.validate(info_hash).unwrap();
            let reply = Handshake::new(info_hash, server_peer_id);
            tokio::io::AsyncWriteExt::write_all(&mut socket, &reply.serialize())
                .await
                .unwrap();
        });

        let (_, theirs) = Handshake::do_handshake(addr, info_hash, client_peer_id)
            .await
            .unwrap();
        assert_eq!(theirs.peer_id, server_peer_id);

        server.await.unwrap();
    }
}
