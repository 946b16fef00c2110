//! HTTP(S) tracker announce (§4.3), using `reqwest` and `serde_bencode` the
//! way the teacher's original `tracker::Client::announce` did. Peer lists
//! come back bencoded, either as a single compact byte string or as a list
//! of `{ip, port}` dicts — both are accepted, matching `spec.md`'s
//! lenient-parsing Open Question resolution (see `DESIGN.md`).
use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{AnnounceRequest, TrackerError, TrackerResult};

#[derive(Debug, Deserialize)]
struct TrackerResponse {
    #[serde(default)]
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    peers: Peers,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Peers {
    Compact(Vec<u8>),
    NonCompact(Vec<PeerDict>),
}

impl Default for Peers {
    fn default() -> Self {
        Peers::Compact(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct PeerDict {
    ip: String,
    port: u16,
}

/// Sends one announce request to `url` and returns the peer addresses it
/// reports. The `interval` field is accepted by the tracker but not
/// surfaced here — the swarm supervisor re-announces on its own cadence
/// rather than trusting each tracker's `interval` (see `DESIGN.md`).
pub async fn announce(url: &str, request: &AnnounceRequest) -> TrackerResult<Vec<SocketAddrV4>> {
    announce_impl(url, request).await.map_err(TrackerError::from)
}

async fn announce_impl(url: &str, request: &AnnounceRequest) -> Result<Vec<SocketAddrV4>> {
    let mut parsed = url::Url::parse(url).context("invalid tracker URL")?;
    let params = [
        ("info_hash", url_encode(&request.info_hash)),
        ("peer_id", url_encode(&request.peer_id)),
        ("port", request.port.to_string()),
        ("uploaded", request.uploaded.to_string()),
        ("downloaded", request.downloaded.to_string()),
        ("left", request.left.to_string()),
        ("compact", "1".to_string()),
        ("event", "started".to_string()),
    ];
    parsed.query_pairs_mut().extend_pairs(&params).finish();

    let response = reqwest::Client::new()
        .get(parsed)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await?;
    let bytes = response.bytes().await?;
    Ok(parse_response(&bytes)?)
}

fn parse_response(bytes: &[u8]) -> TrackerResult<Vec<SocketAddrV4>> {
    let response: TrackerResponse = match serde_bencode::from_bytes(bytes) {
        Ok(response) => response,
        // Last resort only (§4.3, §9): some trackers in the wild send the
        // compact peer stream directly with no surrounding bencoded dict.
        Err(_) => return Ok(super::parse_compact_peers(bytes)),
    };

    if let Some(reason) = response.failure_reason {
        return Err(TrackerError::Failure(reason));
    }

    let peers = match response.peers {
        Peers::Compact(bytes) => bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddrV4::new(ip, port)
            })
            .collect(),
        Peers::NonCompact(dicts) => dicts
            .into_iter()
            .filter_map(|dict| dict.ip.parse::<Ipv4Addr>().ok().map(|ip| SocketAddrV4::new(ip, dict.port)))
            .collect(),
    };

    Ok(peers)
}

fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_peer_list() {
        let body = b"d8:intervali1800e5:peers12:\x7f\x00\x00\x01\x1a\xe1\x7f\x00\x00\x02\x1a\xe2e";
        let peers = parse_response(body).unwrap();
        assert_eq!(peers, vec![
            SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881),
            SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 2), 6882),
        ]);
    }

    #[test]
    fn falls_back_to_raw_compact_bytes_when_not_bencoded() {
        // Not a valid bencoded dictionary at all, just the compact stream.
        let body = [0x7f, 0x00, 0x00, 0x01, 0x1a, 0xe1];
        let peers = parse_response(&body).unwrap();
        assert_eq!(peers, vec![SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881)]);
    }

    #[test]
    fn parses_non_compact_peer_list() {
        let body = b"d8:intervali1800e5:peersld2:ip9:127.0.0.14:porti6881eeee";
        let peers = parse_response(body).unwrap();
        assert_eq!(peers, vec![SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881)]);
    }

    #[test]
    fn failure_reason_is_surfaced_as_error() {
        let body = b"d14:failure reason11:bad requeste";
        assert!(parse_response(body).is_err());
    }

    #[test]
    fn url_encode_matches_rfc3986_unreserved_set() {
        assert_eq!(url_encode(b"abc~-._"), "abc~-._");
        assert_eq!(url_encode(&[0xff]), "%FF");
    }

    #[tokio::test]
    async fn announce_sends_expected_query_params_and_parses_response() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        let compact_peers = b"\x7f\x00\x00\x01\x1a\xe1".to_vec();
        let mut body = Vec::new();
        body.extend_from_slice(b"d5:peers");
        body.extend_from_slice(format!("{}:", compact_peers.len()).as_bytes());
        body.extend_from_slice(&compact_peers);
        body.extend_from_slice(b"e");

        Mock::given(method("GET"))
            .and(path("/announce"))
            .and(query_param("compact", "1"))
            .and(query_param("port", "6881"))
            .and(query_param("event", "started"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&mock_server)
            .await;

        let request = AnnounceRequest {
            info_hash: [1u8; 20],
            peer_id: [2u8; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 1000,
        };
        let url = format!("{}/announce", mock_server.uri());
        let peers = announce(&url, &request).await.unwrap();

        assert_eq!(peers, vec![SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881)]);
    }
}
