//! UDP tracker announce (BEP 15), absent from the teacher but present in
//! `original_source/tracker.py`'s `_scrape_udp` and required by `spec.md`
//! §4.3. Implements the two-step connect/announce exchange over
//! `tokio::net::UdpSocket` with `byteorder` for the big-endian packet
//! layout, mirroring the teacher's use of `byteorder` elsewhere for wire
//! structures.
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::{AnnounceRequest, TrackerError, TrackerResult};

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(4);

/// Performs a connect + announce exchange against a `udp://host:port/...`
/// tracker URL and returns the peer addresses it reports.
pub async fn announce(url: &str, request: &AnnounceRequest) -> TrackerResult<Vec<SocketAddrV4>> {
    announce_impl(url, request).await.map_err(TrackerError::from)
}

async fn announce_impl(url: &str, request: &AnnounceRequest) -> Result<Vec<SocketAddrV4>> {
    let parsed = url::Url::parse(url).context("invalid tracker URL")?;
    let host = parsed.host_str().context("tracker URL missing host")?;
    let port = parsed.port().context("tracker URL missing port")?;
    let target = tokio::net::lookup_host((host, port))
        .await?
        .find(|addr| addr.is_ipv4())
        .context("tracker host did not resolve to an IPv4 address")?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(target).await?;

    let connection_id = connect(&socket).await?;
    announce_peers(&socket, connection_id, request).await
}

async fn connect(socket: &UdpSocket) -> Result<u64> {
    let transaction_id: u32 = rand::rng().random();

    let mut packet = Vec::with_capacity(16);
    packet.write_u64::<BigEndian>(PROTOCOL_ID)?;
    packet.write_u32::<BigEndian>(ACTION_CONNECT)?;
    packet.write_u32::<BigEndian>(transaction_id)?;

    timeout(SOCKET_TIMEOUT, socket.send(&packet)).await??;

    let mut buf = [0u8; 16];
    let len = timeout(SOCKET_TIMEOUT, socket.recv(&mut buf)).await??;
    if len < 16 {
        bail!("udp tracker connect response too short");
    }

    let mut cursor = &buf[..];
    let action = cursor.read_u32::<BigEndian>()?;
    let resp_transaction_id = cursor.read_u32::<BigEndian>()?;
    let connection_id = cursor.read_u64::<BigEndian>()?;

    if action != ACTION_CONNECT || resp_transaction_id != transaction_id {
        bail!("udp tracker connect response mismatch");
    }

    Ok(connection_id)
}

async fn announce_peers(
    socket: &UdpSocket,
    connection_id: u64,
    request: &AnnounceRequest,
) -> Result<Vec<SocketAddrV4>> {
    let transaction_id: u32 = rand::rng().random();
    let key: u32 = rand::rng().random();

    let mut packet = Vec::with_capacity(98);
    packet.write_u64::<BigEndian>(connection_id)?;
    packet.write_u32::<BigEndian>(ACTION_ANNOUNCE)?;
    packet.write_u32::<BigEndian>(transaction_id)?;
    packet.extend_from_slice(&request.info_hash);
    packet.extend_from_slice(&request.peer_id);
    packet.write_u64::<BigEndian>(request.downloaded)?;
    packet.write_u64::<BigEndian>(request.left)?;
    packet.write_u64::<BigEndian>(request.uploaded)?;
    packet.write_u32::<BigEndian>(2)?; // event: started
    packet.write_u32::<BigEndian>(0)?; // ip: default
    packet.write_u32::<BigEndian>(key)?;
    packet.write_i32::<BigEndian>(-1)?; // num_want: default
    packet.write_u16::<BigEndian>(request.port)?;

    timeout(SOCKET_TIMEOUT, socket.send(&packet)).await??;

    let mut buf = [0u8; 4096];
    let len = timeout(SOCKET_TIMEOUT, socket.recv(&mut buf)).await??;
    if len < 20 {
        bail!("udp tracker announce response too short");
    }

    let mut cursor = &buf[..20];
    let action = cursor.read_u32::<BigEndian>()?;
    let resp_transaction_id = cursor.read_u32::<BigEndian>()?;

    if action != ACTION_ANNOUNCE || resp_transaction_id != transaction_id {
        bail!("udp tracker announce response mismatch");
    }

    Ok(super::parse_compact_peers(&buf[20..len]))
}

#[cfg(test)]
mod tests {
    use super::super::parse_compact_peers;
    use super::*;

    #[test]
    fn parses_compact_peer_list_after_header() {
        let data = [127, 0, 0, 1, 0x1a, 0xe1, 127, 0, 0, 2, 0x1a, 0xe2];
        let peers = parse_compact_peers(&data);
        assert_eq!(peers, vec![
            SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881),
            SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 2), 6882),
        ]);
    }

    #[test]
    fn ignores_trailing_partial_peer() {
        let data = [127, 0, 0, 1, 0x1a, 0xe1, 9, 9];
        let peers = parse_compact_peers(&data);
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn parses_192_168_1_1_and_10_0_0_1_dropping_trailing_bytes() {
        let data = [
            0xC0, 0xA8, 0x01, 0x01, 0x1A, 0xE1, // 192.168.1.1:6881
            0x0A, 0x00, 0x00, 0x01, 0x00, 0x50, // 10.0.0.1:80
        ];
        let peers = parse_compact_peers(&data);
        assert_eq!(peers, vec![
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 6881),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 80),
        ]);
    }
}
