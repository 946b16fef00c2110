//! BEP 3 peer wire messages beyond the handshake: `<length prefix><message
//! ID><payload>`, big-endian, with a zero-length prefix meaning keep-alive.
//! Grounded on `original_source/peer.py`'s `_message_loop`/`_handle_message`
//! /`_send_message`, which is where the original implementation's framing
//! actually lives (there is no separate message module in the Python
//! source). Only the message kinds spec.md §7 names are modeled; request/
//! cancel/port and the fast extension are out of scope (`spec.md` §7
//! Non-goals).
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;

/// One block request within a piece, as sent in a `request` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

/// A parsed, inbound peer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield(Vec<u8>),
    Piece { index: u32, begin: u32, data: Bytes },
    /// Any message id this engine does not act on (cancel, port, fast
    /// extension ids, ...). Tolerated rather than rejected (§4.5: "other —
    /// ignored").
    Unknown(u8),
}

impl Message {
    /// Reads one message off `stream`, applying the same per-read framing
    /// the original implementation used: a 4-byte length prefix, then
    /// `length` bytes (the first of which is the message id, if any).
    pub async fn read(stream: &mut TcpStream) -> std::io::Result<Self> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let length = BigEndian::read_u32(&len_buf) as usize;

        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).await?;

        let id = body[0];
        // `Bytes::slice` shares the one allocation this read produced rather
        // than copying the block payload again before it's buffered.
        let body = Bytes::from(body);
        let payload = body.slice(1..);

        let message = match id {
            ID_CHOKE => Message::Choke,
            ID_UNCHOKE => Message::Unchoke,
            ID_INTERESTED => Message::Interested,
            ID_NOT_INTERESTED => Message::NotInterested,
            ID_HAVE => {
                if payload.len() < 4 {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "short have payload"));
                }
                Message::Have { index: BigEndian::read_u32(&payload) }
            }
            ID_BITFIELD => Message::Bitfield(payload.to_vec()),
            ID_PIECE => {
                if payload.len() < 8 {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "short piece payload"));
                }
                Message::Piece {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    data: payload.slice(8..),
                }
            }
            other => Message::Unknown(other),
        };

        Ok(message)
    }

    /// Sends the `interested` message: `<0001><2>`.
    pub async fn send_interested(stream: &mut TcpStream) -> std::io::Result<()> {
        stream.write_all(&[0, 0, 0, 1, ID_INTERESTED]).await
    }

    /// Sends a batch of pipelined `request` messages in one write, matching
    /// the "zero-wait pipelining" behaviour of the original client: every
    /// block of a piece is requested up front rather than one at a time.
    pub async fn send_requests(stream: &mut TcpStream, requests: &[BlockRequest]) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(requests.len() * 17);
        for req in requests {
            buf.extend_from_slice(&13u32.to_be_bytes());
            buf.push(ID_REQUEST);
            buf.extend_from_slice(&req.index.to_be_bytes());
            buf.extend_from_slice(&req.begin.to_be_bytes());
            buf.extend_from_slice(&req.length.to_be_bytes());
        }
        stream.write_all(&buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_have_message() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut payload = vec![0, 0, 0, 5, ID_HAVE];
            payload.extend_from_slice(&7u32.to_be_bytes());
            socket.write_all(&payload).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let message = Message::read(&mut client).await.unwrap();
        assert_eq!(message, Message::Have { index: 7 });

        server.await.unwrap();
    }

    #[tokio::test]
    async fn zero_length_prefix_is_keep_alive() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[0, 0, 0, 0]).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let message = Message::read(&mut client).await.unwrap();
        assert_eq!(message, Message::KeepAlive);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn parses_piece_payload() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let block = vec![9u8; 4];
            let mut payload = vec![ID_PIECE];
            payload.extend_from_slice(&2u32.to_be_bytes());
            payload.extend_from_slice(&0u32.to_be_bytes());
            payload.extend_from_slice(&block);
            let len = (payload.len() as u32).to_be_bytes();
            socket.write_all(&len).await.unwrap();
            socket.write_all(&payload).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let message = Message::read(&mut client).await.unwrap();
        assert_eq!(message, Message::Piece { index: 2, begin: 0, data: Bytes::from(vec![9u8; 4]) });

        server.await.unwrap();
    }

    #[tokio::test]
    async fn unrecognized_message_id_is_tolerated_not_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // id 9 ("port", DHT) — not produced or consumed by this engine,
            // but must not abort the session.
            socket.write_all(&[0, 0, 0, 3, 9, 0, 0]).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let message = Message::read(&mut client).await.unwrap();
        assert_eq!(message, Message::Unknown(9));

        server.await.unwrap();
    }
}
