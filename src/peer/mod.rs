//! Peer wire protocol: handshake (BEP 3), message framing, and the
//! per-connection download state machine.
pub mod handshake;
pub mod message;
pub mod session;

use thiserror::Error;

pub use handshake::Handshake;
pub use message::Message;
pub use session::{PeerSession, SessionConfig};

/// Typed peer-session errors (§7): the boundary [`PeerSession::run`]
/// returns to [`crate::swarm::Supervisor`]. Internal handshake/message
/// helpers stay on `anyhow::Result`, mirroring `tracker::TrackerError`'s
/// layering.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("handshake with peer failed: {0}")]
    Handshake(anyhow::Error),

    #[error("peer session error: {0}")]
    Session(#[from] anyhow::Error),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
