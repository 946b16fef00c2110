//! Crate-wide error types for the engine's public boundary.
//!
//! Internal call sites use `anyhow::Result` the way the teacher's
//! `tracker`/`peer` modules already do; the public API (`Engine::start`)
//! returns this `thiserror`-based type, matching the teacher's layering of
//! `anyhow` internally and `thiserror` at typed boundaries
//! (`torrent::TorrentError`).
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid metainfo: {0}")]
    InvalidMetainfo(#[from] crate::torrent::TorrentError),

    #[error("no peers found from any tracker")]
    NoPeers,

    #[error("file I/O error: {0}")]
    FileIo(#[from] std::io::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
