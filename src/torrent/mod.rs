//! Torrent metainfo parsing and the per-piece possession bitmap.
use thiserror::Error;

pub mod bitfield;
pub mod metainfo;

pub use bitfield::Bitfield;
pub use metainfo::{FileEntry, Metainfo};

/// Errors raised while loading or validating a `.torrent` file.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bencoding: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid metainfo: {0}")]
    InvalidMetainfo(String),
}

pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
