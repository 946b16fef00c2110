//! Library root for rs-torrent-client.
//!
//! Re-exports the engine and its building blocks: bencode codec, torrent
//! metainfo, tracker client, peer wire session, piece manager, file writer
//! and swarm supervisor.
pub mod bencode;
pub mod engine;
pub mod error;
pub mod file_writer;
pub mod peer;
pub mod peer_id;
pub mod piece_manager;
pub mod swarm;
pub mod torrent;
pub mod tracker;

pub use engine::{Engine, EngineConfig, Progress};
pub use error::EngineError;
