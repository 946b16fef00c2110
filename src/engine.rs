//! The public download engine (§6): construct a torrent download, start
//! it, toggle pause, and observe progress.
//!
//! `Progress` ticks replace the Python source's global `ui`/`logger`
//! singleton (`original_source/ui.py`) with an injected observer: a
//! `tokio::sync::watch` channel nobody has to poll unless they hold a
//! receiver (`spec.md` §9 Design Notes).
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::watch;
use tracing::{info, instrument};

use crate::error::{EngineError, EngineResult};
use crate::file_writer::FileWriter;
use crate::peer::SessionConfig;
use crate::peer_id;
use crate::piece_manager::PieceManager;
use crate::swarm::{Supervisor, SwarmConfig};
use crate::torrent::Metainfo;
use crate::tracker;

pub type ProgressRx = watch::Receiver<Progress>;

/// A point-in-time snapshot of a download, broadcast to anyone holding a
/// [`ProgressRx`] from [`Engine::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub pieces_done: usize,
    pub pieces_total: usize,
    pub paused: bool,
}

/// Construction options for an [`Engine`]. `swarm` and `session` default to
/// the literal values `spec.md` hardcodes (`MAX_ACTIVE_PEERS`, `BLOCK_SIZE`,
/// connect/idle timeouts); overriding them is additive, never required to
/// match the spec's default behavior (§9 Design Notes; see `SPEC_FULL.md`
/// A.3).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub save_path: PathBuf,
    pub listen_port: u16,
    pub swarm: SwarmConfig,
    pub session: SessionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("."),
            listen_port: 6881,
            swarm: SwarmConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Owns every piece of state needed to drive one torrent download:
/// metainfo, peer-id, piece tracking, file storage, and the pause flag the
/// swarm supervisor polls.
pub struct Engine {
    metainfo: Arc<Metainfo>,
    peer_id: [u8; 20],
    config: EngineConfig,
    piece_manager: Arc<PieceManager>,
    file_writer: Arc<StdMutex<FileWriter>>,
    pause: Arc<AtomicBool>,
    progress_tx: watch::Sender<Progress>,
}

impl Engine {
    /// Loads and validates `torrent_path`, pre-allocates the destination
    /// files under `config.save_path`, and prepares (but does not start)
    /// the download.
    #[instrument(skip(config))]
    pub fn construct(torrent_path: impl AsRef<Path>, config: EngineConfig) -> EngineResult<Self> {
        let metainfo = Metainfo::load(torrent_path)?;
        let file_writer = FileWriter::create(&metainfo, &config.save_path)?;
        let piece_manager = PieceManager::new(metainfo.num_pieces());

        let progress = Progress {
            pieces_done: 0,
            pieces_total: metainfo.num_pieces(),
            paused: false,
        };
        let (progress_tx, _) = watch::channel(progress);

        Ok(Self {
            metainfo: Arc::new(metainfo),
            peer_id: peer_id::generate(),
            config,
            piece_manager: Arc::new(piece_manager),
            file_writer: Arc::new(StdMutex::new(file_writer)),
            pause: Arc::new(AtomicBool::new(false)),
            progress_tx,
        })
    }

    /// Announces to every tracker, then runs the swarm supervisor until
    /// every piece is downloaded and written.
    #[instrument(skip(self), fields(name = %self.metainfo.name, info_hash = %hex::encode(self.metainfo.info_hash)))]
    pub async fn start(&self) -> EngineResult<()> {
        let tracker_client = tracker::Client::new(self.peer_id, self.config.listen_port);
        let candidates: std::collections::HashSet<SocketAddrV4> =
            tracker_client.announce_all(&self.metainfo, 0).await;

        if candidates.is_empty() {
            return Err(EngineError::NoPeers);
        }

        info!(count = candidates.len(), peer_id = %hex::encode(self.peer_id), "starting swarm");
        let supervisor = Supervisor::new(
            Arc::clone(&self.metainfo),
            self.peer_id,
            Arc::clone(&self.piece_manager),
            Arc::clone(&self.file_writer),
            Arc::clone(&self.pause),
            self.config.swarm,
            self.config.session,
        );

        let progress_tx = self.progress_tx.clone();
        let piece_manager = Arc::clone(&self.piece_manager);
        let pause = Arc::clone(&self.pause);
        let total = self.metainfo.num_pieces();
        let ticker = tokio::spawn(async move {
            loop {
                let done = piece_manager.completed_count().await;
                let _ = progress_tx.send(Progress {
                    pieces_done: done,
                    pieces_total: total,
                    paused: pause.load(Ordering::Relaxed),
                });
                if done == total {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        });

        supervisor.run(candidates).await;
        ticker.abort();

        if self.piece_manager.is_complete().await {
            Ok(())
        } else {
            Err(EngineError::NoPeers)
        }
    }

    /// Flips the pause flag the swarm supervisor and every live peer
    /// session poll.
    pub fn toggle_pause(&self) {
        self.pause.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Relaxed)
    }

    /// Subscribes to progress ticks. The default state before any tick
    /// arrives mirrors the engine's state at construction.
    pub fn subscribe(&self) -> ProgressRx {
        self.progress_tx.subscribe()
    }

    pub fn metainfo(&self) -> &Metainfo {
        &self.metainfo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    fn write_sample_torrent(dir: &Path) -> PathBuf {
        let piece_data = vec![9u8; 16];
        let hash: [u8; 20] = Sha1::digest(&piece_data).into();

        let mut info = std::collections::HashMap::new();
        info.insert(b"name".to_vec(), crate::bencode::BencodeValue::String(b"demo".to_vec()));
        info.insert(b"piece length".to_vec(), crate::bencode::BencodeValue::Integer(16));
        info.insert(b"pieces".to_vec(), crate::bencode::BencodeValue::String(hash.to_vec()));
        info.insert(b"length".to_vec(), crate::bencode::BencodeValue::Integer(16));

        let mut top = std::collections::HashMap::new();
        top.insert(b"announce".to_vec(), crate::bencode::BencodeValue::String(b"http://t.example/".to_vec()));
        top.insert(b"info".to_vec(), crate::bencode::BencodeValue::Dict(info));

        let bytes = crate::bencode::encode(&crate::bencode::BencodeValue::Dict(top)).unwrap();
        let torrent_path = dir.join("demo.torrent");
        std::fs::write(&torrent_path, bytes).unwrap();
        torrent_path
    }

    #[test]
    fn construct_preallocates_files_and_loads_metainfo() {
        let dir = std::env::temp_dir().join(format!("rstc-engine-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let torrent_path = write_sample_torrent(&dir);
        let config = EngineConfig { save_path: dir.join("downloads"), ..Default::default() };
        let engine = Engine::construct(&torrent_path, config).unwrap();

        assert_eq!(engine.metainfo().name, "demo");
        assert!(dir.join("downloads/demo").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn toggle_pause_flips_state() {
        let dir = std::env::temp_dir().join(format!("rstc-engine-pause-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let torrent_path = write_sample_torrent(&dir);
        let config = EngineConfig { save_path: dir.join("downloads"), ..Default::default() };
        let engine = Engine::construct(&torrent_path, config).unwrap();

        assert!(!engine.is_paused());
        engine.toggle_pause();
        assert!(engine.is_paused());
        engine.toggle_pause();
        assert!(!engine.is_paused());

        std::fs::remove_dir_all(&dir).ok();
    }
}
