//! Connection-count supervisor (§4.7), grounded on
//! `original_source/client.py`'s `_maintain_swarm`: a capped pool of active
//! peer sessions, refilled from the tracker's candidate list whenever the
//! deficit exceeds a small threshold, polling every two seconds, with
//! pause implemented as a cheap shared `AtomicBool` read rather than a
//! back-reference to the owning engine.
use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::file_writer::FileWriter;
use crate::peer::session::SessionConfig;
use crate::peer::PeerSession;
use crate::piece_manager::PieceManager;
use crate::torrent::Metainfo;

const DEFAULT_MAX_ACTIVE_PEERS: usize = 130;
const REFILL_THRESHOLD: usize = 5;
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// Supervisor-level tunables (§4.7), overridable via
/// [`crate::engine::EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SwarmConfig {
    pub max_active_peers: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self { max_active_peers: DEFAULT_MAX_ACTIVE_PEERS }
    }
}

/// Drives the set of live peer connections for one download until every
/// piece is complete.
pub struct Supervisor {
    metainfo: Arc<Metainfo>,
    peer_id: [u8; 20],
    piece_manager: Arc<PieceManager>,
    file_writer: Arc<StdMutex<FileWriter>>,
    pause: Arc<AtomicBool>,
    swarm_config: SwarmConfig,
    session_config: SessionConfig,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metainfo: Arc<Metainfo>,
        peer_id: [u8; 20],
        piece_manager: Arc<PieceManager>,
        file_writer: Arc<StdMutex<FileWriter>>,
        pause: Arc<AtomicBool>,
        swarm_config: SwarmConfig,
        session_config: SessionConfig,
    ) -> Self {
        Self { metainfo, peer_id, piece_manager, file_writer, pause, swarm_config, session_config }
    }

    /// Runs the swarm to completion against `candidates`, the full set of
    /// peer addresses discovered from the tracker. Returns once every
    /// piece is verified and written.
    pub async fn run(&self, candidates: HashSet<SocketAddrV4>) {
        let mut candidates: Vec<SocketAddrV4> = candidates.into_iter().collect();
        let mut active: Vec<(SocketAddrV4, JoinHandle<()>)> = Vec::new();

        loop {
            if self.piece_manager.is_complete().await {
                info!("download complete");
                return;
            }

            if self.pause.load(Ordering::Relaxed) {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }

            active.retain(|(_, handle)| !handle.is_finished());

            let needed = self.swarm_config.max_active_peers.saturating_sub(active.len());
            if needed > REFILL_THRESHOLD && !candidates.is_empty() {
                candidates.shuffle(&mut rand::rng());
                let current: HashSet<SocketAddrV4> = active.iter().map(|(addr, _)| *addr).collect();

                let mut batch = Vec::new();
                for addr in &candidates {
                    if !current.contains(addr) {
                        batch.push(*addr);
                        if batch.len() >= needed {
                            break;
                        }
                    }
                }

                for addr in batch {
                    let handle = self.spawn_session(addr);
                    active.push((addr, handle));
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn spawn_session(&self, addr: SocketAddrV4) -> JoinHandle<()> {
        let metainfo = Arc::clone(&self.metainfo);
        let peer_id = self.peer_id;
        let piece_manager = Arc::clone(&self.piece_manager);
        let file_writer = Arc::clone(&self.file_writer);
        let pause = Arc::clone(&self.pause);
        let session_config = self.session_config;

        tokio::spawn(async move {
            let result = PeerSession::run(
                addr.into(),
                metainfo,
                peer_id,
                piece_manager,
                file_writer,
                pause,
                session_config,
            )
            .await;
            if let Err(err) = result {
                warn!(%addr, error = %err, "peer session ended with error");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::FileEntry;

    #[tokio::test]
    async fn returns_immediately_when_already_complete() {
        let metainfo = Arc::new(Metainfo {
            announce: String::new(),
            announce_list: Vec::new(),
            name: "t".into(),
            piece_length: 16,
            files: vec![FileEntry { path: "f".into(), length: 16 }],
            total_length: 16,
            pieces_hashes: vec![[0u8; 20]],
            info_hash: [0u8; 20],
            comment: None,
            created_by: None,
            encoding: None,
            creation_date: None,
        });
        let piece_manager = Arc::new(PieceManager::new(1));
        piece_manager.mark_complete(0).await;

        let save_dir = std::env::temp_dir().join(format!("rstc-swarm-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&save_dir);
        let file_writer = Arc::new(StdMutex::new(FileWriter::create(&metainfo, &save_dir).unwrap()));

        let supervisor = Supervisor::new(
            metainfo,
            [1u8; 20],
            piece_manager,
            file_writer,
            Arc::new(AtomicBool::new(false)),
            SwarmConfig::default(),
            SessionConfig::default(),
        );

        tokio::time::timeout(std::time::Duration::from_secs(1), supervisor.run(HashSet::new()))
            .await
            .expect("supervisor should return immediately when the piece manager is already complete");

        std::fs::remove_dir_all(&save_dir).ok();
    }
}
