//! Scatter-write file storage for multi-file torrents (§5).
//!
//! Grounded on `original_source/file_handler.py`'s `FileHandler`: one entry
//! per torrent file recording its `[start, end)` byte range within the
//! concatenated torrent, sparse pre-allocation via `seek(length - 1)` plus a
//! single zero byte, and a `write` that walks every entry overlapping the
//! piece's range and slices out the relevant sub-range of the piece buffer.
//!
//! All file I/O here is synchronous `std::fs`, run on the blocking thread
//! pool via `tokio::task::spawn_blocking` — sockets are the only operations
//! in this crate that need to be async suspension points (§5 Design Notes).
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write as IoWrite};
use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::torrent::Metainfo;

struct FileSlot {
    file: File,
    start: u64,
    end: u64,
}

/// Owns the open file handles for one torrent download and knows how to
/// scatter a completed, verified piece's bytes across them.
pub struct FileWriter {
    slots: Vec<FileSlot>,
    piece_length: u64,
}

impl FileWriter {
    /// Creates the destination directory tree under `save_path`, pre-
    /// allocates every file to its final length if it doesn't already
    /// exist, and opens each for read/write.
    #[instrument(skip(metainfo), fields(name = %metainfo.name))]
    pub fn create(metainfo: &Metainfo, save_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let base_dir = save_path.as_ref().join(&metainfo.name);
        std::fs::create_dir_all(&base_dir)?;

        let mut slots = Vec::with_capacity(metainfo.files.len());
        let mut offset = 0u64;
        for entry in &metainfo.files {
            let full_path = join_relative(&base_dir, &entry.path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            if !full_path.exists() {
                preallocate(&full_path, entry.length)?;
            }

            let file = OpenOptions::new().read(true).write(true).open(&full_path)?;
            slots.push(FileSlot {
                file,
                start: offset,
                end: offset + entry.length,
            });
            offset += entry.length;
        }

        Ok(Self {
            slots,
            piece_length: metainfo.piece_length,
        })
    }

    /// Writes a verified piece's bytes to every file slot it overlaps.
    #[instrument(skip(self, data), fields(piece_index, len = data.len()))]
    pub fn write_piece(&mut self, piece_index: usize, data: &[u8]) -> std::io::Result<()> {
        let piece_start = piece_index as u64 * self.piece_length;
        let piece_end = piece_start + data.len() as u64;

        for slot in &mut self.slots {
            if piece_end <= slot.start || piece_start >= slot.end {
                continue;
            }

            let write_start = piece_start.max(slot.start);
            let write_end = piece_end.min(slot.end);
            let write_len = (write_end - write_start) as usize;

            let file_seek_pos = write_start - slot.start;
            let data_read_pos = (write_start - piece_start) as usize;

            slot.file.seek(SeekFrom::Start(file_seek_pos))?;
            slot.file.write_all(&data[data_read_pos..data_read_pos + write_len])?;
        }

        Ok(())
    }
}

fn preallocate(path: &Path, length: u64) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    if length == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(length - 1))?;
    file.write_all(&[0])?;
    Ok(())
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    base.join(relative.replace('\\', "/"))
}
