// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Disk-backed ring of data files.
//!
//! Records are appended to the current write file until it reaches the
//! per-file limit, then writing moves on to the next slot. Reading follows
//! behind; a read file whose tracked record count drops to zero is deleted
//! as soon as reading can move past it. At most [`MAX_FILES`] files exist at
//! any time.
//!
//! The durable state is not written atomically with the data files, so every
//! open reconciles it against what is actually in the directory: files the
//! state does not consider live are removed, files it expects but that are
//! missing are forgotten, and the cached totals are recomputed.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use parking_lot::Mutex;
use snafu::{OptionExt, ensure};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::{
    Buffer, QueueConfig, RawQueue, Result,
    error::{ClosedSnafu, InternalSnafu},
    file::{RecordReader, RecordWriter},
    message::frame_disk_size,
    path::{corrupted_file_path, data_file_path, scan_corrupted_files, state_file_path},
    retry::{Reopen, perform, safe_close, safe_delete},
    state::{DurableState, MAX_FILES},
};

/// A bounded, crash-recoverable FIFO stored in one directory.
///
/// All methods lock internally, so a `RingStorage` can be shared between
/// threads as is. Failed operations are retried once after reloading the
/// state from disk.
pub struct RingStorage {
    inner: Mutex<Inner>,
}

struct Inner {
    directory:            PathBuf,
    temp_dir:             Option<TempDir>,
    max_size:             u64,
    data_file_limit:      u64,
    flush_on_push:        bool,
    flush_on_pop:         bool,
    evict_oldest:         bool,
    corruption_threshold: u32,
    state:                Option<DurableState>,
    reader:               Option<RecordReader>,
    writer:               Option<RecordWriter>,
    // Failures since the read pointer last moved to another file.
    failed_reads:         u32,
    closed:               bool,
}

impl RingStorage {
    /// Opens the ring described by `config`, creating its directory if needed.
    pub fn open(config: &QueueConfig) -> Result<Self> {
        let (directory, temp_dir) = match &config.directory {
            Some(directory) => (directory.clone(), None),
            None => {
                let temp_dir = tempfile::Builder::new().prefix("spillway-").tempdir()?;
                (temp_dir.path().to_path_buf(), Some(temp_dir))
            }
        };

        let mut inner = Inner {
            directory,
            temp_dir,
            max_size: config.effective_max_size(),
            data_file_limit: config.data_file_limit(),
            flush_on_push: config.flush_on_push,
            flush_on_pop: config.flush_on_pop,
            evict_oldest: config.delete_oldest_on_overflow,
            corruption_threshold: config.effective_corruption_threshold(),
            state: None,
            reader: None,
            writer: None,
            failed_reads: 0,
            closed: false,
        };
        inner.reopen()?;

        let count = inner.state()?.count();
        info!(
            path = ?inner.directory,
            max_size = inner.max_size,
            data_file_limit = inner.data_file_limit,
            count,
            "Opened queue storage"
        );

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Directory holding the state and data files.
    #[must_use]
    pub fn path(&self) -> PathBuf { self.inner.lock().directory.clone() }

    /// Clamped byte budget.
    #[must_use]
    pub fn max_size(&self) -> u64 { self.inner.lock().max_size }

    /// Number of file slots between the read and write files, inclusive.
    pub fn files(&self) -> Result<u16> { Ok(self.inner.lock().state()?.files_in_use()) }

    /// Quarantined files left in the directory.
    pub fn corrupted_files(&self) -> Result<Vec<PathBuf>> {
        let inner = self.inner.lock();
        ensure!(!inner.closed, ClosedSnafu);
        scan_corrupted_files(&inner.directory)
    }
}

impl RawQueue for RingStorage {
    fn reopen(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.reopen()?;
        let count = inner.state()?.count();
        info!(path = ?inner.directory, count, "Reopened queue storage");
        Ok(())
    }

    fn bytes(&self) -> Result<u64> { Ok(self.inner.lock().state()?.bytes()) }

    fn count(&self) -> Result<u64> { Ok(self.inner.lock().state()?.count()) }

    fn remaining_bytes(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        let max_size = inner.max_size;
        Ok(max_size.saturating_sub(inner.state()?.bytes()))
    }

    fn remaining_count(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        let max_size = inner.max_size;
        let state = inner.state()?;
        if state.count() == 0 || state.bytes() == 0 {
            return Ok(max_size / 4);
        }

        let free = u128::from(max_size.saturating_sub(state.bytes()));
        let estimate = free * u128::from(state.count()) / u128::from(state.bytes());
        Ok(u64::try_from(estimate).unwrap_or(u64::MAX))
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        perform(&mut *inner, Inner::clear_once)?;
        info!(path = ?inner.directory, "Cleared queue storage");
        Ok(())
    }

    fn push(&self, data: &[u8]) -> Result<bool> {
        let mut inner = self.inner.lock();
        perform(&mut *inner, |storage| storage.push_once(data))
    }

    fn pop(&self, out: &mut Buffer) -> Result<bool> {
        let mut inner = self.inner.lock();
        perform(&mut *inner, |storage| storage.pop_once(out))
    }

    fn peek(&self, out: &mut Buffer) -> Result<bool> {
        let mut inner = self.inner.lock();
        perform(&mut *inner, |storage| storage.peek_once(out))
    }

    fn notify_failed_read(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.state()?;
        inner.record_failed_read()
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.state()?;
        if let Some(writer) = inner.writer.as_mut() {
            writer.sync()?;
        }
        inner.state()?.flush()
    }

    fn close(&self) -> Result<()> {
        self.inner.lock().close();
        Ok(())
    }
}

impl Drop for RingStorage {
    fn drop(&mut self) { self.inner.get_mut().close(); }
}

impl Reopen for Inner {
    fn reopen(&mut self) -> Result<()> {
        ensure!(!self.closed, ClosedSnafu);
        self.close_handles();
        fs::create_dir_all(&self.directory)?;
        self.state = Some(DurableState::open(state_file_path(&self.directory))?);
        self.gc()
    }
}

impl Inner {
    fn state(&mut self) -> Result<&mut DurableState> {
        ensure!(!self.closed, ClosedSnafu);
        self.state.as_mut().context(InternalSnafu {
            message: "storage state is not loaded",
        })
    }

    fn reader(&mut self) -> Result<&mut RecordReader> {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => {
                let state = self.state()?;
                let (slot, position) = (state.read_slot(), state.read_position());
                RecordReader::open(data_file_path(&self.directory, slot), position)?
            }
        };
        Ok(self.reader.insert(reader))
    }

    fn writer(&mut self) -> Result<&mut RecordWriter> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                let state = self.state()?;
                let (slot, position) = (state.write_slot(), state.write_position());
                RecordWriter::open(data_file_path(&self.directory, slot), position)?
            }
        };
        Ok(self.writer.insert(writer))
    }

    fn close_handles(&mut self) {
        self.reader = None;
        self.writer = None;
        if let Some(mut state) = self.state.take() {
            safe_close("state file", || state.flush());
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.close_handles();
        self.closed = true;

        if let Some(temp_dir) = self.temp_dir.take() {
            let path = temp_dir.path().to_path_buf();
            safe_close("temporary directory", || Ok(temp_dir.close()?));
            safe_delete(&path);
        }
        debug!(path = ?self.directory, "Closed queue storage");
    }

    /// Reconciles the loaded state with the files present on disk.
    fn gc(&mut self) -> Result<()> {
        let directory = &self.directory;
        let state = self.state.as_mut().context(InternalSnafu {
            message: "storage state is not loaded",
        })?;
        let mut changed = false;

        while !state.same_file_read_write() && !data_file_path(directory, state.read_slot()).exists() {
            debug!(slot = state.read_slot(), "Read file missing, skipping it");
            state.advance_read_file(0);
            self.failed_reads = 0;
            changed = true;
        }

        let mut total_bytes = 0;
        let mut total_count = 0;
        for slot in 0..MAX_FILES {
            let path = data_file_path(directory, slot);
            if !state.is_in_use(slot) {
                if path.exists() {
                    debug!(slot, "Deleting stale data file");
                    safe_delete(&path);
                }
                continue;
            }

            match fs::metadata(&path) {
                Ok(metadata) => {
                    // The writer cuts or extends its file to the tracked position on open.
                    total_bytes += if slot == state.write_slot() {
                        state.write_position()
                    } else {
                        metadata.len()
                    };
                    total_count += u64::from(state.file_count(slot));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if state.forget_slot(slot) {
                        debug!(slot, "Live data file missing, forgetting its records");
                        changed = true;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        if state.fix_counts(total_count, total_bytes) {
            warn!(count = total_count, bytes = total_bytes, "Corrected queue totals from disk");
            changed = true;
        }
        if changed {
            state.flush()?;
        }
        Ok(())
    }

    fn push_once(&mut self, data: &[u8]) -> Result<bool> {
        let frame = frame_disk_size(data.len());
        let (max_size, limit, evict) = (self.max_size, self.data_file_limit, self.evict_oldest);

        let state = self.state()?;
        if frame > max_size {
            warn!(len = data.len(), max_size, "Record exceeds the queue budget, rejecting");
            return Ok(false);
        }

        let rotation_pending = state.write_position() >= limit;
        if !evict {
            if state.bytes() + frame > max_size {
                return Ok(false);
            }
            if rotation_pending && state.files_in_use() >= MAX_FILES {
                return Ok(false);
            }
        }

        if rotation_pending {
            if self.state()?.files_in_use() >= MAX_FILES {
                self.delete_oldest_file()?;
            }
            self.rotate_write()?;
        }

        if evict {
            while self.state()?.bytes() + frame > max_size {
                if self.state()?.same_file_read_write() {
                    self.rotate_write()?;
                }
                self.delete_oldest_file()?;
            }
        }

        let written = self.writer()?.write(data)?;
        let state = self.state()?;
        state.add_write_count(written);

        if state.write_position() >= limit && state.files_in_use() < MAX_FILES {
            self.rotate_write()?;
        }
        if self.flush_on_push {
            self.state()?.flush()?;
        }
        Ok(true)
    }

    fn pop_once(&mut self, out: &mut Buffer) -> Result<bool> {
        if self.check_read_eof()? {
            return Ok(false);
        }

        let read = match self.reader().and_then(|reader| reader.read(out)) {
            Ok(read) => read,
            Err(e) => {
                self.record_failed_read()?;
                return Err(e);
            }
        };

        let state = self.state()?;
        state.add_read_count(read);
        if self.flush_on_pop {
            self.state()?.flush()?;
        }

        self.check_read_eof()?;
        Ok(true)
    }

    fn peek_once(&mut self, out: &mut Buffer) -> Result<bool> {
        if self.check_read_eof()? {
            return Ok(false);
        }
        self.reader()?.peek(out)?;
        Ok(true)
    }

    fn clear_once(&mut self) -> Result<()> {
        self.reset_files()?;
        self.reopen()
    }

    /// Releases exhausted read files. Returns `true` when the queue is empty.
    fn check_read_eof(&mut self) -> Result<bool> {
        loop {
            let state = self.state()?;
            if !state.read_file_exhausted() {
                return Ok(false);
            }
            if state.same_file_read_write() {
                return Ok(true);
            }
            self.delete_oldest_file()?;
        }
    }

    fn rotate_write(&mut self) -> Result<()> {
        self.writer = None;
        let state = self.state()?;
        state.advance_write_file();
        debug!(write_file = state.write_file_id(), slot = state.write_slot(), "Rotated write file");
        Ok(())
    }

    /// Drops the read file and everything still in it from the ring.
    fn delete_oldest_file(&mut self) -> Result<()> {
        let state = self.state()?;
        ensure!(
            !state.same_file_read_write(),
            InternalSnafu {
                message: "cannot release the file being written",
            }
        );
        let slot = state.read_slot();
        let evicted = state.file_count(slot);

        let path = data_file_path(&self.directory, slot);
        let size = file_len_or_zero(&path)?;
        self.reader = None;
        self.failed_reads = 0;

        let state = self.state()?;
        state.advance_read_file(size);
        state.flush()?;
        safe_delete(&path);

        debug!(slot, size, evicted, "Released data file");
        Ok(())
    }

    fn record_failed_read(&mut self) -> Result<()> {
        self.failed_reads += 1;
        if self.failed_reads >= self.corruption_threshold {
            self.failed_reads = 0;
            self.quarantine_read_file()?;
        }
        Ok(())
    }

    /// Moves the read file aside as `dataNN.<millis>.corrupted` and skips it.
    ///
    /// When it is also the write file nothing else is live, so the whole ring
    /// is reset.
    fn quarantine_read_file(&mut self) -> Result<()> {
        let state = self.state()?;
        let slot = state.read_slot();
        let same_file = state.same_file_read_write();

        self.reader = None;
        if same_file {
            self.writer = None;
        }

        let path = data_file_path(&self.directory, slot);
        let size = file_len_or_zero(&path)?;
        let target = corrupted_file_path(&self.directory, slot, Utc::now().timestamp_millis());
        match fs::rename(&path, &target) {
            Ok(()) => warn!(slot, path = ?target, "Quarantined corrupted data file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(slot, error = %e, "Failed to quarantine data file, deleting it");
                safe_delete(&path);
            }
        }

        if same_file {
            return self.reset_files();
        }

        let state = self.state()?;
        state.advance_read_file(size);
        state.flush()
    }

    /// Empties the state and removes every data file.
    fn reset_files(&mut self) -> Result<()> {
        self.reader = None;
        self.writer = None;
        self.failed_reads = 0;

        let state = self.state()?;
        state.clear();
        state.flush()?;

        for slot in 0..MAX_FILES {
            safe_delete(&data_file_path(&self.directory, slot));
        }
        Ok(())
    }
}

fn file_len_or_zero(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{QueueError, state::MIN_QUEUE_SIZE};

    fn config(dir: &Path, max_size: u64) -> QueueConfig {
        QueueConfig {
            directory: Some(dir.to_path_buf()),
            max_size,
            ..Default::default()
        }
    }

    fn pop_bytes(storage: &RingStorage) -> Option<Vec<u8>> {
        let mut out = Buffer::new();
        storage.pop(&mut out).unwrap().then(|| out.as_slice().to_vec())
    }

    fn state_of(dir: &Path) -> DurableState { DurableState::open(state_file_path(dir)).unwrap() }

    #[test]
    fn test_push_pop_tracks_state() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&config(temp_dir.path(), 1000)).unwrap();

        for i in 0..20u32 {
            let payload = format!("record{i:02}");
            assert!(storage.push(payload.as_bytes()).unwrap());
            assert_eq!(storage.count().unwrap(), 1);
            assert_eq!(pop_bytes(&storage).unwrap(), payload.as_bytes());
        }

        let state = state_of(temp_dir.path());
        assert_eq!(state.read_position(), 240);
        assert_eq!(state.write_position(), 240);
        assert_eq!(state.count(), 0);
        assert_eq!(state.bytes(), 240);
        assert_eq!(storage.bytes().unwrap(), 240);
        assert_eq!(std::fs::metadata(temp_dir.path().join("data00")).unwrap().len(), 240);
    }

    #[test]
    fn test_pop_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&config(temp_dir.path(), 1000)).unwrap();

        assert!(pop_bytes(&storage).is_none());
        let mut out = Buffer::new();
        assert!(!storage.peek(&mut out).unwrap());
        assert_eq!(storage.max_size(), MIN_QUEUE_SIZE);
        assert_eq!(storage.remaining_count().unwrap(), MIN_QUEUE_SIZE / 4);
    }

    #[test]
    fn test_peek_keeps_record() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&config(temp_dir.path(), 1000)).unwrap();
        storage.push(b"first").unwrap();
        storage.push(b"second").unwrap();

        let mut out = Buffer::new();
        assert!(storage.peek(&mut out).unwrap());
        assert_eq!(out.as_slice(), b"first");
        assert!(storage.peek(&mut out).unwrap());
        assert_eq!(out.as_slice(), b"first");
        assert_eq!(storage.count().unwrap(), 2);

        assert_eq!(pop_bytes(&storage).unwrap(), b"first");
        assert_eq!(pop_bytes(&storage).unwrap(), b"second");
    }

    #[test]
    fn test_rotation_is_eager_and_lazy_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&config(temp_dir.path(), 512)).unwrap();

        storage.push(&[b'a'; 512]).unwrap();
        assert_eq!(storage.files().unwrap(), 2);
        assert!(temp_dir.path().join("data00").exists());
        assert!(!temp_dir.path().join("data01").exists());

        storage.push(b"b").unwrap();
        assert!(temp_dir.path().join("data01").exists());
    }

    #[test]
    fn test_remaining_counts() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&config(temp_dir.path(), MIN_QUEUE_SIZE)).unwrap();

        storage.push(&[0u8; 96]).unwrap();
        assert_eq!(storage.bytes().unwrap(), 100);
        assert_eq!(storage.remaining_bytes().unwrap(), MIN_QUEUE_SIZE - 100);
        assert_eq!(storage.remaining_count().unwrap(), (MIN_QUEUE_SIZE - 100) / 100);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&QueueConfig {
            delete_oldest_on_overflow: true,
            ..config(temp_dir.path(), MIN_QUEUE_SIZE)
        })
        .unwrap();

        let payload = vec![0u8; MIN_QUEUE_SIZE as usize];
        assert!(!storage.push(&payload).unwrap());
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_notify_failed_read_quarantines_at_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&QueueConfig {
            corruption_threshold: 2,
            ..config(temp_dir.path(), 512)
        })
        .unwrap();

        storage.push(&[b'x'; 512]).unwrap();
        storage.push(b"next").unwrap();

        storage.notify_failed_read().unwrap();
        assert!(storage.corrupted_files().unwrap().is_empty());
        storage.notify_failed_read().unwrap();

        let corrupted = storage.corrupted_files().unwrap();
        assert_eq!(corrupted.len(), 1);
        assert_eq!(pop_bytes(&storage).unwrap(), b"next");
    }

    #[test]
    fn test_failed_reads_add_up_across_pops() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&QueueConfig {
            corruption_threshold: 3,
            ..config(temp_dir.path(), 512)
        })
        .unwrap();

        for i in 0..5u8 {
            storage.push(&[i; 100]).unwrap();
        }
        storage.push(b"next").unwrap();
        assert_eq!(storage.files().unwrap(), 2);

        for i in 0..3u8 {
            assert_eq!(pop_bytes(&storage).unwrap(), vec![i; 100]);
            storage.notify_failed_read().unwrap();
        }

        assert_eq!(storage.corrupted_files().unwrap().len(), 1);
        assert_eq!(storage.count().unwrap(), 1);
        assert_eq!(pop_bytes(&storage).unwrap(), b"next");
    }

    #[test]
    fn test_leaving_a_file_forgets_its_failures() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&QueueConfig {
            corruption_threshold: 2,
            ..config(temp_dir.path(), 512)
        })
        .unwrap();

        storage.push(&[1u8; 600]).unwrap();
        storage.push(&[2u8; 10]).unwrap();
        storage.push(&[3u8; 10]).unwrap();

        storage.notify_failed_read().unwrap();
        // Draining data00 moves reading on to data01.
        assert_eq!(pop_bytes(&storage).unwrap(), vec![1u8; 600]);
        storage.notify_failed_read().unwrap();

        assert!(storage.corrupted_files().unwrap().is_empty());
        assert_eq!(pop_bytes(&storage).unwrap(), vec![2u8; 10]);
        assert_eq!(pop_bytes(&storage).unwrap(), vec![3u8; 10]);
    }

    #[test]
    fn test_closed_storage_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let storage = RingStorage::open(&config(temp_dir.path(), 1000)).unwrap();
        storage.close().unwrap();

        assert!(matches!(storage.push(b"abc").unwrap_err(), QueueError::Closed));
        assert!(matches!(storage.count().unwrap_err(), QueueError::Closed));
        assert!(matches!(storage.reopen().unwrap_err(), QueueError::Closed));
        storage.close().unwrap();
    }

    #[test]
    fn test_temporary_directory_removed_on_close() {
        let storage = RingStorage::open(&QueueConfig::default()).unwrap();
        let path = storage.path();
        storage.push(b"abc").unwrap();
        assert!(path.join("data00").exists());

        storage.close().unwrap();
        assert!(!path.exists());
    }
}
