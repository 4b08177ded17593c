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

//! Durable ring state.
//!
//! The state file records where reading and writing currently are, the
//! global record/byte totals and how many live records each file slot holds.
//! It is rewritten in place on flush and is *not* written atomically with the
//! data files; [`RingStorage`](crate::RingStorage) reconciles it against the
//! directory contents on every open.
//!
//! ## Binary Format
//!
//! ```text
//! ┌──────────────────────────┬─────────────────────────────────────┐
//! │ read_file_id: u16        │ monotonically increasing file ID    │
//! │ write_file_id: u16       │ slot = id % MAX_FILES               │
//! │ read_position: u64       │ byte offset in the read file        │
//! │ write_position: u64      │ byte offset in the write file       │
//! │ count: u64               │ live records                        │
//! │ bytes: u64               │ bytes held by files in the ring     │
//! │ file_counts: [u32; 121]  │ live records per slot               │
//! │ crc: u32                 │ CRC32 of everything above           │
//! └──────────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! All fields are little-endian. A file of any other length, or with a bad
//! checksum, loads as the empty state.
//!
//! File IDs run over `0..MAX_FILE_ID`, a multiple of [`MAX_FILES`], so the
//! slot mapping survives the ID wrapping around. Equal IDs mean reader and
//! writer share one file; equal slots with different IDs mean the ring is
//! full.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::{
    Result,
    crc::{calculate_state_crc, verify_state_crc},
};

/// Number of physical data file slots in the ring.
pub const MAX_FILES: u16 = 121;

/// Size of the file ID space.
#[allow(clippy::cast_sign_loss)]
pub const MAX_FILE_ID: u16 = (i16::MAX as u16 / MAX_FILES) * MAX_FILES;

const SLOTS: usize = MAX_FILES as usize;

/// Size of the state record without its checksum.
pub const STATE_BODY_SIZE: usize = 2 * 2 + 4 * 8 + SLOTS * 4;

/// Exact size of a valid state file.
pub const STATE_FILE_SIZE: usize = STATE_BODY_SIZE + 4;

/// Smallest accepted total budget: one 512-byte file per slot.
pub const MIN_QUEUE_SIZE: u64 = MAX_FILES as u64 * 512;

/// Largest accepted total budget.
#[allow(clippy::cast_sign_loss)]
pub const MAX_QUEUE_SIZE: u64 = MAX_FILES as u64 * i32::MAX as u64;

/// In-memory copy of the state file plus the handle used to rewrite it.
pub struct DurableState {
    path:           PathBuf,
    file:           File,
    read_file:      u16,
    write_file:     u16,
    read_position:  u64,
    write_position: u64,
    count:          u64,
    bytes:          u64,
    file_counts:    [u32; SLOTS],
}

impl DurableState {
    /// Opens (creating if needed) the state file at `path`.
    ///
    /// A missing, short, oversized or checksum-failing record loads as the
    /// empty state; the caller's reconciliation pass fixes totals from the
    /// files that are actually present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut state = Self {
            path,
            file: file.try_clone()?,
            read_file: 0,
            write_file: 0,
            read_position: 0,
            write_position: 0,
            count: 0,
            bytes: 0,
            file_counts: [0; SLOTS],
        };

        let len = file.metadata()?.len();
        if len == STATE_FILE_SIZE as u64 {
            let mut data = [0u8; STATE_FILE_SIZE];
            file.read_exact(&mut data)?;
            if !state.decode(&data) {
                warn!(path = ?state.path, "State file failed validation, starting empty");
            }
        } else if len != 0 {
            warn!(path = ?state.path, len, "State file has unexpected size, starting empty");
        }

        Ok(state)
    }

    fn decode(&mut self, data: &[u8; STATE_FILE_SIZE]) -> bool {
        let (body, crc) = data.split_at(STATE_BODY_SIZE);
        let stored_crc = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if !verify_state_crc(body, stored_crc) {
            return false;
        }

        let u16_at = |at: usize| u16::from_le_bytes([body[at], body[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&body[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        let read_file = u16_at(0);
        let write_file = u16_at(2);
        if read_file >= MAX_FILE_ID || write_file >= MAX_FILE_ID {
            return false;
        }

        self.read_file = read_file;
        self.write_file = write_file;
        self.read_position = u64_at(4);
        self.write_position = u64_at(12);
        self.count = u64_at(20);
        self.bytes = u64_at(28);
        for (slot, count) in self.file_counts.iter_mut().enumerate() {
            *count = u32_at(36 + slot * 4);
        }
        true
    }

    fn encode(&self, out: &mut [u8; STATE_FILE_SIZE]) {
        out[0..2].copy_from_slice(&self.read_file.to_le_bytes());
        out[2..4].copy_from_slice(&self.write_file.to_le_bytes());
        out[4..12].copy_from_slice(&self.read_position.to_le_bytes());
        out[12..20].copy_from_slice(&self.write_position.to_le_bytes());
        out[20..28].copy_from_slice(&self.count.to_le_bytes());
        out[28..36].copy_from_slice(&self.bytes.to_le_bytes());
        for (slot, count) in self.file_counts.iter().enumerate() {
            let at = 36 + slot * 4;
            out[at..at + 4].copy_from_slice(&count.to_le_bytes());
        }
        let crc = calculate_state_crc(&out[..STATE_BODY_SIZE]);
        out[STATE_BODY_SIZE..].copy_from_slice(&crc.to_le_bytes());
    }

    /// Rewrites the state file from the in-memory copy.
    pub fn flush(&mut self) -> Result<()> {
        let mut data = [0u8; STATE_FILE_SIZE];
        self.encode(&mut data);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Whether `slot` lies between the read and write slots, inclusive,
    /// following the ring's wraparound.
    #[must_use]
    pub fn is_in_use(&self, slot: u16) -> bool {
        let read = self.read_slot();
        let write = self.write_slot();

        if self.same_file_read_write() {
            slot == read
        } else if read <= write {
            read <= slot && slot <= write
        } else {
            read <= slot || slot <= write
        }
    }

    /// Number of slots from the read file to the write file, inclusive.
    #[must_use]
    pub const fn files_in_use(&self) -> u16 {
        (self.write_file + MAX_FILE_ID - self.read_file) % MAX_FILE_ID + 1
    }

    #[must_use]
    pub const fn same_file_read_write(&self) -> bool { self.read_file == self.write_file }

    #[must_use]
    pub const fn read_slot(&self) -> u16 { self.read_file % MAX_FILES }

    #[must_use]
    pub const fn write_slot(&self) -> u16 { self.write_file % MAX_FILES }

    #[must_use]
    pub const fn read_file_id(&self) -> u16 { self.read_file }

    #[must_use]
    pub const fn write_file_id(&self) -> u16 { self.write_file }

    #[must_use]
    pub const fn read_position(&self) -> u64 { self.read_position }

    #[must_use]
    pub const fn write_position(&self) -> u64 { self.write_position }

    #[must_use]
    pub const fn count(&self) -> u64 { self.count }

    #[must_use]
    pub const fn bytes(&self) -> u64 { self.bytes }

    #[must_use]
    pub const fn file_count(&self, slot: u16) -> u32 { self.file_counts[slot as usize] }

    /// No live records remain in the read file.
    #[must_use]
    pub const fn read_file_exhausted(&self) -> bool { self.file_counts[self.read_slot() as usize] == 0 }

    /// Drops the read file from the ring.
    ///
    /// Its remaining records leave the global count and `file_bytes` (the
    /// file's length on disk) leave the byte total.
    pub fn advance_read_file(&mut self, file_bytes: u64) {
        let slot = self.read_slot() as usize;
        let remaining = self.file_counts[slot];
        self.file_counts[slot] = 0;
        self.count = self.count.saturating_sub(u64::from(remaining));
        self.bytes = self.bytes.saturating_sub(file_bytes);
        self.read_file = (self.read_file + 1) % MAX_FILE_ID;
        self.read_position = 0;
    }

    /// Moves writing to the next file ID.
    pub const fn advance_write_file(&mut self) {
        self.write_file = (self.write_file + 1) % MAX_FILE_ID;
        self.write_position = 0;
    }

    /// Accounts for one frame of `bytes` appended to the write file.
    pub const fn add_write_count(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
        self.write_position += bytes;
        self.file_counts[self.write_slot() as usize] += 1;
    }

    /// Accounts for one frame of `bytes` consumed from the read file.
    ///
    /// The byte total is left alone: bytes are released only when the whole
    /// file leaves the ring.
    pub const fn add_read_count(&mut self, bytes: u64) {
        let slot = self.read_slot() as usize;
        self.count = self.count.saturating_sub(1);
        self.read_position += bytes;
        self.file_counts[slot] = self.file_counts[slot].saturating_sub(1);
    }

    /// Forgets a slot whose file disappeared from disk.
    ///
    /// Returns `true` when anything was reset.
    pub const fn forget_slot(&mut self, slot: u16) -> bool {
        let mut changed = self.file_counts[slot as usize] != 0;
        self.file_counts[slot as usize] = 0;
        if slot == self.write_slot() && self.write_position != 0 {
            self.write_position = 0;
            changed = true;
        }
        if slot == self.read_slot() && self.read_position != 0 {
            self.read_position = 0;
            changed = true;
        }
        changed
    }

    /// Resets to the empty ring starting at slot 0.
    pub const fn clear(&mut self) {
        self.read_file = 0;
        self.write_file = 0;
        self.read_position = 0;
        self.write_position = 0;
        self.count = 0;
        self.bytes = 0;
        self.file_counts = [0; SLOTS];
    }

    /// Replaces the cached totals with recounted ones.
    ///
    /// Returns `true` when they differed.
    pub const fn fix_counts(&mut self, count: u64, bytes: u64) -> bool {
        if count != self.count || bytes != self.bytes {
            self.count = count;
            self.bytes = bytes;
            return true;
        }
        false
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }
}
