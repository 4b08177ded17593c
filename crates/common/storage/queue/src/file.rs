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

//! Append and sequential-read access to a single data file.

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use snafu::ensure;

use crate::{
    Buffer, Result,
    error::{CorruptedRecordSnafu, InternalSnafu},
    message::{FRAME_LENGTH_SIZE, frame_disk_size},
};

const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Appends length-prefixed frames to a data file.
///
/// Every [`write`](RecordWriter::write) is handed to the OS before it
/// returns, so a crash of this process never loses an acknowledged record.
pub struct RecordWriter {
    path:   PathBuf,
    stream: BufWriter<File>,
    size:   u64,
}

impl RecordWriter {
    /// Opens `path` for appending at `position`.
    ///
    /// The file is cut (or zero-extended) to exactly `position` bytes first,
    /// so a half-written frame left by a crash is never read back.
    pub fn open<P: AsRef<Path>>(path: P, position: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.set_len(position)?;
        file.seek(SeekFrom::Start(position))?;

        Ok(Self {
            path,
            stream: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            size: position,
        })
    }

    /// Appends one frame and returns the bytes it occupies on disk.
    pub fn write(&mut self, payload: &[u8]) -> Result<u64> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            InternalSnafu {
                message: format!("record of {} bytes does not fit a frame", payload.len()),
            }
            .build()
        })?;

        self.stream.write_all(&len.to_le_bytes())?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;

        let written = frame_disk_size(payload.len());
        self.size += written;
        Ok(written)
    }

    /// Length of the file including everything written so far.
    #[must_use]
    pub const fn size(&self) -> u64 { self.size }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Forces written data down to the device.
    pub fn sync(&mut self) -> Result<()> {
        self.stream.flush()?;
        self.stream.get_ref().sync_data()?;
        Ok(())
    }
}

/// Reads frames sequentially from a data file.
///
/// The file length is queried live, so frames appended by a
/// [`RecordWriter`] on the same file become visible without reopening.
pub struct RecordReader {
    path:     PathBuf,
    file:     File,
    position: u64,
}

impl RecordReader {
    /// Opens `path` for reading starting at byte `position`.
    pub fn open<P: AsRef<Path>>(path: P, position: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(position))?;
        Ok(Self {
            path,
            file,
            position,
        })
    }

    /// Current length of the file on disk.
    pub fn size(&self) -> Result<u64> { Ok(self.file.metadata()?.len()) }

    /// Whether the cursor sits at or past the end of the file.
    pub fn eof(&self) -> Result<bool> { Ok(self.position >= self.size()?) }

    #[must_use]
    pub const fn position(&self) -> u64 { self.position }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Payload length of the next frame, leaving the cursor in place.
    pub fn peek_next_size(&mut self) -> Result<u32> {
        let start = self.position;
        let result = self.read_length();
        self.rewind_to(start)?;
        result
    }

    /// Reads the next frame's payload into `out` and advances past it.
    ///
    /// Returns the bytes the frame occupies on disk. On failure the cursor
    /// is left where it was.
    pub fn read(&mut self, out: &mut Buffer) -> Result<u64> {
        let start = self.position;
        match self.read_frame(out) {
            Ok(read) => Ok(read),
            Err(e) => {
                self.rewind_to(start)?;
                Err(e)
            }
        }
    }

    /// Reads the next frame's payload into `out` without consuming it.
    pub fn peek(&mut self, out: &mut Buffer) -> Result<u64> {
        let start = self.position;
        let result = self.read_frame(out);
        self.rewind_to(start)?;
        result
    }

    fn read_frame(&mut self, out: &mut Buffer) -> Result<u64> {
        let len = self.read_length()? as usize;
        let available = self.size()?.saturating_sub(self.position);
        ensure!(
            len as u64 <= available,
            CorruptedRecordSnafu {
                path:     self.path.clone(),
                position: self.position - FRAME_LENGTH_SIZE as u64,
                reason:   format!("frame declares {len} bytes but only {available} remain"),
            }
        );

        out.resize(len)?;
        self.file.read_exact(out.as_mut_slice())?;
        self.position += len as u64;
        Ok(frame_disk_size(len))
    }

    fn read_length(&mut self) -> Result<u32> {
        let available = self.size()?.saturating_sub(self.position);
        ensure!(
            available >= FRAME_LENGTH_SIZE as u64,
            CorruptedRecordSnafu {
                path:     self.path.clone(),
                position: self.position,
                reason:   format!("expected a length prefix but only {available} bytes remain"),
            }
        );

        let mut header = [0u8; FRAME_LENGTH_SIZE];
        self.file.read_exact(&mut header)?;
        self.position += FRAME_LENGTH_SIZE as u64;
        Ok(u32::from_le_bytes(header))
    }

    fn rewind_to(&mut self, position: u64) -> Result<()> {
        // A short read may have moved the OS cursor without moving `position`.
        self.file.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }
}
