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

//! Fixed-size in-memory ring used as a fallback when the disk path fails.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    Buffer, RawQueue, Result,
    message::{FRAME_LENGTH_SIZE, MEMORY_FRAME_OVERHEAD, MEMORY_TIMESTAMP_SIZE, frame_memory_size},
};

/// A circular byte buffer holding `[timestamp][length][payload]` frames.
///
/// A push always succeeds by evicting the oldest records, except for a
/// record that could not fit even in an empty ring, which is dropped.
pub struct MemoryRing {
    inner: Mutex<Ring>,
}

struct Ring {
    memory: Box<[u8]>,
    begin:  usize,
    bytes:  usize,
    count:  usize,
}

impl MemoryRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                memory: vec![0u8; capacity].into_boxed_slice(),
                begin:  0,
                bytes:  0,
                count:  0,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize { self.inner.lock().memory.len() }

    /// When the oldest buffered record was pushed.
    #[must_use]
    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        let ring = self.inner.lock();
        if ring.count == 0 {
            return None;
        }
        let mut raw = [0u8; MEMORY_TIMESTAMP_SIZE];
        ring.read_at(ring.begin, &mut raw);
        DateTime::from_timestamp_millis(i64::from_le_bytes(raw))
    }
}

impl Ring {
    fn capacity(&self) -> usize { self.memory.len() }

    fn write_at(&mut self, offset: usize, data: &[u8]) {
        let capacity = self.capacity();
        let start = offset % capacity;
        let first = data.len().min(capacity - start);
        self.memory[start..start + first].copy_from_slice(&data[..first]);
        self.memory[..data.len() - first].copy_from_slice(&data[first..]);
    }

    fn read_at(&self, offset: usize, out: &mut [u8]) {
        let capacity = self.capacity();
        let start = offset % capacity;
        let first = out.len().min(capacity - start);
        let len = out.len();
        out[..first].copy_from_slice(&self.memory[start..start + first]);
        out[first..].copy_from_slice(&self.memory[..len - first]);
    }

    fn head_len(&self) -> usize {
        let mut raw = [0u8; FRAME_LENGTH_SIZE];
        self.read_at(self.begin + MEMORY_TIMESTAMP_SIZE, &mut raw);
        u32::from_le_bytes(raw) as usize
    }

    fn drop_head(&mut self) {
        let frame = frame_memory_size(self.head_len());
        self.begin = (self.begin + frame) % self.capacity();
        self.bytes -= frame;
        self.count -= 1;
        if self.count == 0 {
            self.begin = 0;
        }
    }

    fn copy_head(&self, out: &mut Buffer) -> Result<()> {
        out.resize(self.head_len())?;
        self.read_at(self.begin + MEMORY_FRAME_OVERHEAD, out.as_mut_slice());
        Ok(())
    }
}

impl RawQueue for MemoryRing {
    fn reopen(&self) -> Result<()> { Ok(()) }

    fn bytes(&self) -> Result<u64> { Ok(self.inner.lock().bytes as u64) }

    fn count(&self) -> Result<u64> { Ok(self.inner.lock().count as u64) }

    fn remaining_bytes(&self) -> Result<u64> {
        let ring = self.inner.lock();
        Ok((ring.capacity() - ring.bytes) as u64)
    }

    fn remaining_count(&self) -> Result<u64> {
        let ring = self.inner.lock();
        if ring.count == 0 {
            return Ok((ring.capacity() / MEMORY_FRAME_OVERHEAD) as u64);
        }
        Ok(((ring.capacity() - ring.bytes) * ring.count / ring.bytes) as u64)
    }

    fn clear(&self) -> Result<()> {
        let mut ring = self.inner.lock();
        ring.begin = 0;
        ring.bytes = 0;
        ring.count = 0;
        Ok(())
    }

    fn push(&self, data: &[u8]) -> Result<bool> {
        let mut ring = self.inner.lock();
        let frame = frame_memory_size(data.len());
        let Ok(len) = u32::try_from(data.len()) else {
            warn!(len = data.len(), "Record too large for the memory fallback, dropping it");
            return Ok(false);
        };
        if frame > ring.capacity() {
            warn!(
                len = data.len(),
                capacity = ring.capacity(),
                "Record too large for the memory fallback, dropping it"
            );
            return Ok(false);
        }

        let mut evicted = 0usize;
        while ring.capacity() - ring.bytes < frame {
            ring.drop_head();
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, "Evicted records from the memory fallback");
        }

        let offset = ring.begin + ring.bytes;
        ring.write_at(offset, &Utc::now().timestamp_millis().to_le_bytes());
        ring.write_at(offset + MEMORY_TIMESTAMP_SIZE, &len.to_le_bytes());
        ring.write_at(offset + MEMORY_FRAME_OVERHEAD, data);
        ring.bytes += frame;
        ring.count += 1;
        Ok(true)
    }

    fn pop(&self, out: &mut Buffer) -> Result<bool> {
        let mut ring = self.inner.lock();
        if ring.count == 0 {
            return Ok(false);
        }

        let copied = ring.copy_head(out);
        ring.drop_head();
        copied?;
        Ok(true)
    }

    fn peek(&self, out: &mut Buffer) -> Result<bool> {
        let ring = self.inner.lock();
        if ring.count == 0 {
            return Ok(false);
        }
        ring.copy_head(out)?;
        Ok(true)
    }

    fn flush(&self) -> Result<()> { Ok(()) }

    fn close(&self) -> Result<()> { Ok(()) }
}
