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

use std::{marker::PhantomData, time::Duration};

use tracing::warn;

use crate::{
    BoundedBlockingQueue, MemoryRing, Result, RingStorage,
    error::SerializationSnafu,
    pool::{Scratch, ScratchPool},
    serializer::Serializer,
};

/// Typed queue of `T` values over a disk ring with a memory fallback.
///
/// Values are encoded through pooled scratch slots, so pushing and popping
/// same-shaped values does not allocate once the pool is warm. With
/// `compress` set, each payload is zstd-compressed after serialization; the
/// codec allocates its own context per call.
pub struct PersistentQueue<T, S> {
    queue:    BoundedBlockingQueue<RingStorage, MemoryRing>,
    pool:     ScratchPool<S>,
    compress: bool,
    _marker:  PhantomData<fn(T) -> T>,
}

impl<T, S: Serializer<T>> PersistentQueue<T, S> {
    pub fn new(
        queue: BoundedBlockingQueue<RingStorage, MemoryRing>,
        pool: ScratchPool<S>,
        compress: bool,
    ) -> Self {
        Self {
            queue,
            pool,
            compress,
            _marker: PhantomData,
        }
    }

    /// The untyped queue underneath.
    pub const fn raw(&self) -> &BoundedBlockingQueue<RingStorage, MemoryRing> { &self.queue }

    pub fn push(&self, value: &T) -> Result<bool> {
        self.pool.with(|scratch| {
            let payload = self.encode(scratch, value)?;
            self.queue.push(payload)
        })
    }

    pub fn blocking_push(&self, value: &T, timeout: Option<Duration>) -> Result<bool> {
        self.pool.with(|scratch| {
            let payload = self.encode(scratch, value)?;
            self.queue.blocking_push(payload, timeout)
        })
    }

    pub fn pop(&self) -> Result<Option<T>> {
        self.pool.with(|scratch| {
            if !self.queue.pop(&mut scratch.buffer)? {
                return Ok(None);
            }
            self.decode_popped(scratch).map(Some)
        })
    }

    /// Waits for a value. `Ok(None)` when `timeout` expires first.
    pub fn blocking_pop(&self, timeout: Option<Duration>) -> Result<Option<T>> {
        self.pool.with(|scratch| {
            if !self.queue.blocking_pop(&mut scratch.buffer, timeout)? {
                return Ok(None);
            }
            self.decode_popped(scratch).map(Some)
        })
    }

    pub fn peek(&self) -> Result<Option<T>> {
        self.pool.with(|scratch| {
            if !self.queue.peek(&mut scratch.buffer)? {
                return Ok(None);
            }
            self.decode(scratch).map(Some)
        })
    }

    pub fn clear(&self) -> Result<()> { self.queue.clear() }

    pub fn flush(&self) -> Result<()> { self.queue.flush() }

    pub fn reopen(&self) -> Result<()> { self.queue.reopen() }

    pub fn bytes(&self) -> Result<u64> { self.queue.bytes() }

    pub fn count(&self) -> Result<u64> { self.queue.count() }

    pub fn remaining_bytes(&self) -> Result<u64> { self.queue.remaining_bytes() }

    pub fn remaining_count(&self) -> Result<u64> { self.queue.remaining_count() }

    pub fn set_pop_paused(&self, paused: bool) { self.queue.set_pop_paused(paused); }

    pub fn set_push_paused(&self, paused: bool) { self.queue.set_push_paused(paused); }

    pub fn close(&self) -> Result<()> { self.queue.close() }

    /// Serializes `value` and returns the payload to queue.
    fn encode<'a>(&self, scratch: &'a mut Scratch<S>, value: &T) -> Result<&'a [u8]> {
        scratch.serializer.serialize(&mut scratch.buffer, value)?;
        if !self.compress {
            return Ok(scratch.buffer.as_slice());
        }
        scratch.spare.clear();
        zstd::stream::copy_encode(scratch.buffer.as_slice(), &mut scratch.spare, 0).map_err(|e| {
            SerializationSnafu {
                message: format!("failed to compress payload: {e}"),
            }
            .build()
        })?;
        Ok(scratch.spare.as_slice())
    }

    /// Turns the payload in `scratch.buffer` back into a value.
    fn decode(&self, scratch: &mut Scratch<S>) -> Result<T> {
        if !self.compress {
            return scratch.serializer.deserialize(&scratch.buffer);
        }
        scratch.spare.clear();
        zstd::stream::copy_decode(scratch.buffer.as_slice(), &mut scratch.spare).map_err(|e| {
            SerializationSnafu {
                message: format!("failed to decompress payload: {e}"),
            }
            .build()
        })?;
        scratch.serializer.deserialize(&scratch.spare)
    }

    fn decode_popped(&self, scratch: &mut Scratch<S>) -> Result<T> {
        self.decode(scratch).inspect_err(|e| {
            warn!(error = %e, len = scratch.buffer.len(), "Failed to decode popped record");
            if let Err(e) = self.queue.notify_failed_read() {
                warn!(error = %e, "Failed to report unreadable record");
            }
        })
    }
}
