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

//! Pool of reusable buffer and serializer pairs.
//!
//! Each push or pop borrows a [`Scratch`] slot for the duration of the call,
//! so steady traffic reuses the same allocations. Idle slots sit in a
//! lock-free bounded queue; a slot released while the queue is full is
//! dropped, which keeps memory bounded after a burst of concurrent callers.

use crossbeam::queue::ArrayQueue;

use crate::Buffer;

/// One caller's working set.
pub struct Scratch<S> {
    pub buffer:     Buffer,
    /// Holds the compressed or decompressed form of `buffer`.
    pub spare:      Buffer,
    pub serializer: S,
}

pub struct ScratchPool<S> {
    free:                    ArrayQueue<Scratch<S>>,
    factory:                 Box<dyn Fn() -> S + Send + Sync>,
    initial_buffer_capacity: usize,
    max_buffer_capacity:     usize,
}

impl<S> ScratchPool<S> {
    /// Creates a pool holding up to `max_pooled` idle slots, `min_pooled` of
    /// them created up front.
    pub fn new<F>(
        factory: F,
        min_pooled: usize,
        max_pooled: usize,
        initial_buffer_capacity: usize,
        max_buffer_capacity: usize,
    ) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        let pool = Self {
            free: ArrayQueue::new(max_pooled.max(1)),
            factory: Box::new(factory),
            initial_buffer_capacity,
            max_buffer_capacity,
        };
        for _ in 0..min_pooled.min(pool.free.capacity()) {
            let _ = pool.free.push(pool.create());
        }
        pool
    }

    /// Runs `f` with an idle slot, or a new one when none is available,
    /// and returns the slot to the pool afterwards.
    pub fn with<R>(&self, f: impl FnOnce(&mut Scratch<S>) -> R) -> R {
        let mut slot = self.free.pop().unwrap_or_else(|| self.create());
        let result = f(&mut slot);
        self.release(slot);
        result
    }

    /// Number of idle slots.
    #[must_use]
    pub fn idle(&self) -> usize { self.free.len() }

    #[must_use]
    pub fn max_idle(&self) -> usize { self.free.capacity() }

    fn create(&self) -> Scratch<S> {
        Scratch {
            buffer:     Buffer::with_capacity(self.initial_buffer_capacity, self.max_buffer_capacity),
            spare:      Buffer::with_capacity(0, self.max_buffer_capacity),
            serializer: (self.factory)(),
        }
    }

    fn release(&self, mut slot: Scratch<S>) {
        slot.buffer.clear();
        slot.spare.clear();
        // Full pool: let the slot go.
        let _ = self.free.push(slot);
    }
}
