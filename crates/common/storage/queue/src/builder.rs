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

use std::path::PathBuf;

use crate::{
    BoundedBlockingQueue, MemoryRing, PersistentQueue, QueueConfig, Result, RingStorage,
    pool::ScratchPool, serializer::Serializer,
};

#[derive(Debug, Clone, Default)]
pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    /// Builder for a queue in a temporary directory, removed on close.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn from_config(config: QueueConfig) -> Self { Self { config } }

    #[must_use]
    pub fn directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.config.directory = Some(directory.into());
        self
    }

    #[must_use]
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.config.max_size = max_size;
        self
    }

    #[must_use]
    pub fn flush_on_push(mut self, flush: bool) -> Self {
        self.config.flush_on_push = flush;
        self
    }

    #[must_use]
    pub fn flush_on_pop(mut self, flush: bool) -> Self {
        self.config.flush_on_pop = flush;
        self
    }

    #[must_use]
    pub fn delete_oldest_on_overflow(mut self, evict: bool) -> Self {
        self.config.delete_oldest_on_overflow = evict;
        self
    }

    #[must_use]
    pub fn corruption_threshold(mut self, threshold: u32) -> Self {
        self.config.corruption_threshold = threshold;
        self
    }

    /// Compress payloads of typed queues. Only applies to [`Self::build`].
    #[must_use]
    pub fn compress(mut self, compress: bool) -> Self {
        self.config.compress = compress;
        self
    }

    #[must_use]
    pub fn fallback_capacity(mut self, capacity: usize) -> Self {
        self.config.fallback_capacity = capacity;
        self
    }

    #[must_use]
    pub fn initial_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn max_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.max_buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn pooled_slots(mut self, min: usize, max: usize) -> Self {
        self.config.min_pooled_slots = min;
        self.config.max_pooled_slots = max;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &QueueConfig { &self.config }

    /// Opens just the disk ring.
    pub fn build_storage(&self) -> Result<RingStorage> { RingStorage::open(&self.config) }

    /// Opens the disk ring behind the blocking front, with the memory
    /// fallback when `fallback_capacity` is non-zero.
    pub fn build_blocking(&self) -> Result<BoundedBlockingQueue<RingStorage, MemoryRing>> {
        let storage = self.build_storage()?;
        let fallback =
            (self.config.fallback_capacity > 0).then(|| MemoryRing::new(self.config.fallback_capacity));
        Ok(BoundedBlockingQueue::new(storage, fallback))
    }

    /// Opens a typed queue; `factory` makes one serializer per pooled slot.
    pub fn build<T, S, F>(&self, factory: F) -> Result<PersistentQueue<T, S>>
    where
        S: Serializer<T>,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let queue = self.build_blocking()?;
        let pool = ScratchPool::new(
            factory,
            self.config.min_pooled_slots,
            self.config.max_pooled_slots,
            self.config.initial_buffer_capacity,
            self.config.max_buffer_capacity,
        );
        Ok(PersistentQueue::new(queue, pool, self.config.compress))
    }
}
