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

use crate::state::{MAX_FILES, MAX_QUEUE_SIZE, MIN_QUEUE_SIZE};

/// Smallest per-file write budget.
pub const MIN_DATA_FILE_LIMIT: u64 = 512;

/// Consecutive failed reads after which the read file is quarantined.
pub const DEFAULT_CORRUPTION_THRESHOLD: u32 = 64;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue directory. `None` uses a temporary directory removed on close.
    pub directory:                 Option<PathBuf>,
    /// Total byte budget on disk, framing included.
    pub max_size:                  u64,
    pub flush_on_push:             bool,
    pub flush_on_pop:              bool,
    /// Evict the oldest files instead of rejecting pushes when full.
    pub delete_oldest_on_overflow: bool,
    pub corruption_threshold:      u32,
    /// In-memory fallback size in bytes. Zero disables the fallback.
    pub fallback_capacity:         usize,
    pub initial_buffer_capacity:   usize,
    pub max_buffer_capacity:       usize,
    pub min_pooled_slots:          usize,
    pub max_pooled_slots:          usize,
    /// Zstd-compress serialized payloads before they are queued.
    pub compress:                  bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            directory:                 None,
            max_size:                  MAX_QUEUE_SIZE,
            flush_on_push:             true,
            flush_on_pop:              true,
            delete_oldest_on_overflow: false,
            corruption_threshold:      DEFAULT_CORRUPTION_THRESHOLD,
            fallback_capacity:         0,
            initial_buffer_capacity:   4096,
            max_buffer_capacity:       usize::MAX,
            min_pooled_slots:          1,
            max_pooled_slots:          64,
            compress:                  false,
        }
    }
}

impl QueueConfig {
    /// The byte budget clamped to what the ring can address.
    #[must_use]
    pub fn effective_max_size(&self) -> u64 { self.max_size.clamp(MIN_QUEUE_SIZE, MAX_QUEUE_SIZE) }

    /// Bytes written to one data file before writing moves to the next.
    #[must_use]
    pub fn data_file_limit(&self) -> u64 {
        self.effective_max_size()
            .div_ceil(u64::from(MAX_FILES))
            .max(MIN_DATA_FILE_LIMIT)
    }

    #[must_use]
    pub fn effective_corruption_threshold(&self) -> u32 { self.corruption_threshold.max(1) }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert!(config.directory.is_none());
        assert!(config.flush_on_push);
        assert!(config.flush_on_pop);
        assert!(!config.delete_oldest_on_overflow);
        assert!(!config.compress);
        assert_eq!(config.corruption_threshold, 64);
        assert_eq!(config.effective_max_size(), MAX_QUEUE_SIZE);
    }

    #[test_case(0, MIN_QUEUE_SIZE ; "below minimum")]
    #[test_case(1_000_000, 1_000_000 ; "in range")]
    #[test_case(u64::MAX, MAX_QUEUE_SIZE ; "above maximum")]
    fn test_max_size_is_clamped(max_size: u64, expected: u64) {
        let config = QueueConfig {
            max_size,
            ..Default::default()
        };
        assert_eq!(config.effective_max_size(), expected);
    }

    #[test_case(512, 512 ; "minimum budget")]
    #[test_case(121 * 1024, 1024 ; "exact multiple")]
    #[test_case(121 * 1024 + 1, 1025 ; "rounds up")]
    fn test_data_file_limit(max_size: u64, expected: u64) {
        let config = QueueConfig {
            max_size,
            ..Default::default()
        };
        assert_eq!(config.data_file_limit(), expected);
    }

    #[test]
    fn test_zero_threshold_still_quarantines() {
        let config = QueueConfig {
            corruption_threshold: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_corruption_threshold(), 1);
    }
}
