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

//! A bounded FIFO queue of byte records that spills to a ring of disk files
//! and survives crashes.
//!
//! The layers, bottom up:
//!
//! - [`RingStorage`]: the disk ring, reconciled against the directory on
//!   every open and retried once after any failure.
//! - [`MemoryRing`]: a fixed in-memory ring used when the disk path fails.
//! - [`BoundedBlockingQueue`]: blocking and pausable push/pop over both.
//! - [`PersistentQueue`]: typed values through pooled serializers.
//!
//! ```no_run
//! use spillway_queue::{QueueBuilder, StringSerializer};
//!
//! let queue = QueueBuilder::new()
//!     .directory("/var/lib/spillway/events")
//!     .max_size(64 * 1024 * 1024)
//!     .build(|| StringSerializer)?;
//!
//! queue.push(&"event".to_string())?;
//! assert_eq!(queue.pop()?.as_deref(), Some("event"));
//! # Ok::<(), spillway_queue::QueueError>(())
//! ```

pub mod blocking;
pub mod buffer;
pub mod builder;
pub mod config;
mod crc;
pub mod error;
pub mod file;
pub mod memory;
pub mod message;
pub mod path;
pub mod persistent;
pub mod pool;
pub mod raw;
mod retry;
pub mod serializer;
pub mod state;
pub mod storage;

pub use blocking::{BoundedBlockingQueue, MAX_WAIT};
pub use buffer::Buffer;
pub use builder::QueueBuilder;
pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use memory::MemoryRing;
pub use persistent::PersistentQueue;
pub use pool::{Scratch, ScratchPool};
pub use raw::RawQueue;
pub use serializer::{BytesSerializer, Serializer, StringSerializer};
pub use state::{MAX_FILES, MAX_QUEUE_SIZE, MIN_QUEUE_SIZE};
pub use storage::RingStorage;
