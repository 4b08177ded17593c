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

//! Record framing for data files and the in-memory ring.
//!
//! ## On-Disk Frame
//!
//! Records are stored back to back in data files:
//!
//! ```text
//! ┌─────────────────┬──────────────────────┐
//! │  Length (4B)    │   Payload (variable) │
//! │  little-endian  │   raw bytes          │
//! └─────────────────┴──────────────────────┘
//! ```
//!
//! ## In-Memory Frame
//!
//! The fallback ring keeps the time each record was accepted in front of the
//! length:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────┐
//! │ Timestamp (8B)  │  Length (4B)    │   Payload (variable) │
//! │ unix millis, LE │  little-endian  │   raw bytes          │
//! └─────────────────┴─────────────────┴──────────────────────┘
//! ```

/// Size of the length prefix in bytes (4 bytes = u32).
pub const FRAME_LENGTH_SIZE: usize = 4;

/// Size of the timestamp in an in-memory frame.
pub const MEMORY_TIMESTAMP_SIZE: usize = 8;

/// Fixed overhead of one in-memory frame.
pub const MEMORY_FRAME_OVERHEAD: usize = MEMORY_TIMESTAMP_SIZE + FRAME_LENGTH_SIZE;

/// Total on-disk size of a record with the given payload length.
///
/// ```ignore
/// assert_eq!(frame_disk_size(6), 10);
/// ```
#[inline]
#[must_use]
pub const fn frame_disk_size(payload_len: usize) -> u64 { (FRAME_LENGTH_SIZE + payload_len) as u64 }

/// Total in-memory size of a record with the given payload length.
#[inline]
#[must_use]
pub const fn frame_memory_size(payload_len: usize) -> usize { MEMORY_FRAME_OVERHEAD + payload_len }
