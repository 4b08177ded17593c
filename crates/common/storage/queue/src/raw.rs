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

use crate::{Buffer, Result};

/// A FIFO of opaque byte records.
///
/// Implemented by the disk-backed [`RingStorage`](crate::RingStorage) and the
/// in-memory [`MemoryRing`](crate::MemoryRing), so the blocking layer can use
/// either as primary or fallback. Implementations synchronize internally and
/// every method takes `&self`.
pub trait RawQueue: Send + Sync {
    /// Drops cached handles and reloads from the backing store.
    fn reopen(&self) -> Result<()>;

    /// Bytes currently accounted to the queue, framing included.
    fn bytes(&self) -> Result<u64>;

    /// Live records.
    fn count(&self) -> Result<u64>;

    fn remaining_bytes(&self) -> Result<u64>;

    /// Estimated number of further records that fit. A hint only.
    fn remaining_count(&self) -> Result<u64>;

    fn clear(&self) -> Result<()>;

    /// Appends a record. `Ok(false)` means the record was not accepted.
    fn push(&self, data: &[u8]) -> Result<bool>;

    /// Moves the oldest record into `out`. `Ok(false)` when empty.
    fn pop(&self, out: &mut Buffer) -> Result<bool>;

    /// Copies the oldest record into `out` without removing it.
    fn peek(&self, out: &mut Buffer) -> Result<bool>;

    /// Reports that the last popped record could not be decoded.
    fn notify_failed_read(&self) -> Result<()> { Ok(()) }

    fn flush(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}
