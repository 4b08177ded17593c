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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[snafu(context(false), display("IO error: {source}"))]
    Io { source: io::Error },

    /// The queue was closed before or while the call was made.
    #[snafu(display("This queue is already closed"))]
    Closed,

    /// A frame could not be decoded from a data file.
    #[snafu(display("Corrupted record in {} at offset {position}: {reason}", path.display()))]
    CorruptedRecord {
        path:     PathBuf,
        position: u64,
        reason:   String,
    },

    /// A buffer would have to grow past its configured maximum.
    #[snafu(display("Buffer overflowed: attempted {attempted} bytes, maximum is {max}"))]
    BufferOverflow { attempted: usize, max: usize },

    /// A payload codec failed.
    #[snafu(display("Serialization failed: {message}"))]
    Serialization { message: String },

    /// Internal invariant violation.
    #[snafu(display("Internal error: {message}"))]
    Internal { message: String },
}

impl QueueError {
    /// Whether reopening the storage and retrying could make the call
    /// succeed. Using a closed queue is a caller bug and is never retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool { !matches!(self, Self::Closed) }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        fn fails() -> Result<()> {
            Err(io::Error::other("disk gone"))?;
            Ok(())
        }

        let err = fails().unwrap_err();
        assert!(matches!(err, QueueError::Io { .. }));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_closed_is_not_retryable() {
        assert!(!QueueError::Closed.is_retryable());
        assert!(QueueError::Closed.to_string().contains("closed"));
    }

    #[test]
    fn test_buffer_overflow_reports_sizes() {
        let err = BufferOverflowSnafu {
            attempted: 100usize,
            max:       64usize,
        }
        .build();
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("64"));
    }
}
