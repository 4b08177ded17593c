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

//! Reusable record buffer.
//!
//! Every push and pop moves bytes through a [`Buffer`]. The buffer keeps its
//! allocation across [`clear`](Buffer::clear) and [`resize`](Buffer::resize)
//! calls, so a buffer that has seen the largest record once never allocates
//! again. Growth is capped by a per-buffer maximum.

use std::io;

use bytes::{Bytes, BytesMut};
use snafu::ensure;

use crate::{Result, error::BufferOverflowSnafu};

/// Initial capacity used by [`Buffer::new`].
pub const DEFAULT_INITIAL_CAPACITY: usize = 32;

/// A growable byte buffer with a hard upper bound on its length.
#[derive(Debug, Clone)]
pub struct Buffer {
    buf:          BytesMut,
    max_capacity: usize,
}

impl Default for Buffer {
    fn default() -> Self { Self::new() }
}

impl Buffer {
    /// Unbounded buffer with a small initial allocation.
    #[must_use]
    pub fn new() -> Self { Self::with_capacity(DEFAULT_INITIAL_CAPACITY, usize::MAX) }

    /// Buffer that may grow up to `max_capacity` bytes.
    #[must_use]
    pub fn with_capacity(initial_capacity: usize, max_capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(initial_capacity.min(max_capacity)),
            max_capacity,
        }
    }

    /// Unbounded buffer holding a copy of `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(data.len());
        buf.extend_from_slice(data);
        Self {
            buf,
            max_capacity: usize::MAX,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Bytes currently allocated.
    #[must_use]
    pub fn capacity(&self) -> usize { self.buf.capacity() }

    #[must_use]
    pub const fn max_capacity(&self) -> usize { self.max_capacity }

    /// Drops the contents, keeping the allocation.
    pub fn clear(&mut self) { self.buf.clear(); }

    /// Sets the length to `len`, zero-filling any new bytes.
    ///
    /// Fails without touching the contents when `len` exceeds the maximum.
    pub fn resize(&mut self, len: usize) -> Result<()> {
        ensure!(
            len <= self.max_capacity,
            BufferOverflowSnafu {
                attempted: len,
                max:       self.max_capacity,
            }
        );
        self.buf.resize(len, 0);
        Ok(())
    }

    /// Appends `data` after the current contents.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> Result<()> {
        let attempted = self.buf.len().saturating_add(data.len());
        ensure!(
            attempted <= self.max_capacity,
            BufferOverflowSnafu {
                attempted,
                max: self.max_capacity,
            }
        );
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Replaces the contents with `data`.
    pub fn set(&mut self, data: &[u8]) -> Result<()> {
        self.clear();
        self.extend_from_slice(data)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    pub fn as_mut_slice(&mut self) -> &mut [u8] { &mut self.buf }

    /// Copies the contents into an owned [`Bytes`].
    #[must_use]
    pub fn to_bytes(&self) -> Bytes { Bytes::copy_from_slice(&self.buf) }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] { &self.buf }
}

impl io::Write for Buffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(data)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e.to_string()))?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::QueueError;

    #[test]
    fn test_clear_keeps_allocation() {
        let mut buffer = Buffer::with_capacity(16, 1024);
        buffer.set(&[7u8; 200]).unwrap();
        let capacity = buffer.capacity();
        assert!(capacity >= 200);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), capacity);

        buffer.resize(150).unwrap();
        assert_eq!(buffer.len(), 150);
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn test_growth_past_max_fails() {
        let mut buffer = Buffer::with_capacity(4, 8);
        buffer.set(b"12345678").unwrap();

        let err = buffer.extend_from_slice(b"9").unwrap_err();
        assert!(matches!(
            err,
            QueueError::BufferOverflow {
                attempted: 9,
                max:       8,
            }
        ));
        assert_eq!(buffer.as_slice(), b"12345678");

        assert!(buffer.resize(9).is_err());
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_io_write() {
        let mut buffer = Buffer::with_capacity(4, 6);
        buffer.write_all(b"abc").unwrap();
        buffer.write_all(b"def").unwrap();
        assert_eq!(buffer.as_slice(), b"abcdef");

        let err = buffer.write_all(b"g").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_to_bytes_copies() {
        let mut buffer = Buffer::from_slice(b"payload");
        let bytes = buffer.to_bytes();
        buffer.clear();
        assert_eq!(&bytes[..], b"payload");
    }
}
