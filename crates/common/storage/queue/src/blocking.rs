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

//! Blocking, pausable front for a primary queue and an optional fallback.
//!
//! Pushes go to the primary queue. Only when the primary *fails* does a
//! record go to the fallback; a primary that is simply full rejects the
//! record. Pops drain the fallback before touching the primary.
//!
//! Blocking calls wait on condition variables in slices of at most
//! [`MAX_WAIT`], re-checking pause flags and the queue itself after every
//! wakeup. Closing the queue wakes every waiter, which then returns
//! [`QueueError::Closed`](crate::QueueError::Closed).

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use snafu::ensure;
use tracing::{debug, warn};

use crate::{Buffer, MemoryRing, RawQueue, Result, error::ClosedSnafu};

/// Longest single wait before a blocked call re-checks the queue.
pub const MAX_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct Flags {
    pop_paused:           bool,
    push_paused:          bool,
    closed:               bool,
    /// Whether the last record popped came from the fallback.
    popped_from_fallback: bool,
}

pub struct BoundedBlockingQueue<Q, F = MemoryRing> {
    queue:     Q,
    fallback:  Option<F>,
    flags:     Mutex<Flags>,
    not_empty: Condvar,
    not_full:  Condvar,
}

impl<Q: RawQueue, F: RawQueue> BoundedBlockingQueue<Q, F> {
    pub fn new(queue: Q, fallback: Option<F>) -> Self {
        Self {
            queue,
            fallback,
            flags: Mutex::new(Flags::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// The primary queue.
    pub const fn queue(&self) -> &Q { &self.queue }

    pub const fn fallback(&self) -> Option<&F> { self.fallback.as_ref() }

    pub fn set_pop_paused(&self, paused: bool) {
        self.flags.lock().pop_paused = paused;
        debug!(paused, "Pop paused flag changed");
        self.notify_all();
    }

    pub fn set_push_paused(&self, paused: bool) {
        self.flags.lock().push_paused = paused;
        debug!(paused, "Push paused flag changed");
        self.notify_all();
    }

    pub fn is_pop_paused(&self) -> bool { self.flags.lock().pop_paused }

    pub fn is_push_paused(&self) -> bool { self.flags.lock().push_paused }

    pub fn reopen(&self) -> Result<()> {
        let _flags = self.open_flags()?;
        self.queue.reopen()?;
        if let Some(fallback) = &self.fallback {
            fallback.reopen()?;
        }
        Ok(())
    }

    /// Bytes held by the primary queue and the fallback together.
    pub fn bytes(&self) -> Result<u64> { Ok(self.queue.bytes()? + self.fallback_value(F::bytes)?) }

    /// Records held by the primary queue and the fallback together.
    pub fn count(&self) -> Result<u64> { Ok(self.queue.count()? + self.fallback_value(F::count)?) }

    pub fn remaining_bytes(&self) -> Result<u64> { self.queue.remaining_bytes() }

    pub fn remaining_count(&self) -> Result<u64> { self.queue.remaining_count() }

    pub fn clear(&self) -> Result<()> {
        let _flags = self.open_flags()?;
        self.queue.clear()?;
        if let Some(fallback) = &self.fallback {
            fallback.clear()?;
        }
        self.not_full.notify_all();
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.queue.flush()?;
        if let Some(fallback) = &self.fallback {
            fallback.flush()?;
        }
        Ok(())
    }

    /// Reports that the last popped record could not be decoded to the queue
    /// that served it.
    pub fn notify_failed_read(&self) -> Result<()> {
        let from_fallback = self.flags.lock().popped_from_fallback;
        match &self.fallback {
            Some(fallback) if from_fallback => fallback.notify_failed_read(),
            _ => self.queue.notify_failed_read(),
        }
    }

    /// Appends a record without waiting.
    ///
    /// `Ok(false)` when pushing is paused or the primary queue rejects it.
    pub fn push(&self, data: &[u8]) -> Result<bool> {
        let flags = self.flags.lock();
        self.try_push(&flags, data)
    }

    /// Removes the oldest record without waiting. `Ok(false)` when paused or
    /// empty.
    pub fn pop(&self, out: &mut Buffer) -> Result<bool> {
        let mut flags = self.flags.lock();
        self.try_pop(&mut flags, out)
    }

    pub fn peek(&self, out: &mut Buffer) -> Result<bool> {
        let flags = self.flags.lock();
        ensure!(!flags.closed, ClosedSnafu);
        if flags.pop_paused {
            return Ok(false);
        }
        if let Some(fallback) = &self.fallback {
            if fallback.peek(out)? {
                return Ok(true);
            }
        }
        self.queue.peek(out)
    }

    /// Waits until a record can be popped.
    ///
    /// With a `timeout`, returns `Ok(false)` once it expires; without one,
    /// waits until a record arrives or the queue is closed.
    pub fn blocking_pop(&self, out: &mut Buffer, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut flags = self.flags.lock();
        loop {
            if self.try_pop(&mut flags, out)? {
                return Ok(true);
            }
            let Some(wait) = next_wait(deadline) else {
                return Ok(false);
            };
            self.not_empty.wait_for(&mut flags, wait);
        }
    }

    /// Waits until the record is accepted. See [`blocking_pop`](Self::blocking_pop).
    pub fn blocking_push(&self, data: &[u8], timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut flags = self.flags.lock();
        loop {
            if self.try_push(&flags, data)? {
                return Ok(true);
            }
            let Some(wait) = next_wait(deadline) else {
                return Ok(false);
            };
            self.not_full.wait_for(&mut flags, wait);
        }
    }

    /// Closes both queues. Blocked callers wake up and fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        {
            let mut flags = self.flags.lock();
            if flags.closed {
                return Ok(());
            }
            flags.closed = true;
        }
        self.notify_all();

        self.queue.close()?;
        if let Some(fallback) = &self.fallback {
            fallback.close()?;
        }
        Ok(())
    }

    fn try_push(&self, flags: &MutexGuard<'_, Flags>, data: &[u8]) -> Result<bool> {
        ensure!(!flags.closed, ClosedSnafu);
        if flags.push_paused {
            return Ok(false);
        }

        let pushed = match self.queue.push(data) {
            Ok(pushed) => pushed,
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    warn!(error = %e, "Primary queue failed, pushing to the memory fallback");
                    fallback.push(data)?
                }
                None => return Err(e),
            },
        };

        if pushed {
            self.not_empty.notify_all();
        }
        Ok(pushed)
    }

    fn try_pop(&self, flags: &mut MutexGuard<'_, Flags>, out: &mut Buffer) -> Result<bool> {
        ensure!(!flags.closed, ClosedSnafu);
        if flags.pop_paused {
            return Ok(false);
        }

        if let Some(fallback) = &self.fallback {
            if fallback.pop(out)? {
                flags.popped_from_fallback = true;
                self.not_full.notify_all();
                return Ok(true);
            }
        }
        if !self.queue.pop(out)? {
            return Ok(false);
        }
        flags.popped_from_fallback = false;
        self.not_full.notify_all();
        Ok(true)
    }

    fn open_flags(&self) -> Result<MutexGuard<'_, Flags>> {
        let flags = self.flags.lock();
        ensure!(!flags.closed, ClosedSnafu);
        Ok(flags)
    }

    fn fallback_value(&self, value: fn(&F) -> Result<u64>) -> Result<u64> {
        self.fallback.as_ref().map_or(Ok(0), value)
    }

    fn notify_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

fn next_wait(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(MAX_WAIT),
        Some(deadline) => {
            let left = deadline.checked_duration_since(Instant::now())?;
            (!left.is_zero()).then(|| left.min(MAX_WAIT))
        }
    }
}
