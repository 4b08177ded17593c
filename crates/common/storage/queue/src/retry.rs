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

//! Reopen-and-retry around storage operations.
//!
//! Any failure of a storage operation may mean the cached state no longer
//! matches the directory (files deleted underneath us, a torn write, a bad
//! frame). [`perform`] throws the cached view away, reloads it from disk and
//! tries once more. Cleanup helpers never fail: a broken close or delete is
//! logged and forgotten so shutdown always completes.

use std::{fs, io, path::Path};

use tracing::{error, warn};

use crate::Result;

/// Something that can drop its cached view and reload it from disk.
pub(crate) trait Reopen {
    fn reopen(&mut self) -> Result<()>;
}

/// Runs `op`, and on a retryable failure reopens `target` and runs it once
/// more. When the second attempt fails too, `target` is reopened again and
/// the second error is returned.
pub(crate) fn perform<S, T, F>(target: &mut S, mut op: F) -> Result<T>
where
    S: Reopen,
    F: FnMut(&mut S) -> Result<T>,
{
    let first = match op(target) {
        Ok(value) => return Ok(value),
        Err(e) if !e.is_retryable() => return Err(e),
        Err(e) => e,
    };

    warn!(error = %first, "Storage operation failed, reopening and retrying");
    target.reopen()?;

    match op(target) {
        Ok(value) => Ok(value),
        Err(second) => {
            if second.is_retryable() {
                if let Err(e) = target.reopen() {
                    error!(error = %e, "Failed to reopen storage after retry");
                }
            }
            Err(second)
        }
    }
}

/// Runs a close action, logging instead of returning its failure.
pub(crate) fn safe_close<F>(what: &str, close: F)
where
    F: FnOnce() -> Result<()>,
{
    if let Err(e) = close() {
        error!(what, error = %e, "Failed to close");
    }
}

/// Removes a file or directory tree, logging instead of returning failure.
///
/// A path that is already gone is not a failure.
pub(crate) fn safe_delete(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!(path = ?path, error = %e, "Failed to delete"),
    }
}
