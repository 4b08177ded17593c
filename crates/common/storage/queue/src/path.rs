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

use std::path::{Path, PathBuf};

use crate::Result;

/// Name of the durable state file inside a queue directory.
pub const STATE_FILE_NAME: &str = "state";

const DATA_FILE_PREFIX: &str = "data";
const CORRUPTED_SUFFIX: &str = "corrupted";

/// Generates a data file name: `dataNN` with `NN` the hex slot number.
pub fn data_file_name(slot: u16) -> String { format!("{DATA_FILE_PREFIX}{slot:02x}") }

/// Returns full path to a data file: `base/dataNN`.
pub fn data_file_path<P: AsRef<Path>>(base: P, slot: u16) -> PathBuf {
    base.as_ref().join(data_file_name(slot))
}

/// Returns full path to the state file: `base/state`.
pub fn state_file_path<P: AsRef<Path>>(base: P) -> PathBuf { base.as_ref().join(STATE_FILE_NAME) }

/// Returns the quarantine path for a data file:
/// `base/dataNN.<unix-millis>.corrupted`.
pub fn corrupted_file_path<P: AsRef<Path>>(base: P, slot: u16, timestamp_millis: i64) -> PathBuf {
    base.as_ref()
        .join(format!("{}.{timestamp_millis}.{CORRUPTED_SUFFIX}", data_file_name(slot)))
}

/// Lists quarantined files in `base`, sorted by name.
pub fn scan_corrupted_files<P: AsRef<Path>>(base: P) -> Result<Vec<PathBuf>> {
    let base = base.as_ref();
    let mut files = Vec::new();
    if !base.exists() {
        return Ok(files);
    }

    for entry in std::fs::read_dir(base)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(CORRUPTED_SUFFIX) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
