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

//! CRC32 checksum over the durable state record.
//!
//! The state file is rewritten in place on every flush, so a crash can leave
//! a torn record of the right length. The trailing checksum lets the loader
//! tell a torn record from a valid one.

use crc32fast::Hasher;

/// Calculates the CRC32 of a state record body.
#[inline]
pub(crate) fn calculate_state_crc(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

/// Verifies a state record body against its stored checksum.
#[inline]
pub(crate) fn verify_state_crc(body: &[u8], expected: u32) -> bool {
    calculate_state_crc(body) == expected
}
