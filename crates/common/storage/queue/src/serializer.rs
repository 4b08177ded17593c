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

use bytes::Bytes;

use crate::{Buffer, Result, error::SerializationSnafu};

/// Converts values to and from record payloads.
///
/// Each pooled scratch slot owns its own instance, so implementations may
/// keep mutable state between calls.
pub trait Serializer<T>: Send {
    /// Writes `value` into `buffer`, replacing its contents.
    fn serialize(&mut self, buffer: &mut Buffer, value: &T) -> Result<()>;

    fn deserialize(&mut self, buffer: &Buffer) -> Result<T>;
}

/// Passes payload bytes through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesSerializer;

impl Serializer<Bytes> for BytesSerializer {
    fn serialize(&mut self, buffer: &mut Buffer, value: &Bytes) -> Result<()> { buffer.set(value) }

    fn deserialize(&mut self, buffer: &Buffer) -> Result<Bytes> { Ok(buffer.to_bytes()) }
}

/// UTF-8 text payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn serialize(&mut self, buffer: &mut Buffer, value: &String) -> Result<()> {
        buffer.set(value.as_bytes())
    }

    fn deserialize(&mut self, buffer: &Buffer) -> Result<String> {
        std::str::from_utf8(buffer.as_slice())
            .map(ToOwned::to_owned)
            .map_err(|e| {
                SerializationSnafu {
                    message: format!("payload is not valid UTF-8: {e}"),
                }
                .build()
            })
    }
}
