// Copyright (c) 2023 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP field section implementation used for RPC metadata.
//!
//! `Headers` is an ordered multimap of field lines. Names are normalized
//! to lowercase when appended, which matches the HTTP/2 requirement that
//! field names are transmitted in lowercase.

use core::fmt;

/// Error returned when a field name or value contains an illegal byte.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct InvalidHeader;

impl fmt::Display for InvalidHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid header field")
    }
}

impl std::error::Error for InvalidHeader {}

/// An ordered multimap of header field lines.
///
/// # Examples
///
/// ```
/// use ylong_grpc::headers::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("User-Agent", "example").unwrap();
/// assert_eq!(headers.get("user-agent"), Some("example"));
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty `Headers`.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the number of field lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no field line is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a field line. The name is validated as an HTTP token and
    /// normalized to lowercase; the value must not contain CR, LF or NUL.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), InvalidHeader> {
        if !is_valid_name(name.as_bytes()) || !is_valid_value(value.as_bytes()) {
            return Err(InvalidHeader);
        }
        self.entries.push((name.to_ascii_lowercase(), value.to_string()));
        Ok(())
    }

    /// Appends a field line that is already known to be well formed, such
    /// as one produced by the HPACK decoder.
    pub(crate) fn append_raw(&mut self, name: String, value: String) {
        self.entries.push((name, value));
    }

    /// Gets the first value of the field with the given name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns all values of the field with the given name in insertion
    /// order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes every field line with the given name, returning the first
    /// removed value if any line was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let mut removed = None;
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].0.eq_ignore_ascii_case(name) {
                let (_, value) = self.entries.remove(i);
                if removed.is_none() {
                    removed = Some(value);
                }
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Iterates over all `(name, value)` field lines in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(n, v)| (n, v)))
            .finish()
    }
}

fn is_valid_name(name: &[u8]) -> bool {
    // Field names are HTTP tokens, RFC 9110 Section 5.6.2.
    const TOKEN_EXTRA: &[u8] = b"!#$%&'*+-.^_`|~";
    !name.is_empty()
        && name
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || TOKEN_EXTRA.contains(b))
}

fn is_valid_value(value: &[u8]) -> bool {
    value.iter().all(|b| *b != b'\r' && *b != b'\n' && *b != 0)
}
