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

//! [Indexing Tables] implementation of [HPACK].
//!
//! [Indexing Tables]: https://httpwg.org/specs/rfc7541.html#indexing.tables
//! [HPACK]: https://httpwg.org/specs/rfc7541.html
//!
//! Indices 1 to 61 address the static table; larger indices address the
//! dynamic table, newest entry first. Each dynamic entry accounts for the
//! length of its name, the length of its value and 32 overhead octets.

use std::collections::VecDeque;

/// A decoded header name: a pseudo-header or a regular field name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Header {
    Authority,
    Method,
    Path,
    Scheme,
    Status,
    Other(String),
}

impl Header {
    pub(crate) fn from_name(name: &str) -> Self {
        match name {
            ":authority" => Header::Authority,
            ":method" => Header::Method,
            ":path" => Header::Path,
            ":scheme" => Header::Scheme,
            ":status" => Header::Status,
            other => Header::Other(other.to_string()),
        }
    }

    pub(crate) fn as_name(&self) -> &str {
        match self {
            Header::Authority => ":authority",
            Header::Method => ":method",
            Header::Path => ":path",
            Header::Scheme => ":scheme",
            Header::Status => ":status",
            Header::Other(name) => name.as_str(),
        }
    }
}

/// The result of searching the tables for a `(name, value)` pair.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TableIndex {
    /// Both name and value matched at this index.
    Field(usize),
    /// Only the name matched at this index.
    FieldName(usize),
    None,
}

/// The static table of RFC 7541 Appendix A.
const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// The combined static and dynamic indexing table of one compression
/// direction.
pub(crate) struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    capacity: usize,
}

impl DynamicTable {
    /// Creates a table with the given capacity in octets.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            capacity,
        }
    }

    /// Current size of the dynamic table in octets.
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Maximum size of the dynamic table in octets.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, evicting entries as needed.
    pub(crate) fn update_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict();
    }

    /// Adds a header to the dynamic table, evicting old entries to make
    /// room. An entry larger than the whole capacity empties the table.
    pub(crate) fn add(&mut self, name: String, value: String) {
        self.size += entry_size(&name, &value);
        self.entries.push_front((name, value));
        self.evict();
    }

    /// Looks up an index across the static and dynamic tables. Indices are
    /// 1-based as on the wire.
    pub(crate) fn get(&self, index: usize) -> Option<(&str, &str)> {
        if index == 0 {
            return None;
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Some((name, value));
        }
        self.entries
            .get(index - STATIC_TABLE.len() - 1)
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Searches for the best index for a `(name, value)` pair, preferring
    /// a full match over a name-only match.
    pub(crate) fn search(&self, name: &str, value: &str) -> TableIndex {
        let mut name_index = None;
        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if *n == name {
                if *v == value {
                    return TableIndex::Field(i + 1);
                }
                if name_index.is_none() {
                    name_index = Some(i + 1);
                }
            }
        }
        for (i, (n, v)) in self.entries.iter().enumerate() {
            if n == name {
                if v == value {
                    return TableIndex::Field(STATIC_TABLE.len() + i + 1);
                }
                if name_index.is_none() {
                    name_index = Some(STATIC_TABLE.len() + i + 1);
                }
            }
        }
        match name_index {
            Some(index) => TableIndex::FieldName(index),
            None => TableIndex::None,
        }
    }

    fn evict(&mut self) {
        while self.size > self.capacity {
            match self.entries.pop_back() {
                Some((name, value)) => self.size -= entry_size(&name, &value),
                None => break,
            }
        }
    }
}

fn entry_size(name: &str, value: &str) -> usize {
    // RFC 7541 Section 4.1: 32 octets of per-entry overhead.
    name.len() + value.len() + 32
}

#[cfg(test)]
mod ut_table {
    use super::*;

    /// UT test cases for static table lookup via `DynamicTable::get`.
    ///
    /// # Brief
    /// 1. Looks up well-known static indices.
    /// 2. Checks index 0 and an out-of-range index return `None`.
    #[test]
    fn ut_table_static_get() {
        let table = DynamicTable::with_capacity(4096);
        assert_eq!(table.get(2), Some((":method", "GET")));
        assert_eq!(table.get(8), Some((":status", "200")));
        assert_eq!(table.get(61), Some(("www-authenticate", "")));
        assert_eq!(table.get(0), None);
        assert_eq!(table.get(62), None);
    }

    /// UT test cases for `DynamicTable::add` and dynamic lookup.
    ///
    /// # Brief
    /// 1. Adds two entries and checks that the newest entry has the
    ///    smallest dynamic index.
    /// 2. Checks the accounted size.
    #[test]
    fn ut_table_dynamic_add() {
        let mut table = DynamicTable::with_capacity(4096);
        table.add(String::from("grpc-status"), String::from("0"));
        table.add(String::from("grpc-encoding"), String::from("identity"));
        assert_eq!(table.get(62), Some(("grpc-encoding", "identity")));
        assert_eq!(table.get(63), Some(("grpc-status", "0")));
        assert_eq!(
            table.size(),
            "grpc-status0".len() + "grpc-encodingidentity".len() + 64
        );
    }

    /// UT test cases for eviction on `DynamicTable::update_capacity`.
    ///
    /// # Brief
    /// 1. Fills the table, then shrinks its capacity.
    /// 2. Checks that the oldest entry is evicted and the size shrinks.
    /// 3. Shrinks to zero and checks the table empties.
    #[test]
    fn ut_table_eviction() {
        let mut table = DynamicTable::with_capacity(100);
        table.add(String::from("a"), String::from("1"));
        table.add(String::from("b"), String::from("2"));
        assert_eq!(table.size(), 68);

        table.update_capacity(40);
        assert_eq!(table.get(62), Some(("b", "2")));
        assert_eq!(table.get(63), None);

        table.update_capacity(0);
        assert_eq!(table.size(), 0);
        assert_eq!(table.get(62), None);
    }

    /// UT test cases for `DynamicTable::search`.
    ///
    /// # Brief
    /// 1. Searches for a full static match, a name-only static match, a
    ///    dynamic match and a miss.
    /// 2. Checks each `TableIndex` result.
    #[test]
    fn ut_table_search() {
        let mut table = DynamicTable::with_capacity(4096);
        assert_eq!(table.search(":method", "POST"), TableIndex::Field(3));
        assert_eq!(
            table.search("content-type", "application/grpc"),
            TableIndex::FieldName(31)
        );
        assert_eq!(table.search("grpc-timeout", "1S"), TableIndex::None);

        table.add(String::from("grpc-timeout"), String::from("1S"));
        assert_eq!(table.search("grpc-timeout", "1S"), TableIndex::Field(62));
        assert_eq!(
            table.search("grpc-timeout", "2S"),
            TableIndex::FieldName(62)
        );
    }
}
