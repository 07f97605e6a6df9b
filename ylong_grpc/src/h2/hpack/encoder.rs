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

//! HPACK encoder implementation.
//!
//! Serializes [`Parts`] into one header block. The encoder owns the
//! outbound dynamic table of the connection, so one instance must encode
//! every header block of the connection in order. Pseudo-headers are
//! emitted before regular fields as RFC 7540 requires.

use crate::h2::hpack::integer::encode_integer;
use crate::h2::hpack::table::{DynamicTable, TableIndex};
use crate::h2::Parts;
use crate::huffman::{huffman_encode, huffman_encoded_len};

const INDEXED_FLAG: u8 = 0x80;
const LITERAL_WITH_INDEXING_FLAG: u8 = 0x40;
const TABLE_SIZE_UPDATE_FLAG: u8 = 0x20;
const HUFFMAN_FLAG: u8 = 0x80;

/// HPACK header block encoder holding the outbound dynamic table.
pub(crate) struct HpackEncoder {
    table: DynamicTable,
    use_huffman: bool,
    // A pending dynamic table resize to announce in the next block.
    pending_size_update: Option<usize>,
}

impl HpackEncoder {
    pub(crate) fn new(table_size: usize, use_huffman: bool) -> Self {
        Self {
            table: DynamicTable::with_capacity(table_size),
            use_huffman,
            pending_size_update: None,
        }
    }

    /// Schedules a dynamic table resize, as allowed by the peer's
    /// SETTINGS_HEADER_TABLE_SIZE.
    pub(crate) fn update_table_size(&mut self, size: usize) {
        self.pending_size_update = Some(size);
    }

    /// Encodes `parts` into a complete header block.
    pub(crate) fn encode(&mut self, parts: &Parts) -> Vec<u8> {
        let mut dst = Vec::new();
        if let Some(size) = self.pending_size_update.take() {
            self.table.update_capacity(size);
            encode_integer(size, 0x1f, TABLE_SIZE_UPDATE_FLAG, &mut dst);
        }

        let (pseudo, fields) = parts.parts();
        if let Some(method) = pseudo.method() {
            self.encode_field(":method", method, &mut dst);
        }
        if let Some(scheme) = pseudo.scheme() {
            self.encode_field(":scheme", scheme, &mut dst);
        }
        if let Some(path) = pseudo.path() {
            self.encode_field(":path", path, &mut dst);
        }
        if let Some(authority) = pseudo.authority() {
            self.encode_field(":authority", authority, &mut dst);
        }
        if let Some(status) = pseudo.status() {
            self.encode_field(":status", status, &mut dst);
        }
        for (name, value) in fields.iter() {
            self.encode_field(name, value, &mut dst);
        }
        dst
    }

    fn encode_field(&mut self, name: &str, value: &str, dst: &mut Vec<u8>) {
        match self.table.search(name, value) {
            TableIndex::Field(index) => {
                encode_integer(index, 0x7f, INDEXED_FLAG, dst);
            }
            TableIndex::FieldName(index) => {
                encode_integer(index, 0x3f, LITERAL_WITH_INDEXING_FLAG, dst);
                self.encode_string(value, dst);
                self.table.add(name.to_string(), value.to_string());
            }
            TableIndex::None => {
                dst.push(LITERAL_WITH_INDEXING_FLAG);
                self.encode_string(name, dst);
                self.encode_string(value, dst);
                self.table.add(name.to_string(), value.to_string());
            }
        }
    }

    fn encode_string(&self, src: &str, dst: &mut Vec<u8>) {
        let raw = src.as_bytes();
        if self.use_huffman {
            let coded_len = huffman_encoded_len(raw);
            if coded_len < raw.len() {
                encode_integer(coded_len, 0x7f, HUFFMAN_FLAG, dst);
                huffman_encode(raw, dst);
                return;
            }
        }
        encode_integer(raw.len(), 0x7f, 0x00, dst);
        dst.extend_from_slice(raw);
    }
}
