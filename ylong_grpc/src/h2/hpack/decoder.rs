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

//! HPACK decoder implementation.
//!
//! Decodes a complete header block (HEADERS plus any CONTINUATION
//! fragments, reassembled by the frame decoder) into [`Parts`]. The
//! decoder owns the inbound dynamic table of the connection, so one
//! instance must be fed every header block of the connection in order.

use crate::h2::error::ErrorCode;
use crate::h2::hpack::integer::decode_integer;
use crate::h2::hpack::table::{DynamicTable, Header};
use crate::h2::{H2Error, Parts};
use crate::huffman::huffman_decode;

// Mask bits of the representation prefixes, RFC 7541 Section 6.
const INDEXED_MASK: u8 = 0x80;
const LITERAL_WITH_INDEXING_MASK: u8 = 0x40;
const TABLE_SIZE_UPDATE_MASK: u8 = 0x20;
const HUFFMAN_MASK: u8 = 0x80;

/// HPACK header block decoder holding the inbound dynamic table.
pub(crate) struct HpackDecoder {
    table: DynamicTable,
    // Upper bound for the dynamic table size the peer may select.
    max_table_size: usize,
    max_header_list_size: usize,
}

impl HpackDecoder {
    pub(crate) fn new(max_table_size: usize, max_header_list_size: usize) -> Self {
        Self {
            table: DynamicTable::with_capacity(max_table_size),
            max_table_size,
            max_header_list_size,
        }
    }

    pub(crate) fn set_max_header_list_size(&mut self, size: usize) {
        self.max_header_list_size = size;
    }

    /// Updates the ceiling for dynamic table size updates, as advertised
    /// by a local SETTINGS_HEADER_TABLE_SIZE that the peer acknowledged.
    pub(crate) fn set_max_table_size(&mut self, size: usize) {
        self.max_table_size = size;
        if self.table.capacity() > size {
            self.table.update_capacity(size);
        }
    }

    /// Decodes one complete header block into `Parts`.
    pub(crate) fn decode(&mut self, block: &[u8]) -> Result<Parts, H2Error> {
        let mut parts = Parts::new();
        let mut pos = 0;
        let mut list_size = 0usize;
        let mut seen_regular = false;

        while pos < block.len() {
            let first = block[pos];
            let (name, value) = if first & INDEXED_MASK != 0 {
                self.decode_indexed(block, &mut pos)?
            } else if first & LITERAL_WITH_INDEXING_MASK != 0 {
                let (name, value) = self.decode_literal(block, &mut pos, 0x3f)?;
                self.table.add(name.clone(), value.clone());
                (name, value)
            } else if first & TABLE_SIZE_UPDATE_MASK != 0 {
                let size = decode_integer(block, &mut pos, 0x1f)?;
                if size > self.max_table_size {
                    return Err(H2Error::ConnectionError(ErrorCode::CompressionError));
                }
                self.table.update_capacity(size);
                continue;
            } else {
                // Literal without indexing (0x00) and never indexed (0x10)
                // decode identically; neither touches the table.
                self.decode_literal(block, &mut pos, 0x0f)?
            };

            // RFC 7540 Section 8.1.2.1: pseudo-headers precede regular
            // fields.
            if name.starts_with(':') {
                if seen_regular {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
            } else {
                seen_regular = true;
            }

            list_size += name.len() + value.len() + 32;
            if list_size > self.max_header_list_size {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            parts.update(Header::from_name(&name), value);
        }
        Ok(parts)
    }

    fn decode_indexed(&self, block: &[u8], pos: &mut usize) -> Result<(String, String), H2Error> {
        let index = decode_integer(block, pos, 0x7f)?;
        match self.table.get(index) {
            Some((name, value)) => Ok((name.to_string(), value.to_string())),
            None => Err(H2Error::ConnectionError(ErrorCode::CompressionError)),
        }
    }

    fn decode_literal(
        &mut self,
        block: &[u8],
        pos: &mut usize,
        name_mask: u8,
    ) -> Result<(String, String), H2Error> {
        let name_index = decode_integer(block, pos, name_mask)?;
        let name = if name_index == 0 {
            self.decode_string(block, pos)?
        } else {
            match self.table.get(name_index) {
                Some((name, _)) => name.to_string(),
                None => return Err(H2Error::ConnectionError(ErrorCode::CompressionError)),
            }
        };
        let value = self.decode_string(block, pos)?;
        Ok((name, value))
    }

    fn decode_string(&self, block: &[u8], pos: &mut usize) -> Result<String, H2Error> {
        let compression_error = H2Error::ConnectionError(ErrorCode::CompressionError);
        let huffman = block
            .get(*pos)
            .map(|b| b & HUFFMAN_MASK != 0)
            .ok_or(compression_error)?;
        let len = decode_integer(block, pos, 0x7f)?;
        let end = pos.checked_add(len).ok_or(compression_error)?;
        let octets = block.get(*pos..end).ok_or(compression_error)?;
        *pos = end;
        let bytes = if huffman {
            huffman_decode(octets).ok_or(compression_error)?
        } else {
            octets.to_vec()
        };
        String::from_utf8(bytes).map_err(|_| compression_error)
    }
}

#[cfg(test)]
mod ut_hpack_decoder {
    use super::*;

    fn decoder() -> HpackDecoder {
        HpackDecoder::new(4096, 16 << 10)
    }

    /// UT test cases for `HpackDecoder::decode` on the RFC 7541 C.3
    /// request examples (without Huffman coding).
    ///
    /// # Brief
    /// 1. Decodes the first and second request of C.3 with one decoder.
    /// 2. Checks pseudo-headers, regular fields and dynamic-table reuse
    ///    across blocks.
    #[test]
    fn ut_hpack_decode_rfc_c3() {
        let mut decoder = decoder();

        // C.3.1 First request.
        let block = [
            0x82, 0x86, 0x84, 0x41, 0x0f, 0x77, 0x77, 0x77, 0x2e, 0x65, 0x78, 0x61, 0x6d, 0x70,
            0x6c, 0x65, 0x2e, 0x63, 0x6f, 0x6d,
        ];
        let parts = decoder.decode(&block).unwrap();
        let (pseudo, fields) = parts.parts();
        assert_eq!(pseudo.method(), Some("GET"));
        assert_eq!(pseudo.scheme(), Some("http"));
        assert_eq!(pseudo.path(), Some("/"));
        assert_eq!(pseudo.authority(), Some("www.example.com"));
        assert!(fields.is_empty());

        // C.3.2 Second request reuses the dynamic entry for :authority.
        let block = [
            0x82, 0x86, 0x84, 0xbe, 0x58, 0x08, 0x6e, 0x6f, 0x2d, 0x63, 0x61, 0x63, 0x68, 0x65,
        ];
        let parts = decoder.decode(&block).unwrap();
        let (pseudo, fields) = parts.parts();
        assert_eq!(pseudo.authority(), Some("www.example.com"));
        assert_eq!(fields.get("cache-control"), Some("no-cache"));
    }

    /// UT test cases for `HpackDecoder::decode` with Huffman-coded
    /// strings (RFC 7541 C.4.1).
    ///
    /// # Brief
    /// 1. Decodes the Huffman-coded first request of C.4.
    /// 2. Checks the decoded authority.
    #[test]
    fn ut_hpack_decode_huffman() {
        let mut decoder = decoder();
        let block = [
            0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab,
            0x90, 0xf4, 0xff,
        ];
        let parts = decoder.decode(&block).unwrap();
        let (pseudo, _) = parts.parts();
        assert_eq!(pseudo.authority(), Some("www.example.com"));
    }

    /// UT test cases for decode errors.
    ///
    /// # Brief
    /// 1. Decodes an out-of-range index and a too-large table size update.
    /// 2. Decodes a block that exceeds the header list limit.
    /// 3. Checks that each fails with the expected error.
    #[test]
    fn ut_hpack_decode_errors() {
        let mut decoder = decoder();
        assert_eq!(
            decoder.decode(&[0xff, 0x80, 0x7f]),
            Err(H2Error::ConnectionError(ErrorCode::CompressionError))
        );

        // Table size update above SETTINGS_HEADER_TABLE_SIZE.
        let mut block = vec![0x3f];
        // 4096 ceiling, request 5000: 5000 - 31 = 4969 continues.
        block.extend_from_slice(&[0xe9, 0x26]);
        assert_eq!(
            decoder.decode(&block),
            Err(H2Error::ConnectionError(ErrorCode::CompressionError))
        );

        let mut decoder = HpackDecoder::new(4096, 40);
        let block = [
            0x40, 0x0a, 0x6c, 0x6f, 0x6e, 0x67, 0x2d, 0x66, 0x69, 0x65, 0x6c, 0x64, 0x05, 0x76,
            0x61, 0x6c, 0x75, 0x65,
        ];
        assert_eq!(
            decoder.decode(&block),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test cases for pseudo-header ordering.
    ///
    /// # Brief
    /// 1. Decodes a block where a pseudo-header follows a regular field.
    /// 2. Checks that it is rejected as a protocol error.
    #[test]
    fn ut_hpack_decode_pseudo_after_regular() {
        let mut decoder = decoder();
        // cache-control: no-cache (indexed name 24), then :method: GET.
        let block = [
            0x0f, 0x09, 0x08, 0x6e, 0x6f, 0x2d, 0x63, 0x61, 0x63, 0x68, 0x65, 0x82,
        ];
        assert_eq!(
            decoder.decode(&block),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }
}
