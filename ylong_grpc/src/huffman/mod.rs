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

//! [Huffman coding] implementation of the HTTP/2 protocol.
//!
//! [Huffman coding]: https://www.rfc-editor.org/rfc/rfc7541.html#string.literal.representation
//!
//! RFC 7541 Appendix B defines a canonical Huffman code generated from
//! statistics obtained on a large sample of HTTP headers. String literals
//! in HPACK may be transmitted either as raw octets or as this Huffman
//! code; a decoder has to support both forms.

use std::sync::OnceLock;

/// `(code, bit length)` for each of the 256 octets. The EOS symbol is
/// only ever used as padding and is handled separately.
#[rustfmt::skip]
const HUFFMAN_TABLE: [(u32, u8); 256] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
];

/// Converts a byte string to its Huffman code, appending the result to
/// `dst`. The last octet is padded with the most significant bits of the
/// EOS symbol (all ones).
pub(crate) fn huffman_encode(src: &[u8], dst: &mut Vec<u8>) {
    let mut state = 0u64;
    let mut unfilled = 64u32;

    for byte in src.iter() {
        let (code, nbits) = HUFFMAN_TABLE[*byte as usize];
        let nbits = nbits as u32;
        if unfilled < nbits {
            // Flush whole octets so the next code always fits.
            while unfilled <= 56 {
                dst.push((state >> 56) as u8);
                state <<= 8;
                unfilled += 8;
            }
        }
        state |= (code as u64) << (unfilled - nbits);
        unfilled -= nbits;
    }
    while unfilled < 64 {
        if unfilled > 56 {
            // Pad the final partial octet with ones (EOS prefix).
            let pad = (1u64 << (unfilled - 56)) - 1;
            dst.push(((state >> 56) | pad) as u8);
            break;
        }
        dst.push((state >> 56) as u8);
        state <<= 8;
        unfilled += 8;
    }
}

/// Returns the exact number of octets `huffman_encode` would produce.
pub(crate) fn huffman_encoded_len(src: &[u8]) -> usize {
    let bits: usize = src
        .iter()
        .map(|byte| HUFFMAN_TABLE[*byte as usize].1 as usize)
        .sum();
    (bits + 7) / 8
}

// A binary decode tree flattened into an array. Node 0 is the root; leaf
// nodes store the decoded symbol.
struct Node {
    children: [u16; 2],
    symbol: Option<u8>,
}

fn decode_tree() -> &'static Vec<Node> {
    static TREE: OnceLock<Vec<Node>> = OnceLock::new();
    TREE.get_or_init(|| {
        let mut nodes = vec![Node {
            children: [0, 0],
            symbol: None,
        }];
        for (symbol, (code, nbits)) in HUFFMAN_TABLE.iter().enumerate() {
            let mut current = 0usize;
            for i in (0..*nbits).rev() {
                let bit = ((code >> i) & 1) as usize;
                if nodes[current].children[bit] == 0 {
                    nodes.push(Node {
                        children: [0, 0],
                        symbol: None,
                    });
                    let index = (nodes.len() - 1) as u16;
                    nodes[current].children[bit] = index;
                }
                current = nodes[current].children[bit] as usize;
            }
            nodes[current].symbol = Some(symbol as u8);
        }
        nodes
    })
}

/// Decodes a Huffman-coded byte string. Returns `None` on a malformed
/// coding: a symbol spanning past the end, padding longer than 7 bits, or
/// padding that is not the EOS prefix (not all ones).
pub(crate) fn huffman_decode(src: &[u8]) -> Option<Vec<u8>> {
    let tree = decode_tree();
    let mut output = Vec::with_capacity(src.len() * 8 / 5);
    let mut current = 0usize;
    let mut padding = 0u32;
    let mut padding_ones = true;

    for byte in src.iter() {
        for i in (0..8).rev() {
            let bit = ((byte >> i) & 1) as usize;
            let next = tree[current].children[bit];
            if next == 0 {
                return None;
            }
            current = next as usize;
            padding += 1;
            padding_ones &= bit == 1;
            if let Some(symbol) = tree[current].symbol {
                output.push(symbol);
                current = 0;
                padding = 0;
                padding_ones = true;
            }
        }
    }
    // Unfinished bits must be a prefix of EOS and shorter than one octet.
    if padding >= 8 || !padding_ones {
        return None;
    }
    Some(output)
}

#[cfg(test)]
mod ut_huffman {
    use super::*;

    /// UT test cases for `huffman_encode`.
    ///
    /// # Brief
    /// 1. Encodes the string literals of RFC 7541 Appendix C.4 and C.6.
    /// 2. Checks the produced octets and `huffman_encoded_len`.
    #[test]
    fn ut_huffman_encode() {
        let mut dst = Vec::new();
        huffman_encode(b"www.example.com", &mut dst);
        assert_eq!(
            dst,
            [0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]
        );
        assert_eq!(huffman_encoded_len(b"www.example.com"), 12);

        let mut dst = Vec::new();
        huffman_encode(b"no-cache", &mut dst);
        assert_eq!(dst, [0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf]);

        let mut dst = Vec::new();
        huffman_encode(b"private", &mut dst);
        assert_eq!(dst, [0xae, 0xc3, 0x77, 0x1a, 0x4b]);
    }

    /// UT test cases for `huffman_decode`.
    ///
    /// # Brief
    /// 1. Decodes known codings back to their source strings.
    /// 2. Round-trips all byte values.
    /// 3. Checks that over-long padding is rejected.
    #[test]
    fn ut_huffman_decode() {
        let decoded = huffman_decode(&[
            0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ])
        .unwrap();
        assert_eq!(decoded, b"www.example.com");

        let decoded = huffman_decode(&[0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf]).unwrap();
        assert_eq!(decoded, b"no-cache");

        let all: Vec<u8> = (0u8..=255).collect();
        let mut coded = Vec::new();
        huffman_encode(&all, &mut coded);
        assert_eq!(huffman_decode(&coded).unwrap(), all);

        // A full octet of EOS padding is invalid.
        let mut padded = Vec::new();
        huffman_encode(b"a", &mut padded);
        padded.push(0xff);
        assert_eq!(huffman_decode(&padded), None);
    }
}
