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

//! [Integer Representation] implementation of [HPACK].
//!
//! [Integer Representation]: https://httpwg.org/specs/rfc7541.html#integer.representation
//! [HPACK]: https://httpwg.org/specs/rfc7541.html
//!
//! Integers are used to represent name indexes, header field indexes and
//! string lengths. An integer representation starts inside an octet after
//! a variable-length prefix and always finishes at the end of an octet.

use crate::h2::error::ErrorCode;
use crate::h2::H2Error;

/// Appends the prefixed-integer representation of `value` to `dst`.
///
/// `mask` is the all-ones prefix mask (for an N-bit prefix it is
/// `2^N - 1`), and `flags` carries the bits above the prefix of the first
/// octet.
pub(crate) fn encode_integer(value: usize, mask: u8, flags: u8, dst: &mut Vec<u8>) {
    if value < mask as usize {
        dst.push(flags | value as u8);
        return;
    }
    dst.push(flags | mask);
    let mut rest = value - mask as usize;
    while rest >= 128 {
        dst.push((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    dst.push(rest as u8);
}

/// Decodes a prefixed integer starting at `buf[*pos]`, advancing `*pos`
/// past the representation. Overflow or a truncated representation yields
/// a compression error.
pub(crate) fn decode_integer(buf: &[u8], pos: &mut usize, mask: u8) -> Result<usize, H2Error> {
    let overflow = H2Error::ConnectionError(ErrorCode::CompressionError);
    let first = *buf.get(*pos).ok_or(overflow)?;
    *pos += 1;
    let mut value = (first & mask) as usize;
    if value < mask as usize {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(*pos).ok_or(overflow)?;
        *pos += 1;
        value = ((byte & 0x7f) as usize)
            .checked_shl(shift)
            .and_then(|v| v.checked_add(value))
            .ok_or(overflow)?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > usize::BITS {
            return Err(overflow);
        }
    }
}

#[cfg(test)]
mod ut_integer {
    use super::*;

    /// UT test cases for `encode_integer`.
    ///
    /// # Brief
    /// 1. Encodes the three examples of RFC 7541 Appendix C.1.
    /// 2. Checks the produced octets.
    #[test]
    fn ut_integer_encode() {
        // C.1.1. Encoding 10 using a 5-bit prefix.
        let mut dst = Vec::new();
        encode_integer(10, 0x1f, 0x00, &mut dst);
        assert_eq!(dst, [0x0a]);

        // C.1.2. Encoding 1337 using a 5-bit prefix.
        let mut dst = Vec::new();
        encode_integer(1337, 0x1f, 0x00, &mut dst);
        assert_eq!(dst, [0x1f, 0x9a, 0x0a]);

        // C.1.3. Encoding 42 starting at an octet boundary.
        let mut dst = Vec::new();
        encode_integer(42, 0xff, 0x00, &mut dst);
        assert_eq!(dst, [0x2a]);
    }

    /// UT test cases for `decode_integer`.
    ///
    /// # Brief
    /// 1. Decodes the three examples of RFC 7541 Appendix C.1.
    /// 2. Checks the decoded values and cursor positions.
    /// 3. Decodes a truncated representation and checks the error.
    #[test]
    fn ut_integer_decode() {
        let mut pos = 0;
        assert_eq!(decode_integer(&[0x0a], &mut pos, 0x1f), Ok(10));
        assert_eq!(pos, 1);

        let mut pos = 0;
        assert_eq!(
            decode_integer(&[0x1f, 0x9a, 0x0a], &mut pos, 0x1f),
            Ok(1337)
        );
        assert_eq!(pos, 3);

        let mut pos = 0;
        assert_eq!(decode_integer(&[0x2a], &mut pos, 0xff), Ok(42));

        let mut pos = 0;
        assert_eq!(
            decode_integer(&[0x1f, 0x9a], &mut pos, 0x1f),
            Err(H2Error::ConnectionError(ErrorCode::CompressionError))
        );
    }
}
