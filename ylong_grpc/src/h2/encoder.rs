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

//! HTTP/2 frame encoder.
//!
//! [`FrameEncoder`] turns one [`Frame`] at a time into wire octets.
//! `set_frame` serializes the frame (HPACK-encoding header blocks and
//! splitting them into HEADERS plus CONTINUATION frames, and slicing DATA
//! at the peer's maximum frame size); `encode` then drains the serialized
//! octets into the caller's buffer.

use crate::h2::frame::{Frame, FrameType, Payload, ACK_MASK, END_HEADERS_MASK, END_STREAM_MASK};
use crate::h2::hpack::HpackEncoder;
use crate::h2::{ErrorCode, H2Error, StreamId};

const FRAME_HEADER_LENGTH: usize = 9;
const DEFAULT_HEADER_TABLE_SIZE: usize = 4096;

/// Encoder for outgoing HTTP/2 frames.
pub struct FrameEncoder {
    hpack: HpackEncoder,
    max_frame_size: usize,
    buffer: Vec<u8>,
    offset: usize,
}

impl FrameEncoder {
    /// Creates a `FrameEncoder`. `max_frame_size` is the peer's
    /// SETTINGS_MAX_FRAME_SIZE; `use_huffman` selects Huffman coding of
    /// header strings.
    pub fn new(max_frame_size: usize, use_huffman: bool) -> Self {
        Self {
            hpack: HpackEncoder::new(DEFAULT_HEADER_TABLE_SIZE, use_huffman),
            max_frame_size,
            buffer: Vec::new(),
            offset: 0,
        }
    }

    /// Updates the largest frame payload the peer accepts.
    pub fn update_max_frame_size(&mut self, size: usize) {
        self.max_frame_size = size;
    }

    /// Updates the dynamic table size in use, as allowed by the peer's
    /// SETTINGS_HEADER_TABLE_SIZE.
    pub fn update_header_table_size(&mut self, size: usize) {
        self.hpack.update_table_size(size);
    }

    /// Serializes the next frame. Any octets of the previous frame that
    /// were not yet drained stay in front of the new ones.
    pub fn set_frame(&mut self, frame: Frame) -> Result<(), H2Error> {
        if self.offset == self.buffer.len() {
            self.buffer.clear();
            self.offset = 0;
        }
        let id = frame.stream_id();
        let flags = *frame.flags();
        match frame.into_payload() {
            Payload::Headers(headers) => {
                let block = self.hpack.encode(&headers.get_parts());
                self.serialize_header_block(id, flags.is_end_stream(), &block);
            }
            Payload::Data(data) => {
                let payload = data.into_vec();
                let end_stream = flags.bits() & END_STREAM_MASK != 0;
                let mut chunks = payload.chunks(self.max_frame_size.max(1)).peekable();
                if payload.is_empty() {
                    self.push_frame_header(0, FrameType::Data, flags.bits(), id);
                } else {
                    while let Some(chunk) = chunks.next() {
                        let mut bits = 0;
                        if end_stream && chunks.peek().is_none() {
                            bits |= END_STREAM_MASK;
                        }
                        self.push_frame_header(chunk.len(), FrameType::Data, bits, id);
                        self.buffer.extend_from_slice(chunk);
                    }
                }
            }
            Payload::RstStream(rst) => {
                self.push_frame_header(4, FrameType::RstStream, 0, id);
                self.buffer.extend_from_slice(&rst.error_code().to_be_bytes());
            }
            Payload::Ping(ping) => {
                self.push_frame_header(8, FrameType::Ping, flags.bits() & ACK_MASK, 0);
                self.buffer.extend_from_slice(&ping.data());
            }
            Payload::Settings(settings) => {
                if flags.bits() & ACK_MASK != 0 {
                    self.push_frame_header(0, FrameType::Settings, ACK_MASK, 0);
                } else {
                    self.push_frame_header(settings.encoded_len(), FrameType::Settings, 0, 0);
                    for setting in settings.get_settings() {
                        self.buffer
                            .extend_from_slice(&setting.setting_identifier().to_be_bytes());
                        self.buffer.extend_from_slice(&setting.value().to_be_bytes());
                    }
                }
            }
            Payload::Goaway(goaway) => {
                self.push_frame_header(goaway.encoded_len(), FrameType::Goaway, 0, 0);
                self.buffer
                    .extend_from_slice(&goaway.get_last_stream_id().to_be_bytes());
                self.buffer
                    .extend_from_slice(&goaway.get_error_code().to_be_bytes());
                self.buffer.extend_from_slice(goaway.get_debug_data());
            }
            Payload::WindowUpdate(update) => {
                if update.get_increment() == 0 || update.get_increment() > 0x7fff_ffff {
                    return Err(H2Error::ConnectionError(ErrorCode::InternalError));
                }
                self.push_frame_header(4, FrameType::WindowUpdate, 0, id);
                self.buffer
                    .extend_from_slice(&update.get_increment().to_be_bytes());
            }
        }
        Ok(())
    }

    /// Drains serialized octets into `buf`, returning the number of bytes
    /// written. Returns 0 when the current frame is fully drained.
    pub fn encode(&mut self, buf: &mut [u8]) -> usize {
        let remaining = self.buffer.len() - self.offset;
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.buffer[self.offset..self.offset + n]);
        self.offset += n;
        if self.offset == self.buffer.len() {
            self.buffer.clear();
            self.offset = 0;
        }
        n
    }

    fn serialize_header_block(&mut self, id: StreamId, end_stream: bool, block: &[u8]) {
        let mut chunks = if block.is_empty() {
            vec![&block[..]]
        } else {
            block.chunks(self.max_frame_size.max(1)).collect()
        };
        let first = chunks.remove(0);
        let mut bits = 0u8;
        if end_stream {
            bits |= END_STREAM_MASK;
        }
        if chunks.is_empty() {
            bits |= END_HEADERS_MASK;
        }
        self.push_frame_header(first.len(), FrameType::Headers, bits, id);
        self.buffer.extend_from_slice(first);

        while !chunks.is_empty() {
            let chunk = chunks.remove(0);
            let bits = if chunks.is_empty() {
                END_HEADERS_MASK
            } else {
                0
            };
            self.push_frame_header(chunk.len(), FrameType::Continuation, bits, id);
            self.buffer.extend_from_slice(chunk);
        }
    }

    fn push_frame_header(&mut self, len: usize, frame_type: FrameType, flags: u8, id: StreamId) {
        self.buffer.push((len >> 16) as u8);
        self.buffer.push((len >> 8) as u8);
        self.buffer.push(len as u8);
        self.buffer.push(frame_type as u8);
        self.buffer.push(flags);
        self.buffer.extend_from_slice(&(id & 0x7fff_ffff).to_be_bytes());
    }
}

#[cfg(test)]
mod ut_frame_encoder {
    use super::*;
    use crate::h2::frame::{Data, FrameFlags, Headers, Ping, Settings, SettingsBuilder};
    use crate::h2::{FrameDecoder, FrameKind, Parts};
    use crate::pseudo::PseudoHeaders;

    fn drain(encoder: &mut FrameEncoder) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = encoder.encode(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    /// UT test cases for DATA encoding and max-frame splitting.
    ///
    /// # Brief
    /// 1. Encodes a 5-byte DATA payload with END_STREAM through an
    ///    encoder whose max frame size is 4.
    /// 2. Checks that two DATA frames are produced and only the last one
    ///    carries END_STREAM.
    #[test]
    fn ut_encoder_data_split() {
        let mut encoder = FrameEncoder::new(4, false);
        let mut flags = FrameFlags::empty();
        flags.set_end_stream(true);
        let frame = Frame::new(1, flags, Payload::Data(Data::new(b"hello".to_vec())));
        encoder.set_frame(frame).unwrap();
        let bytes = drain(&mut encoder);
        assert_eq!(
            bytes,
            [
                0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, b'h', b'e', b'l', b'l',
                0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, b'o',
            ]
        );
    }

    /// UT test cases for SETTINGS and PING encoding.
    ///
    /// # Brief
    /// 1. Encodes a SETTINGS frame and its ACK, and a PING ACK.
    /// 2. Checks the exact octets.
    #[test]
    fn ut_encoder_settings_ping() {
        let mut encoder = FrameEncoder::new(16384, false);
        let settings = SettingsBuilder::new().initial_window_size(65535).build();
        encoder
            .set_frame(Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Settings(settings),
            ))
            .unwrap();
        assert_eq!(
            drain(&mut encoder),
            [0x00, 0x00, 0x06, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00,
             0xff, 0xff]
        );

        encoder.set_frame(Settings::ack()).unwrap();
        assert_eq!(
            drain(&mut encoder),
            [0x00, 0x00, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00]
        );

        encoder.set_frame(Ping::ack(Ping::new([7; 8]))).unwrap();
        assert_eq!(
            drain(&mut encoder),
            [0x00, 0x00, 0x08, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00, 7, 7, 7, 7, 7, 7, 7, 7]
        );
    }

    /// UT test cases for header-block splitting into CONTINUATION.
    ///
    /// # Brief
    /// 1. Encodes a HEADERS frame through an encoder with a tiny max
    ///    frame size.
    /// 2. Decodes the result with a `FrameDecoder`.
    /// 3. Checks that the reassembled block round-trips the fields.
    #[test]
    fn ut_encoder_headers_continuation() {
        let mut encoder = FrameEncoder::new(4, false);
        let mut pseudo = PseudoHeaders::new();
        pseudo.set_method(Some(String::from("POST")));
        pseudo.set_scheme(Some(String::from("http")));
        pseudo.set_path(Some(String::from("/pkg.Service/Call")));
        let mut parts = Parts::new();
        parts.set_pseudo(pseudo);
        let mut flags = FrameFlags::empty();
        flags.set_end_headers(true);
        flags.set_end_stream(true);
        encoder
            .set_frame(Frame::new(
                3,
                flags,
                Payload::Headers(Headers::new(parts)),
            ))
            .unwrap();
        let bytes = drain(&mut encoder);

        let mut decoder = FrameDecoder::new();
        let mut decoded = None;
        for kind in decoder.decode(&bytes).unwrap() {
            if let FrameKind::Complete(frame) = kind {
                decoded = Some(frame);
            }
        }
        let frame = decoded.expect("no frame decoded");
        assert_eq!(frame.stream_id(), 3);
        assert!(frame.flags().is_end_stream());
        match frame.payload() {
            Payload::Headers(headers) => {
                let (pseudo, _) = headers.parts();
                assert_eq!(pseudo.method(), Some("POST"));
                assert_eq!(pseudo.path(), Some("/pkg.Service/Call"));
            }
            _ => panic!("unexpected payload"),
        }
    }
}
