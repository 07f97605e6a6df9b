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

//! HTTP/2 frame decoder.
//!
//! [`FrameDecoder`] is a streaming decoder: bytes read from the
//! connection are fed in as they arrive, and every call returns the
//! frames completed so far. HEADERS and their CONTINUATION fragments are
//! reassembled into one header block and HPACK-decoded when END_HEADERS
//! arrives. Padding is removed, PRIORITY information is discarded and
//! unknown frame types are skipped.

use std::convert::TryFrom;

use crate::h2::frame::{
    get_setting, Data, Frame, FrameFlags, FrameType, Goaway, Headers, Ping, RstStream, Settings,
    WindowUpdate, ACK_MASK, HEADERS_PRIORITY_MASK,
};
use crate::h2::hpack::HpackDecoder;
use crate::h2::{ErrorCode, H2Error, StreamId};

const FRAME_HEADER_LENGTH: usize = 9;
const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024;
const MAX_ALLOWED_FRAME_SIZE: u32 = (1 << 24) - 1;
const DEFAULT_HEADER_TABLE_SIZE: usize = 4096;
const DEFAULT_MAX_HEADER_LIST_SIZE: usize = 16 << 10;

/// The frames produced by one `decode` call.
pub struct Frames {
    list: Vec<FrameKind>,
}

/// One decoding step result: a complete frame, or a marker that more
/// bytes are needed.
pub enum FrameKind {
    /// A complete frame.
    Complete(Frame),
    /// A fragment was consumed but no frame completed.
    Partial,
}

/// Iterator over decoded frames.
pub struct FramesIntoIter {
    into_iter: std::vec::IntoIter<FrameKind>,
}

impl Frames {
    /// Returns the number of decode results.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns `true` if no frame was produced.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl Iterator for FramesIntoIter {
    type Item = FrameKind;

    fn next(&mut self) -> Option<Self::Item> {
        self.into_iter.next()
    }
}

impl IntoIterator for Frames {
    type Item = FrameKind;
    type IntoIter = FramesIntoIter;

    fn into_iter(self) -> Self::IntoIter {
        FramesIntoIter {
            into_iter: self.list.into_iter(),
        }
    }
}

// An in-progress header block, waiting for END_HEADERS.
struct Continuation {
    id: StreamId,
    end_stream: bool,
    fragments: Vec<u8>,
}

/// Streaming HTTP/2 frame decoder.
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: u32,
    continuation: Option<Continuation>,
    hpack: HpackDecoder,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a `FrameDecoder` with protocol default limits.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            continuation: None,
            hpack: HpackDecoder::new(DEFAULT_HEADER_TABLE_SIZE, DEFAULT_MAX_HEADER_LIST_SIZE),
        }
    }

    /// Sets the largest frame payload this endpoint accepts, as
    /// advertised in SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: u32) -> Result<(), H2Error> {
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&size) {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        self.max_frame_size = size;
        Ok(())
    }

    /// Sets the largest decoded header list this endpoint accepts.
    pub fn set_max_header_list_size(&mut self, size: usize) {
        self.hpack.set_max_header_list_size(size);
    }

    /// Sets the ceiling for the peer's dynamic table size.
    pub fn set_max_header_table_size(&mut self, size: usize) {
        self.hpack.set_max_table_size(size);
    }

    /// Feeds bytes into the decoder and returns every frame completed by
    /// them.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Frames, H2Error> {
        self.buffer.extend_from_slice(buf);
        let mut list = Vec::new();
        loop {
            if self.buffer.len() < FRAME_HEADER_LENGTH {
                if !self.buffer.is_empty() {
                    list.push(FrameKind::Partial);
                }
                break;
            }
            let len = ((self.buffer[0] as usize) << 16)
                | ((self.buffer[1] as usize) << 8)
                | self.buffer[2] as usize;
            if len > self.max_frame_size as usize {
                return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
            }
            if self.buffer.len() < FRAME_HEADER_LENGTH + len {
                list.push(FrameKind::Partial);
                break;
            }
            let frame_type = self.buffer[3];
            let flags = FrameFlags::new(self.buffer[4]);
            let id: StreamId = ((self.buffer[5] as u32 & 0x7f) << 24)
                | ((self.buffer[6] as u32) << 16)
                | ((self.buffer[7] as u32) << 8)
                | self.buffer[8] as u32;
            let payload: Vec<u8> = self
                .buffer
                .drain(..FRAME_HEADER_LENGTH + len)
                .skip(FRAME_HEADER_LENGTH)
                .collect();

            if let Some(frame) = self.decode_frame(frame_type, flags, id, payload)? {
                list.push(FrameKind::Complete(frame));
            }
        }
        Ok(Frames { list })
    }

    fn decode_frame(
        &mut self,
        frame_type: u8,
        flags: FrameFlags,
        id: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        // While a header block is open only CONTINUATION on the same
        // stream is legal, RFC 9113 Section 6.10.
        if self.continuation.is_some() && frame_type != FrameType::Continuation as u8 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }

        match frame_type {
            t if t == FrameType::Data as u8 => self.decode_data(flags, id, payload),
            t if t == FrameType::Headers as u8 => self.decode_headers(flags, id, payload),
            t if t == FrameType::Priority as u8 => {
                if payload.len() != 5 {
                    return Err(H2Error::StreamError(id, ErrorCode::FrameSizeError));
                }
                // Single default priority; the fields are discarded.
                Ok(None)
            }
            t if t == FrameType::RstStream as u8 => {
                if id == 0 {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
                if payload.len() != 4 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                Ok(Some(Frame::new(
                    id,
                    flags,
                    crate::h2::Payload::RstStream(RstStream::new(code)),
                )))
            }
            t if t == FrameType::Settings as u8 => self.decode_settings(flags, id, payload),
            t if t == FrameType::PushPromise as u8 => {
                // Push is never enabled by this endpoint.
                Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
            }
            t if t == FrameType::Ping as u8 => {
                if id != 0 {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
                if payload.len() != 8 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Ok(Some(Frame::new(
                    0,
                    flags,
                    crate::h2::Payload::Ping(Ping::new(data)),
                )))
            }
            t if t == FrameType::Goaway as u8 => {
                if id != 0 {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
                }
                if payload.len() < 8 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                let last_stream_id = u32::from_be_bytes([
                    payload[0] & 0x7f,
                    payload[1],
                    payload[2],
                    payload[3],
                ]);
                let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                Ok(Some(Frame::new(
                    0,
                    flags,
                    crate::h2::Payload::Goaway(Goaway::new(
                        code,
                        last_stream_id,
                        payload[8..].to_vec(),
                    )),
                )))
            }
            t if t == FrameType::WindowUpdate as u8 => {
                if payload.len() != 4 {
                    return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
                }
                let increment = u32::from_be_bytes([
                    payload[0] & 0x7f,
                    payload[1],
                    payload[2],
                    payload[3],
                ]);
                if increment == 0 {
                    return if id == 0 {
                        Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
                    } else {
                        Err(H2Error::StreamError(id, ErrorCode::ProtocolError))
                    };
                }
                Ok(Some(Frame::new(
                    id,
                    flags,
                    crate::h2::Payload::WindowUpdate(WindowUpdate::new(increment)),
                )))
            }
            t if t == FrameType::Continuation as u8 => self.decode_continuation(flags, id, payload),
            // Unknown frame types are ignored, RFC 9113 Section 4.1.
            _ => Ok(None),
        }
    }

    fn decode_data(
        &mut self,
        flags: FrameFlags,
        id: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        if id == 0 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let data = unpad(&flags, payload)?;
        Ok(Some(Frame::new(
            id,
            flags,
            crate::h2::Payload::Data(Data::new(data)),
        )))
    }

    fn decode_headers(
        &mut self,
        flags: FrameFlags,
        id: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        if id == 0 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let mut fragment = unpad(&flags, payload)?;
        if flags.bits() & HEADERS_PRIORITY_MASK != 0 {
            if fragment.len() < 5 {
                return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
            }
            // Exclusive bit, stream dependency and weight are discarded.
            fragment.drain(..5);
        }
        self.continuation = Some(Continuation {
            id,
            end_stream: flags.is_end_stream(),
            fragments: fragment,
        });
        if flags.is_end_headers() {
            return self.finish_header_block();
        }
        Ok(None)
    }

    fn decode_continuation(
        &mut self,
        flags: FrameFlags,
        id: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        let continuation = match self.continuation.as_mut() {
            Some(c) if c.id == id => c,
            _ => return Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
        };
        continuation.fragments.extend_from_slice(&payload);
        if flags.is_end_headers() {
            return self.finish_header_block();
        }
        Ok(None)
    }

    fn finish_header_block(&mut self) -> Result<Option<Frame>, H2Error> {
        // The caller only invokes this with an open continuation.
        let continuation = match self.continuation.take() {
            Some(c) => c,
            None => return Err(H2Error::ConnectionError(ErrorCode::InternalError)),
        };
        let parts = self.hpack.decode(&continuation.fragments)?;
        let mut flags = FrameFlags::empty();
        flags.set_end_headers(true);
        flags.set_end_stream(continuation.end_stream);
        Ok(Some(Frame::new(
            continuation.id,
            flags,
            crate::h2::Payload::Headers(Headers::new(parts)),
        )))
    }

    fn decode_settings(
        &mut self,
        flags: FrameFlags,
        id: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        if id != 0 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        if flags.bits() & ACK_MASK != 0 {
            if !payload.is_empty() {
                return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
            }
            return Ok(Some(Frame::new(
                0,
                flags,
                crate::h2::Payload::Settings(Settings::new(vec![])),
            )));
        }
        if payload.len() % 6 != 0 {
            return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
        }
        let mut settings = Vec::with_capacity(payload.len() / 6);
        for chunk in payload.chunks(6) {
            let setting_id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
            if let Some(setting) = get_setting(setting_id, value)? {
                settings.push(setting);
            }
        }
        Ok(Some(Frame::new(
            0,
            flags,
            crate::h2::Payload::Settings(Settings::new(settings)),
        )))
    }
}

fn unpad(flags: &FrameFlags, mut payload: Vec<u8>) -> Result<Vec<u8>, H2Error> {
    if !flags.is_padded() {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
    }
    let pad_length = payload[0] as usize;
    if pad_length + 1 > payload.len() {
        return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
    }
    payload.truncate(payload.len() - pad_length);
    payload.remove(0);
    Ok(payload)
}

impl TryFrom<u8> for FrameType {
    type Error = H2Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(FrameType::Data),
            0x1 => Ok(FrameType::Headers),
            0x2 => Ok(FrameType::Priority),
            0x3 => Ok(FrameType::RstStream),
            0x4 => Ok(FrameType::Settings),
            0x5 => Ok(FrameType::PushPromise),
            0x6 => Ok(FrameType::Ping),
            0x7 => Ok(FrameType::Goaway),
            0x8 => Ok(FrameType::WindowUpdate),
            0x9 => Ok(FrameType::Continuation),
            _ => Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
        }
    }
}

#[cfg(test)]
mod ut_frame_decoder {
    use super::*;
    use crate::h2::Payload;

    fn first_frame(frames: Frames) -> Frame {
        for kind in frames {
            if let FrameKind::Complete(frame) = kind {
                return frame;
            }
        }
        panic!("no complete frame decoded");
    }

    /// UT test cases for decoding a DATA frame split across reads.
    ///
    /// # Brief
    /// 1. Feeds a DATA frame in two pieces.
    /// 2. Checks that the first piece reports `Partial` and the second
    ///    completes the frame with END_STREAM set.
    #[test]
    fn ut_decoder_data_split() {
        let mut decoder = FrameDecoder::new();
        let bytes = [
            0x00, 0x00, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, b'p', b'i', b'n', b'g',
        ];
        let frames = decoder.decode(&bytes[..6]).unwrap();
        assert!(matches!(
            frames.into_iter().next(),
            Some(FrameKind::Partial)
        ));

        let frame = first_frame(decoder.decode(&bytes[6..]).unwrap());
        assert_eq!(frame.stream_id(), 1);
        assert!(frame.flags().is_end_stream());
        match frame.payload() {
            Payload::Data(data) => assert_eq!(data.data(), b"ping"),
            _ => panic!("unexpected payload"),
        }
    }

    /// UT test cases for padded DATA removal.
    ///
    /// # Brief
    /// 1. Decodes a padded DATA frame.
    /// 2. Checks that only the payload bytes remain.
    /// 3. Decodes a frame whose pad length exceeds the payload and checks
    ///    the protocol error.
    #[test]
    fn ut_decoder_padding() {
        let mut decoder = FrameDecoder::new();
        let bytes = [
            0x00, 0x00, 0x06, 0x00, 0x08, 0x00, 0x00, 0x00, 0x03, 0x02, b'h', b'i', 0x00, 0x00,
            0x00,
        ];
        let frame = first_frame(decoder.decode(&bytes).unwrap());
        match frame.payload() {
            Payload::Data(data) => assert_eq!(data.data(), b"hi"),
            _ => panic!("unexpected payload"),
        }

        let mut decoder = FrameDecoder::new();
        let bad = [0x00, 0x00, 0x02, 0x00, 0x08, 0x00, 0x00, 0x00, 0x03, 0x05, 0x00];
        assert_eq!(
            decoder.decode(&bad).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test cases for HEADERS + CONTINUATION reassembly.
    ///
    /// # Brief
    /// 1. Splits one header block between a HEADERS frame without
    ///    END_HEADERS and a CONTINUATION with END_HEADERS.
    /// 2. Checks that one Headers frame with the full block is produced.
    #[test]
    fn ut_decoder_continuation() {
        let mut decoder = FrameDecoder::new();
        // Block: :method GET (0x82), :scheme http (0x86).
        let mut bytes = vec![0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x05, 0x82];
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0x09, 0x04, 0x00, 0x00, 0x00, 0x05, 0x86]);
        let frame = first_frame(decoder.decode(&bytes).unwrap());
        assert_eq!(frame.stream_id(), 5);
        assert!(frame.flags().is_end_headers());
        match frame.payload() {
            Payload::Headers(headers) => {
                let (pseudo, _) = headers.parts();
                assert_eq!(pseudo.method(), Some("GET"));
                assert_eq!(pseudo.scheme(), Some("http"));
            }
            _ => panic!("unexpected payload"),
        }
    }

    /// UT test cases for interleaved frames inside a header block.
    ///
    /// # Brief
    /// 1. Opens a header block, then sends a PING before END_HEADERS.
    /// 2. Checks the connection protocol error.
    #[test]
    fn ut_decoder_interleaved_block() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = vec![0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x05, 0x82];
        bytes.extend_from_slice(&[
            0x00, 0x00, 0x08, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0,
        ]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test cases for SETTINGS decoding.
    ///
    /// # Brief
    /// 1. Decodes a SETTINGS frame with two known and one unknown entry.
    /// 2. Checks the parsed settings.
    /// 3. Decodes a SETTINGS frame with a bad length and checks the frame
    ///    size error.
    #[test]
    fn ut_decoder_settings() {
        let mut decoder = FrameDecoder::new();
        let bytes = [
            0x00, 0x00, 0x12, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, // header
            0x00, 0x04, 0x00, 0x00, 0xff, 0xff, // INITIAL_WINDOW_SIZE 65535
            0x00, 0x03, 0x00, 0x00, 0x00, 0x64, // MAX_CONCURRENT_STREAMS 100
            0x00, 0xab, 0x00, 0x00, 0x00, 0x01, // unknown
        ];
        let frame = first_frame(decoder.decode(&bytes).unwrap());
        match frame.payload() {
            Payload::Settings(settings) => {
                assert_eq!(
                    settings.get_settings(),
                    [
                        crate::h2::Setting::InitialWindowSize(65535),
                        crate::h2::Setting::MaxConcurrentStreams(100),
                    ]
                );
            }
            _ => panic!("unexpected payload"),
        }

        let bad = [0x00, 0x00, 0x05, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0];
        assert_eq!(
            decoder.decode(&bad).err(),
            Some(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );
    }

    /// UT test cases for GOAWAY and WINDOW_UPDATE decoding.
    ///
    /// # Brief
    /// 1. Decodes a GOAWAY carrying debug data and a WINDOW_UPDATE.
    /// 2. Checks the decoded fields.
    /// 3. Checks that a zero increment is rejected.
    #[test]
    fn ut_decoder_goaway_window_update() {
        let mut decoder = FrameDecoder::new();
        let bytes = [
            0x00, 0x00, 0x0a, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, // header
            0x00, 0x00, 0x00, 0x07, // last stream id 7
            0x00, 0x00, 0x00, 0x0b, // ENHANCE_YOUR_CALM
            b'h', b'i',
        ];
        let frame = first_frame(decoder.decode(&bytes).unwrap());
        match frame.payload() {
            Payload::Goaway(goaway) => {
                assert_eq!(goaway.get_last_stream_id(), 7);
                assert_eq!(goaway.get_error_code(), 0x0b);
                assert_eq!(goaway.get_debug_data(), b"hi");
            }
            _ => panic!("unexpected payload"),
        }

        let bytes = [
            0x00, 0x00, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x10, 0x00,
        ];
        let frame = first_frame(decoder.decode(&bytes).unwrap());
        match frame.payload() {
            Payload::WindowUpdate(update) => assert_eq!(update.get_increment(), 0x1000),
            _ => panic!("unexpected payload"),
        }

        let zero = [
            0x00, 0x00, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(
            decoder.decode(&zero).err(),
            Some(H2Error::StreamError(3, ErrorCode::ProtocolError))
        );
    }

    /// UT test cases for oversize frames and unknown types.
    ///
    /// # Brief
    /// 1. Feeds a frame header whose length exceeds the advertised
    ///    maximum and checks the frame size error.
    /// 2. Feeds an unknown frame type and checks it is skipped.
    #[test]
    fn ut_decoder_limits_and_unknown() {
        let mut decoder = FrameDecoder::new();
        let oversize = [0x00, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(
            decoder.decode(&oversize).err(),
            Some(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );

        let mut decoder = FrameDecoder::new();
        let unknown = [0x00, 0x00, 0x01, 0x7f, 0x00, 0x00, 0x00, 0x00, 0x01, 0xaa];
        let frames = decoder.decode(&unknown).unwrap();
        assert!(frames.is_empty());
    }
}
