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

use std::convert::TryFrom;

use crate::h2::{ErrorCode, H2Error, Parts, PseudoHeaders};
use crate::headers;

/// Type StreamId.
/// In HTTP/2, streams are identified by an unsigned 31-bit integer.
pub type StreamId = u32;

/// Mask for the END_STREAM flag.
/// When set, indicates that the sender will not send further frames for
/// this stream.
pub(crate) const END_STREAM_MASK: u8 = 0x01;

/// Mask for the END_HEADERS flag.
/// When set, indicates that this frame contains an entire header block and
/// not a fragment.
pub(crate) const END_HEADERS_MASK: u8 = 0x04;

/// Mask for the PADDED flag.
/// When set, indicates that the frame payload is followed by a padding
/// field.
pub(crate) const PADDED_MASK: u8 = 0x08;

/// Mask for the PRIORITY flag of HEADERS.
/// When set, the frame carries priority fields before the fragment.
pub(crate) const HEADERS_PRIORITY_MASK: u8 = 0x20;

/// Mask for the ACK flag of SETTINGS and PING.
pub(crate) const ACK_MASK: u8 = 0x1;

/// HTTP/2 frame structure, including the stream id, flags, and payload
/// information. The frame type information is represented by the `Payload`
/// type. This structure represents the fundamental unit of communication
/// in HTTP/2.
#[derive(Clone, Debug)]
pub struct Frame {
    id: StreamId,
    flags: FrameFlags,
    payload: Payload,
}

/// Enum representing the type of HTTP/2 frame.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    Goaway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// Enum representing the payload of an HTTP/2 frame.
/// The payload differs based on the type of frame.
#[derive(Clone, Debug)]
pub enum Payload {
    /// HEADERS frame payload.
    Headers(Headers),
    /// DATA frame payload.
    Data(Data),
    /// RST_STREAM frame payload.
    RstStream(RstStream),
    /// PING frame payload.
    Ping(Ping),
    /// SETTINGS frame payload.
    Settings(Settings),
    /// GOAWAY frame payload.
    Goaway(Goaway),
    /// WINDOW_UPDATE frame payload.
    WindowUpdate(WindowUpdate),
}

/// Enum representing the settings that can be included in a SETTINGS
/// frame.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Setting {
    /// SETTINGS_HEADER_TABLE_SIZE.
    HeaderTableSize(u32),
    /// SETTINGS_ENABLE_PUSH.
    EnablePush(bool),
    /// SETTINGS_MAX_CONCURRENT_STREAMS.
    MaxConcurrentStreams(u32),
    /// SETTINGS_INITIAL_WINDOW_SIZE.
    InitialWindowSize(u32),
    /// SETTINGS_MAX_FRAME_SIZE.
    MaxFrameSize(u32),
    /// SETTINGS_MAX_HEADER_LIST_SIZE.
    MaxHeaderListSize(u32),
}

/// HTTP/2 frame flags.
#[derive(Clone, Copy, Debug)]
pub struct FrameFlags(u8);

/// HTTP/2 HEADERS frame payload, containing pseudo-headers and regular
/// field lines.
#[derive(Clone, Debug)]
pub struct Headers {
    parts: Parts,
}

/// HTTP/2 DATA frame payload, with any padding already removed. The DATA
/// frame carries the payload bytes of a request or response stream.
#[derive(Clone, Debug)]
pub struct Data {
    data: Vec<u8>,
}

/// The RST_STREAM frame allows for immediate termination of a stream.
/// RST_STREAM is sent to request cancellation of a stream or to indicate
/// an error situation.
#[derive(Clone, Debug)]
pub struct RstStream {
    error_code: u32,
}

/// Represents the PING frame payload.
/// The PING frame is a mechanism for measuring a minimal round-trip time
/// from the sender and for checking liveness of an idle connection.
#[derive(Clone, Debug)]
pub struct Ping {
    /// The opaque data of PING.
    pub data: [u8; 8],
}

/// Represents the SETTINGS frame payload.
/// The SETTINGS frame conveys configuration parameters that affect how
/// endpoints communicate.
#[derive(Clone, Debug)]
pub struct Settings {
    settings: Vec<Setting>,
}

/// Represents the GOAWAY frame payload.
/// The GOAWAY frame is used to initiate shutdown of a connection or to
/// signal serious error conditions.
#[derive(Clone, Debug)]
pub struct Goaway {
    error_code: u32,
    last_stream_id: StreamId,
    debug_data: Vec<u8>,
}

/// Represents the WINDOW_UPDATE frame payload.
/// The WINDOW_UPDATE frame is used to implement flow control.
#[derive(Clone, Debug)]
pub struct WindowUpdate {
    window_size_increment: u32,
}

/// A builder of SETTINGS payloads.
pub struct SettingsBuilder {
    settings: Vec<Setting>,
}

impl Frame {
    /// Constructs a new `Frame` with the given `StreamId`, `FrameFlags`
    /// and `Payload`.
    pub fn new(id: StreamId, flags: FrameFlags, payload: Payload) -> Self {
        Frame { id, flags, payload }
    }

    /// Returns the stream identifier of the frame.
    pub fn stream_id(&self) -> StreamId {
        self.id
    }

    /// Returns a reference to the frame's flags.
    pub fn flags(&self) -> &FrameFlags {
        &self.flags
    }

    /// Returns a reference to the frame's payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

impl FrameFlags {
    /// Creates a new `FrameFlags` from the given flags octet.
    pub fn new(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Creates a new `FrameFlags` with no flags set.
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Judges whether the END_STREAM flag is set.
    pub fn is_end_stream(&self) -> bool {
        self.0 & END_STREAM_MASK == END_STREAM_MASK
    }

    /// Judges whether the END_HEADERS flag is set.
    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS_MASK == END_HEADERS_MASK
    }

    /// Judges whether the PADDED flag is set.
    pub fn is_padded(&self) -> bool {
        self.0 & PADDED_MASK == PADDED_MASK
    }

    /// Judges whether the ACK flag is set.
    pub fn is_ack(&self) -> bool {
        self.0 & ACK_MASK == ACK_MASK
    }

    /// Gets the flags octet.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Sets the END_STREAM flag.
    pub fn set_end_stream(&mut self, end_stream: bool) {
        if end_stream {
            self.0 |= END_STREAM_MASK;
        } else {
            self.0 &= !END_STREAM_MASK;
        }
    }

    /// Sets the END_HEADERS flag.
    pub fn set_end_headers(&mut self, end_headers: bool) {
        if end_headers {
            self.0 |= END_HEADERS_MASK;
        } else {
            self.0 &= !END_HEADERS_MASK;
        }
    }
}

impl Payload {
    /// Returns a reference to the `Headers` if the payload is of the
    /// Headers variant, `None` otherwise.
    pub fn as_headers(&self) -> Option<&Headers> {
        if let Payload::Headers(headers) = self {
            Some(headers)
        } else {
            None
        }
    }

    /// Returns the `FrameType` this payload is associated with.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Payload::Headers(_) => FrameType::Headers,
            Payload::Data(_) => FrameType::Data,
            Payload::Ping(_) => FrameType::Ping,
            Payload::RstStream(_) => FrameType::RstStream,
            Payload::Settings(_) => FrameType::Settings,
            Payload::Goaway(_) => FrameType::Goaway,
            Payload::WindowUpdate(_) => FrameType::WindowUpdate,
        }
    }
}

impl Headers {
    /// Creates a new `Headers` payload from the provided `Parts`.
    pub fn new(parts: Parts) -> Self {
        Headers { parts }
    }

    /// Returns pseudo-headers and regular field lines as a tuple.
    pub fn parts(&self) -> (&PseudoHeaders, &headers::Headers) {
        self.parts.parts()
    }

    /// Returns a copy of the inner `Parts`.
    pub fn get_parts(&self) -> Parts {
        self.parts.clone()
    }

    /// Consumes the payload and returns the inner `Parts`.
    pub fn into_parts(self) -> Parts {
        self.parts
    }
}

impl Data {
    /// Creates a new `Data` payload containing the provided bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Data { data }
    }

    /// Returns the payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the number of bytes in the payload.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Consumes the payload and returns the bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Settings {
    /// Creates a new `Settings` payload containing the provided settings.
    pub fn new(settings: Vec<Setting>) -> Self {
        Settings { settings }
    }

    /// Returns a slice of the settings.
    pub fn get_settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Returns the total length of the settings when encoded.
    pub fn encoded_len(&self) -> usize {
        // Each setting is a 2-byte identifier and a 4-byte value.
        self.settings.len() * 6
    }

    /// Returns an ACK SETTINGS frame.
    pub fn ack() -> Frame {
        Frame::new(
            0,
            FrameFlags::new(ACK_MASK),
            Payload::Settings(Settings::new(vec![])),
        )
    }
}

impl Setting {
    /// Returns the identifier associated with the setting.
    pub fn setting_identifier(&self) -> u16 {
        match self {
            Setting::HeaderTableSize(_) => 0x01,
            Setting::EnablePush(_) => 0x02,
            Setting::MaxConcurrentStreams(_) => 0x03,
            Setting::InitialWindowSize(_) => 0x04,
            Setting::MaxFrameSize(_) => 0x05,
            Setting::MaxHeaderListSize(_) => 0x06,
        }
    }

    /// Returns the value of the setting as transmitted on the wire.
    pub fn value(&self) -> u32 {
        match self {
            Setting::HeaderTableSize(v)
            | Setting::MaxConcurrentStreams(v)
            | Setting::InitialWindowSize(v)
            | Setting::MaxFrameSize(v)
            | Setting::MaxHeaderListSize(v) => *v,
            Setting::EnablePush(v) => *v as u32,
        }
    }
}

/// Parses a `(identifier, value)` pair from a SETTINGS frame, validating
/// the value range. Unknown identifiers are ignored and return `None`.
pub fn get_setting(id: u16, value: u32) -> Result<Option<Setting>, H2Error> {
    const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;
    const MIN_MAX_FRAME_SIZE: u32 = 1 << 14;
    const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

    let setting = match id {
        0x01 => Some(Setting::HeaderTableSize(value)),
        0x02 => {
            if value > 1 {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            Some(Setting::EnablePush(value == 1))
        }
        0x03 => Some(Setting::MaxConcurrentStreams(value)),
        0x04 => {
            if value > MAX_INITIAL_WINDOW_SIZE {
                return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
            }
            Some(Setting::InitialWindowSize(value))
        }
        0x05 => {
            if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            Some(Setting::MaxFrameSize(value))
        }
        0x06 => Some(Setting::MaxHeaderListSize(value)),
        // Unknown settings are ignored, RFC 9113 Section 6.5.2.
        _ => None,
    };
    Ok(setting)
}

impl SettingsBuilder {
    /// `SettingsBuilder` constructor.
    pub fn new() -> Self {
        SettingsBuilder { settings: vec![] }
    }

    /// SETTINGS_HEADER_TABLE_SIZE (0x01) setting.
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.push(Setting::HeaderTableSize(size));
        self
    }

    /// SETTINGS_ENABLE_PUSH (0x02) setting.
    pub fn enable_push(mut self, is_enable: bool) -> Self {
        self.settings.push(Setting::EnablePush(is_enable));
        self
    }

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x03) setting.
    pub fn max_concurrent_streams(mut self, num: u32) -> Self {
        self.settings.push(Setting::MaxConcurrentStreams(num));
        self
    }

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x04) setting.
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.push(Setting::InitialWindowSize(size));
        self
    }

    /// SETTINGS_MAX_FRAME_SIZE (0x05) setting.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.push(Setting::MaxFrameSize(size));
        self
    }

    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x06) setting.
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.push(Setting::MaxHeaderListSize(size));
        self
    }

    /// Consumes the builder and constructs a SETTINGS payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use ylong_grpc::h2::SettingsBuilder;
    ///
    /// let settings = SettingsBuilder::new()
    ///     .header_table_size(4096)
    ///     .max_frame_size(2 << 13)
    ///     .build();
    /// ```
    pub fn build(self) -> Settings {
        Settings::new(self.settings)
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Goaway {
    /// Creates a new `Goaway` with the provided error code, last stream id
    /// and debug data.
    pub fn new(error_code: u32, last_stream_id: StreamId, debug_data: Vec<u8>) -> Self {
        Goaway {
            error_code,
            last_stream_id,
            debug_data,
        }
    }

    /// Returns a slice of the debug data.
    pub fn get_debug_data(&self) -> &[u8] {
        &self.debug_data
    }

    /// Returns the identifier of the last stream processed by the sender.
    pub fn get_last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    /// Returns the error code.
    pub fn get_error_code(&self) -> u32 {
        self.error_code
    }

    /// Returns whether the error code is NO_ERROR.
    pub fn is_no_error(&self) -> bool {
        self.error_code == ErrorCode::NoError.into_code()
    }

    /// Returns the total length of the GOAWAY payload when encoded.
    pub fn encoded_len(&self) -> usize {
        // 4-byte last stream id + 4-byte error code + debug data.
        8 + self.debug_data.len()
    }
}

impl WindowUpdate {
    /// Creates a new `WindowUpdate` with the provided window size
    /// increment.
    pub fn new(window_size_increment: u32) -> Self {
        WindowUpdate {
            window_size_increment,
        }
    }

    /// Returns the window size increment.
    pub fn get_increment(&self) -> u32 {
        self.window_size_increment
    }
}

impl RstStream {
    /// Creates a new `RstStream` with the provided error code.
    pub fn new(error_code: u32) -> Self {
        Self { error_code }
    }

    /// Returns the raw error code.
    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    /// Gets the `H2Error` carried by this `RstStream` for the given
    /// stream.
    pub fn error(&self, id: StreamId) -> Result<H2Error, H2Error> {
        Ok(H2Error::StreamError(
            id,
            ErrorCode::try_from(self.error_code)?,
        ))
    }

    /// Returns whether the error code is NO_ERROR.
    pub fn is_no_error(&self) -> bool {
        self.error_code == 0
    }
}

impl Ping {
    /// Creates a new `Ping` with the provided opaque data.
    pub fn new(data: [u8; 8]) -> Self {
        Ping { data }
    }

    /// Returns the opaque data of the `Ping`.
    pub fn data(&self) -> [u8; 8] {
        self.data
    }

    /// Returns an ACK PING frame answering the given `Ping`.
    pub fn ack(ping: Ping) -> Frame {
        Frame::new(0, FrameFlags::new(ACK_MASK), Payload::Ping(ping))
    }
}
