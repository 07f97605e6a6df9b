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

//! [HTTP/2] protocol implementation.
//!
//! This module provides the binary framing layer the transport is built
//! on: the frame model, a streaming frame decoder, a frame encoder, and
//! the HPACK field compression both of them use. The frame set covers
//! what a multiplexed RPC transport needs: DATA, HEADERS (with
//! CONTINUATION), SETTINGS, PING, GOAWAY, WINDOW_UPDATE and RST_STREAM.
//! Server push is rejected and priority information is ignored.
//!
//! [HTTP/2]: https://httpwg.org/specs/rfc9113.html

mod decoder;
mod encoder;
mod error;
mod frame;
mod hpack;
mod parts;

pub use decoder::{FrameDecoder, FrameKind, Frames, FramesIntoIter};
pub use encoder::FrameEncoder;
pub use error::{ErrorCode, H2Error};
pub use frame::{
    get_setting, Data, Frame, FrameFlags, FrameType, Goaway, Headers, Payload, Ping, RstStream,
    Setting, Settings, SettingsBuilder, StreamId, WindowUpdate,
};
pub use parts::Parts;

pub use crate::pseudo::PseudoHeaders;

/// The client connection preface, RFC 9113 Section 3.4.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// The largest legal flow-control window.
pub const MAX_FLOW_CONTROL_WINDOW: u32 = (1 << 31) - 1;
