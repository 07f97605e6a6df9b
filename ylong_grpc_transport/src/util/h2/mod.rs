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

//! The HTTP/2 engine shared by the client and server transports: flow
//! control, the stream store, the frame send/recv tasks and the
//! connection manager.

pub(crate) mod bdp;
pub(crate) mod buffer;
pub(crate) mod input;
pub(crate) mod manager;
pub(crate) mod output;
pub(crate) mod streams;

pub(crate) use buffer::FlowControl;
pub(crate) use input::SendData;
pub(crate) use manager::{
    ConnManager, IncomingStream, SettingsSync, StreamEvent, StreamMessage,
};
pub(crate) use output::RecvData;
pub(crate) use streams::Streams;

pub(crate) const MAX_FLOW_CONTROL_WINDOW: u32 = (1 << 31) - 1;

/// Opaque payload of keepalive pings.
pub(crate) const KEEPALIVE_PING: [u8; 8] = [0; 8];

/// Opaque payload of BDP measurement pings.
pub(crate) const BDP_PING: [u8; 8] = [2, 4, 16, 16, 9, 14, 7, 7];
