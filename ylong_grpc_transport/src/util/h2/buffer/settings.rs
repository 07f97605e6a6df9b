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

//! http2 connection flow control.

use ylong_grpc::h2::{Frame, H2Error};

use crate::util::h2::buffer::window::RecvWindow;
use crate::util::h2::buffer::SendWindow;

/// The connection-level flow-control pair.
///
/// Inbound connection bytes are returned to the peer as soon as they are
/// accepted, because the data immediately moves into a per-stream
/// receive buffer. That keeps the connection window independent of how
/// fast any single stream is consumed, so one unread stream cannot
/// stall the others.
pub(crate) struct FlowControl {
    recv_window: RecvWindow,
    send_window: SendWindow,
}

impl FlowControl {
    pub(crate) fn new(conn_recv_window: u32, conn_send_window: u32) -> Self {
        FlowControl {
            recv_window: RecvWindow::new(conn_recv_window),
            send_window: SendWindow::new(conn_send_window as i32),
        }
    }

    /// Accounts for one received DATA payload and returns the
    /// WINDOW_UPDATE frame to send, if the return threshold is crossed.
    pub(crate) fn recv_data(&mut self, size: u32) -> Result<Option<Frame>, ()> {
        self.recv_window.on_data(size)?;
        Ok(self
            .recv_window
            .on_read(size)
            .map(|increment| RecvWindow::update_frame(0, increment)))
    }

    /// Raises the connection receive window limit, returning the
    /// increment owed to the peer.
    pub(crate) fn set_recv_limit(&mut self, limit: u32) -> u32 {
        self.recv_window.set_limit(limit)
    }

    pub(crate) fn recv_limit(&self) -> u32 {
        self.recv_window.limit()
    }

    pub(crate) fn increase_send_size(&mut self, size: u32) -> Result<(), H2Error> {
        self.send_window.increase_size(size)
    }

    pub(crate) fn send_size_available(&self) -> u32 {
        self.send_window.size_available()
    }

    pub(crate) fn send_data(&mut self, size: u32) {
        self.send_window.send_data(size)
    }
}
