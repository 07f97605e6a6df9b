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

//! http2 send and recv window definition.

use ylong_grpc::h2::{ErrorCode, Frame, FrameFlags, H2Error, Payload, StreamId, WindowUpdate};

use crate::util::h2::MAX_FLOW_CONTROL_WINDOW;

/// The receiving side of one flow-control scope.
///
/// `limit` is the window advertised to the peer. `pending_data` counts
/// bytes received but not yet consumed by the reader; `pending_update`
/// counts bytes consumed but not yet returned to the peer through a
/// WINDOW_UPDATE. An update is emitted once a quarter of the window has
/// been consumed, so small reads coalesce into few frames.
pub(crate) struct RecvWindow {
    limit: u32,
    pending_data: u32,
    pending_update: u32,
}

impl RecvWindow {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            limit,
            pending_data: 0,
            pending_update: 0,
        }
    }

    pub(crate) fn limit(&self) -> u32 {
        self.limit
    }

    /// Accounts for received payload bytes. Fails when the peer
    /// oversends: in-flight plus unconsumed bytes never exceed the
    /// advertised window.
    pub(crate) fn on_data(&mut self, size: u32) -> Result<(), ()> {
        let outstanding = self.pending_data as u64 + self.pending_update as u64 + size as u64;
        if outstanding > self.limit as u64 {
            return Err(());
        }
        self.pending_data += size;
        Ok(())
    }

    /// Accounts for bytes consumed by the reader and returns the
    /// increment to send once the quarter-window threshold is crossed.
    pub(crate) fn on_read(&mut self, size: u32) -> Option<u32> {
        self.pending_data = self.pending_data.saturating_sub(size);
        self.pending_update += size;
        if self.pending_update >= self.limit / 4 {
            let update = self.pending_update;
            self.pending_update = 0;
            Some(update)
        } else {
            None
        }
    }

    /// Raises the advertised window to `limit` and returns the increment
    /// owed to the peer for the growth. Shrinking takes effect lazily
    /// through update accounting.
    pub(crate) fn set_limit(&mut self, limit: u32) -> u32 {
        let grown = limit.saturating_sub(self.limit);
        self.limit = limit;
        grown
    }

    /// Builds a WINDOW_UPDATE frame for this scope.
    pub(crate) fn update_frame(id: StreamId, increment: u32) -> Frame {
        Frame::new(
            id,
            FrameFlags::empty(),
            Payload::WindowUpdate(WindowUpdate::new(increment)),
        )
    }
}

/// The sending side of one flow-control scope: the window the peer has
/// granted us. The size may go negative when the peer shrinks
/// SETTINGS_INITIAL_WINDOW_SIZE below bytes already in flight.
pub(crate) struct SendWindow {
    size: i32,
}

impl SendWindow {
    pub(crate) fn new(size: i32) -> Self {
        Self { size }
    }

    pub(crate) fn size_available(&self) -> u32 {
        if self.size < 0 {
            0
        } else {
            self.size as u32
        }
    }

    pub(crate) fn reduce_size(&mut self, size: u32) {
        self.size -= size as i32;
    }

    pub(crate) fn increase_size(&mut self, size: u32) -> Result<(), H2Error> {
        let (curr, overflow) = self.size.overflowing_add(size as i32);
        if overflow {
            return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
        }
        if curr > MAX_FLOW_CONTROL_WINDOW as i32 {
            return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
        }
        self.size = curr;
        Ok(())
    }

    pub(crate) fn send_data(&mut self, size: u32) {
        self.size -= size as i32;
    }
}

#[cfg(test)]
mod ut_recv_window {
    use super::*;

    /// UT test case for `RecvWindow::on_data` overspend detection.
    ///
    /// # Brief
    /// 1. Receives bytes up to the advertised limit.
    /// 2. Receives one more byte and checks the violation.
    #[test]
    fn ut_rw_on_data() {
        let mut rw = RecvWindow::new(100);
        assert!(rw.on_data(100).is_ok());
        assert!(rw.on_data(1).is_err());
    }

    /// UT test case for `RecvWindow::on_read` threshold behavior.
    ///
    /// # Brief
    /// 1. Consumes less than a quarter of the window and checks that no
    ///    update is produced.
    /// 2. Crosses the quarter threshold and checks the accumulated
    ///    increment is returned and reset.
    #[test]
    fn ut_rw_on_read() {
        let mut rw = RecvWindow::new(100);
        rw.on_data(60).unwrap();
        assert_eq!(rw.on_read(10), None);
        assert_eq!(rw.on_read(20), Some(30));
        assert_eq!(rw.on_read(5), None);
        // Space freed by updates can be received again.
        assert!(rw.on_data(65).is_ok());
    }

    /// UT test case for `RecvWindow::set_limit`.
    ///
    /// # Brief
    /// 1. Raises the limit and checks the growth increment.
    /// 2. Lowers the limit and checks that no increment is owed.
    #[test]
    fn ut_rw_set_limit() {
        let mut rw = RecvWindow::new(100);
        assert_eq!(rw.set_limit(300), 200);
        assert_eq!(rw.limit(), 300);
        assert_eq!(rw.set_limit(50), 0);
    }
}

#[cfg(test)]
mod ut_send_window {
    use super::*;

    /// UT test case for `SendWindow::size_available`.
    ///
    /// # Brief
    /// 1. Creates windows with positive and negative sizes.
    /// 2. Checks that a negative window reports zero available.
    #[test]
    fn ut_sw_size_available() {
        let sw = SendWindow::new(100);
        assert_eq!(sw.size_available(), 100);
        let sw = SendWindow::new(-1);
        assert_eq!(sw.size_available(), 0);
    }

    /// UT test case for `SendWindow::increase_size` overflow handling.
    ///
    /// # Brief
    /// 1. Increases a window normally.
    /// 2. Overflows the window and checks the flow-control error.
    #[test]
    fn ut_sw_increase_size() {
        let mut sw = SendWindow::new(100);
        assert!(sw.increase_size(50).is_ok());
        assert_eq!(sw.size_available(), 150);

        let mut sw = SendWindow::new(1);
        assert_eq!(
            sw.increase_size(MAX_FLOW_CONTROL_WINDOW),
            Err(H2Error::ConnectionError(ErrorCode::FlowControlError))
        );
    }

    /// UT test case for `SendWindow::send_data` and `reduce_size`.
    ///
    /// # Brief
    /// 1. Sends data past the granted window.
    /// 2. Checks the window goes negative and reports zero available.
    #[test]
    fn ut_sw_send_data() {
        let mut sw = SendWindow::new(100);
        sw.send_data(60);
        assert_eq!(sw.size_available(), 40);
        sw.reduce_size(50);
        assert_eq!(sw.size_available(), 0);
    }
}
