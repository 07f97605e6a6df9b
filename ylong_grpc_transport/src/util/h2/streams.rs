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

//! Streams operations utils.
//!
//! [`Streams`] is the per-connection stream store: it owns every stream's
//! state machine, both flow-control windows, the queued outbound data
//! chunks and the scheduling queues the manager drains. Producers never
//! park here; a stream that cannot make progress is recorded in one of
//! the pending queues and revisited when quota arrives.

use std::collections::{HashMap, HashSet, VecDeque};

use ylong_grpc::h2::{Data, ErrorCode, Frame, FrameFlags, H2Error, Parts, Payload, StreamId};

use crate::error::DispatchErrorKind;
use crate::runtime::UnboundedSender;
use crate::util::h2::buffer::{FlowControl, RecvWindow, SendWindow};

pub(crate) const INITIAL_MAX_SEND_STREAM_ID: StreamId = u32::MAX >> 1;
pub(crate) const INITIAL_MAX_RECV_STREAM_ID: StreamId = u32::MAX >> 1;

const DEFAULT_MAX_STREAM_ID: StreamId = u32::MAX >> 1;
const INITIAL_LATEST_REMOTE_ID: StreamId = 0;
const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// The acknowledgement channel of one queued write.
pub(crate) type WriteAck = UnboundedSender<Result<(), DispatchErrorKind>>;

#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) enum FrameRecvState {
    OK,
    Ignore,
    Err(H2Error),
}

#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) enum StreamEndState {
    OK,
    Ignore,
    Err(H2Error),
}

/// The result of asking a stream for its next DATA frame.
pub(crate) enum DataDispatch {
    /// Nothing is queued.
    Idle,
    /// Data is queued but one of the windows is empty; the stream has
    /// been parked and will be rescheduled when quota arrives.
    Parked,
    /// One frame's worth of data was carved off the queue.
    Frame {
        frame: Frame,
        /// The completed write to acknowledge, if this frame finished a
        /// chunk.
        finished_ack: Option<WriteAck>,
        /// More data remains queued on this stream.
        has_more: bool,
    },
}

//                              +--------+
//                              |  idle  |
//                              +--------+
//                         send H |    | recv H
//                        v       v    v       v
//            +----------+    +--------+    +----------+
//            |   half   | ES |        | ES |   half   |
//            |  closed  |<---|  open  |--->|  closed  |
//            | (local)  |    |        |    | (remote) |
//            +----------+    +--------+    +----------+
//                 |               |              |
//                 | recv ES /     | send R /     | send ES /
//                 | send R /      | recv R       | send R /
//                 | recv R    +--------+         | recv R
//                 `---------->|        |<--------'
//                             | closed |
//                             +--------+
#[derive(Copy, Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) enum H2StreamState {
    Idle,
    // Sending and receiving halves progress independently, so each
    // tracks what it still expects.
    Open {
        send: ActiveState,
        recv: ActiveState,
    },
    // We sent END_STREAM; the inner state is the receiving half.
    LocalHalfClosed(ActiveState),
    // The peer sent END_STREAM; the inner state is the sending half.
    RemoteHalfClosed(ActiveState),
    Closed(CloseReason),
}

#[derive(Copy, Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) enum CloseReason {
    LocalRst,
    RemoteRst,
    RemoteGoAway,
    LocalGoAway,
    EndStream,
}

/// What one half of an active stream still expects. A half in
/// `WaitHeaders` has not carried its opening HEADERS yet; a half in
/// `WaitData` may carry DATA and ends with trailers or END_STREAM.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) enum ActiveState {
    WaitHeaders,
    WaitData,
}

pub(crate) struct OutboundChunk {
    data: Vec<u8>,
    offset: usize,
    end_stream: bool,
    ack: Option<WriteAck>,
}

pub(crate) struct Stream {
    pub(crate) recv_window: RecvWindow,
    pub(crate) send_window: SendWindow,
    pub(crate) state: H2StreamState,
    // A request header block waiting for concurrency admission.
    pub(crate) header: Option<(Parts, bool)>,
    outbound: VecDeque<OutboundChunk>,
}

pub(crate) struct Streams {
    // True for the client side of the connection (odd local ids).
    client: bool,
    // Records the received goaway last_stream_id.
    pub(crate) max_send_id: StreamId,
    // Records the sent goaway last_stream_id.
    pub(crate) max_recv_id: StreamId,
    // Highest peer-initiated stream id seen so far.
    pub(crate) latest_remote_id: StreamId,
    pub(crate) stream_recv_window_size: u32,
    pub(crate) stream_send_window_size: u32,
    max_concurrent_streams: u32,
    current_concurrent_streams: u32,
    max_frame_size: u32,
    pub(crate) flow_control: FlowControl,
    pending_concurrency: VecDeque<StreamId>,
    pending_stream_window: HashSet<StreamId>,
    pending_conn_window: VecDeque<StreamId>,
    pending_send: VecDeque<StreamId>,
    pub(crate) stream_map: HashMap<StreamId, Stream>,
    pub(crate) next_stream_id: StreamId,
}

impl Streams {
    pub(crate) fn new(
        client: bool,
        recv_window_size: u32,
        send_window_size: u32,
        max_frame_size: u32,
        flow_control: FlowControl,
    ) -> Self {
        Self {
            client,
            max_send_id: INITIAL_MAX_SEND_STREAM_ID,
            max_recv_id: INITIAL_MAX_RECV_STREAM_ID,
            latest_remote_id: INITIAL_LATEST_REMOTE_ID,
            stream_recv_window_size: recv_window_size,
            stream_send_window_size: send_window_size,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            current_concurrent_streams: 0,
            max_frame_size,
            flow_control,
            pending_concurrency: VecDeque::new(),
            pending_stream_window: HashSet::new(),
            pending_conn_window: VecDeque::new(),
            pending_send: VecDeque::new(),
            stream_map: HashMap::new(),
            next_stream_id: 1,
        }
    }

    pub(crate) fn decrease_current_concurrency(&mut self) {
        self.current_concurrent_streams = self.current_concurrent_streams.saturating_sub(1);
    }

    pub(crate) fn increase_current_concurrency(&mut self) {
        self.current_concurrent_streams += 1;
    }

    pub(crate) fn reach_max_concurrency(&self) -> bool {
        self.current_concurrent_streams >= self.max_concurrent_streams
    }

    pub(crate) fn concurrent_streams(&self) -> u32 {
        self.current_concurrent_streams
    }

    pub(crate) fn apply_max_concurrent_streams(&mut self, num: u32) {
        self.max_concurrent_streams = num;
    }

    pub(crate) fn apply_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Applies the peer's SETTINGS_INITIAL_WINDOW_SIZE to every stream
    /// send window, waking streams parked on stream quota when it grows.
    pub(crate) fn apply_send_initial_window_size(&mut self, size: u32) -> Result<(), H2Error> {
        let current = self.stream_send_window_size;
        self.stream_send_window_size = size;
        if size > current {
            let excess = size - current;
            for (_id, stream) in self.stream_map.iter_mut() {
                stream.send_window.increase_size(excess)?;
            }
            for id in std::mem::take(&mut self.pending_stream_window) {
                self.pending_send.push_back(id);
            }
        } else if size < current {
            let excess = current - size;
            for (_id, stream) in self.stream_map.iter_mut() {
                stream.send_window.reduce_size(excess);
            }
        }
        Ok(())
    }

    /// Raises the local receive window target on the connection and on
    /// every live stream, returning the connection increment owed to the
    /// peer. Used by the BDP estimator.
    pub(crate) fn apply_recv_window_limit(&mut self, limit: u32) -> u32 {
        self.stream_recv_window_size = limit;
        for (_id, stream) in self.stream_map.iter_mut() {
            stream.recv_window.set_limit(limit);
        }
        self.flow_control.set_recv_limit(limit)
    }

    /// Accounts received DATA against the stream window. Oversending
    /// resets the offending stream.
    pub(crate) fn recv_stream_data(&mut self, id: StreamId, size: u32) -> Result<(), H2Error> {
        if let Some(stream) = self.stream_map.get_mut(&id) {
            if matches!(stream.state, H2StreamState::Closed(_)) {
                return Ok(());
            }
            if stream.recv_window.on_data(size).is_err() {
                return Err(H2Error::StreamError(id, ErrorCode::FlowControlError));
            }
        }
        Ok(())
    }

    /// Accounts bytes consumed by the application and returns the
    /// per-stream WINDOW_UPDATE to send, if due.
    pub(crate) fn release_stream_recv_window(&mut self, id: StreamId, size: u32) -> Option<Frame> {
        let stream = self.stream_map.get_mut(&id)?;
        if matches!(stream.state, H2StreamState::Closed(_)) {
            return None;
        }
        stream
            .recv_window
            .on_read(size)
            .map(|increment| RecvWindow::update_frame(id, increment))
    }

    // Whether the peer initiated this stream id.
    fn is_remote_id(&self, id: StreamId) -> bool {
        if self.client {
            id % 2 == 0
        } else {
            id % 2 == 1
        }
    }

    // Peer-initiated streams above the advertised GOAWAY id are no
    // longer processed.
    fn past_goaway(&self, id: StreamId) -> bool {
        self.is_remote_id(id) && id > self.max_recv_id
    }

    // An untracked id the peer already opened: the stream was refused
    // without being registered, so late frames for it are dropped.
    fn is_settled_remote_id(&self, id: StreamId) -> bool {
        self.is_remote_id(id) && id <= self.latest_remote_id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.stream_map
            .values()
            .all(|stream| matches!(stream.state, H2StreamState::Closed(_)))
    }

    pub(crate) fn stream_state(&self, id: StreamId) -> Option<H2StreamState> {
        self.stream_map.get(&id).map(|stream| stream.state)
    }

    pub(crate) fn generate_id(&mut self) -> Result<StreamId, DispatchErrorKind> {
        let id = self.next_stream_id;
        if self.next_stream_id < DEFAULT_MAX_STREAM_ID {
            self.next_stream_id += 2;
            Ok(id)
        } else {
            Err(DispatchErrorKind::H2(H2Error::ConnectionError(
                ErrorCode::ProtocolError,
            )))
        }
    }

    /// Registers a locally initiated stream whose HEADERS wait for
    /// admission.
    pub(crate) fn insert_local(&mut self, id: StreamId, parts: Parts, end_stream: bool) {
        let mut stream = self.new_stream();
        stream.header = Some((parts, end_stream));
        self.stream_map.insert(id, stream);
    }

    /// Registers a peer-initiated stream.
    pub(crate) fn insert_remote(&mut self, id: StreamId) {
        let stream = self.new_stream();
        self.stream_map.insert(id, stream);
        self.latest_remote_id = id;
    }

    fn new_stream(&self) -> Stream {
        Stream {
            recv_window: RecvWindow::new(self.stream_recv_window_size),
            send_window: SendWindow::new(self.stream_send_window_size as i32),
            state: H2StreamState::Idle,
            header: None,
            outbound: VecDeque::new(),
        }
    }

    pub(crate) fn take_header(&mut self, id: StreamId) -> Option<(Parts, bool)> {
        self.stream_map.get_mut(&id).and_then(|s| s.header.take())
    }

    pub(crate) fn push_back_pending_send(&mut self, id: StreamId) {
        self.pending_send.push_back(id);
    }

    pub(crate) fn push_pending_concurrency(&mut self, id: StreamId) {
        self.pending_concurrency.push_back(id);
    }

    pub(crate) fn is_pending_concurrency_empty(&self) -> bool {
        self.pending_concurrency.is_empty()
    }

    pub(crate) fn next_pending_stream(&mut self) -> Option<StreamId> {
        self.pending_send.pop_front()
    }

    pub(crate) fn pending_stream_num(&self) -> usize {
        self.pending_send.len()
    }

    /// Admits queued streams while the peer's concurrency limit allows,
    /// returning the admitted ids.
    pub(crate) fn try_consume_pending_concurrency(&mut self) -> Vec<StreamId> {
        let mut admitted = Vec::new();
        while !self.reach_max_concurrency() {
            match self.pending_concurrency.pop_front() {
                None => break,
                Some(id) => {
                    // Skip streams that died while waiting.
                    if !matches!(
                        self.stream_state(id),
                        Some(H2StreamState::Idle)
                    ) {
                        continue;
                    }
                    self.increase_current_concurrency();
                    admitted.push(id);
                }
            }
        }
        admitted
    }

    /// Rejects every stream still waiting for concurrency admission,
    /// returning their ids. Used when the transport starts draining.
    pub(crate) fn reject_pending_streams(&mut self) -> Vec<StreamId> {
        let ids: Vec<StreamId> = self.pending_concurrency.drain(..).collect();
        for id in ids.iter() {
            if let Some(stream) = self.stream_map.get_mut(id) {
                if matches!(stream.state, H2StreamState::Idle) {
                    stream.state = H2StreamState::Closed(CloseReason::LocalGoAway);
                    stream.header = None;
                }
            }
        }
        ids
    }

    pub(crate) fn increase_conn_send_window(&mut self, size: u32) -> Result<(), H2Error> {
        self.flow_control.increase_send_size(size)
    }

    /// All conn-window-parked streams go back to the send queue after a
    /// connection window grant.
    pub(crate) fn reassign_conn_send_window(&mut self) {
        while let Some(id) = self.pending_conn_window.pop_front() {
            self.push_back_pending_send(id);
        }
    }

    pub(crate) fn reassign_stream_send_window(
        &mut self,
        id: StreamId,
        size: u32,
    ) -> Result<(), H2Error> {
        if let Some(stream) = self.stream_map.get_mut(&id) {
            stream.send_window.increase_size(size)?;
        }
        if self.pending_stream_window.remove(&id) {
            self.pending_send.push_back(id);
        }
        Ok(())
    }

    /// Checks whether a stream can accept another outbound chunk.
    pub(crate) fn can_queue(&self, id: StreamId) -> Result<(), H2Error> {
        let stream = match self.stream_map.get(&id) {
            None => return Err(H2Error::StreamError(id, ErrorCode::StreamClosed)),
            Some(stream) => stream,
        };
        match stream.state {
            H2StreamState::Closed(_) | H2StreamState::LocalHalfClosed(_) => {
                return Err(H2Error::StreamError(id, ErrorCode::StreamClosed));
            }
            _ => {}
        }
        if let Some(chunk) = stream.outbound.back() {
            // Nothing may follow an end-of-stream chunk.
            if chunk.end_stream {
                return Err(H2Error::StreamError(id, ErrorCode::StreamClosed));
            }
        }
        Ok(())
    }

    /// Queues application bytes for sending. The ack fires once the
    /// whole chunk has cleared both quota pools and entered the frame
    /// queue.
    pub(crate) fn queue_outbound(
        &mut self,
        id: StreamId,
        data: Vec<u8>,
        end_stream: bool,
        ack: Option<WriteAck>,
    ) -> Result<(), H2Error> {
        let stream = match self.stream_map.get_mut(&id) {
            None => return Err(H2Error::StreamError(id, ErrorCode::StreamClosed)),
            Some(stream) => stream,
        };
        match stream.state {
            H2StreamState::Closed(_) | H2StreamState::LocalHalfClosed(_) => {
                return Err(H2Error::StreamError(id, ErrorCode::StreamClosed));
            }
            _ => {}
        }
        if let Some(chunk) = stream.outbound.back() {
            // Nothing may follow an end-of-stream chunk.
            if chunk.end_stream {
                return Err(H2Error::StreamError(id, ErrorCode::StreamClosed));
            }
        }
        stream.outbound.push_back(OutboundChunk {
            data,
            offset: 0,
            end_stream,
            ack,
        });
        Ok(())
    }

    /// Carves the next DATA frame off a stream's outbound queue under
    /// both flow-control windows and the peer max frame size.
    pub(crate) fn next_data_frame(&mut self, id: StreamId) -> Result<DataDispatch, H2Error> {
        let max_frame = self.max_frame_size as usize;
        let conn_available = self.flow_control.send_size_available() as usize;
        let stream = match self.stream_map.get_mut(&id) {
            None => return Ok(DataDispatch::Idle),
            Some(stream) => stream,
        };
        if matches!(stream.state, H2StreamState::Closed(_)) {
            return Ok(DataDispatch::Idle);
        }
        let chunk = match stream.outbound.front_mut() {
            None => return Ok(DataDispatch::Idle),
            Some(chunk) => chunk,
        };

        let remaining = chunk.data.len() - chunk.offset;
        let len = if remaining > 0 {
            let stream_available = stream.send_window.size_available() as usize;
            if stream_available == 0 {
                self.pending_stream_window.insert(id);
                return Ok(DataDispatch::Parked);
            }
            if conn_available == 0 {
                self.pending_conn_window.push_back(id);
                return Ok(DataDispatch::Parked);
            }
            remaining.min(stream_available).min(conn_available).min(max_frame)
        } else {
            0
        };

        let bytes = chunk.data[chunk.offset..chunk.offset + len].to_vec();
        chunk.offset += len;
        let finished = chunk.offset == chunk.data.len();
        let end_stream = finished && chunk.end_stream;

        stream.send_window.send_data(len as u32);
        self.flow_control.send_data(len as u32);

        let finished_ack = if finished {
            stream.outbound.pop_front().and_then(|chunk| chunk.ack)
        } else {
            None
        };
        let has_more = !self.stream_map.get(&id).map_or(true, |s| s.outbound.is_empty());

        if let FrameRecvState::Err(e) = self.send_data_frame(id, end_stream) {
            return Err(e);
        }

        let mut flags = FrameFlags::empty();
        flags.set_end_stream(end_stream);
        Ok(DataDispatch::Frame {
            frame: Frame::new(id, flags, Payload::Data(Data::new(bytes))),
            finished_ack,
            has_more,
        })
    }

    /// Fails and clears every queued write of a stream, returning the
    /// ack channels to notify.
    pub(crate) fn take_pending_acks(&mut self, id: StreamId) -> Vec<WriteAck> {
        match self.stream_map.get_mut(&id) {
            None => Vec::new(),
            Some(stream) => stream
                .outbound
                .drain(..)
                .filter_map(|chunk| chunk.ack)
                .collect(),
        }
    }

    /// Marks streams above the peer's GOAWAY last-stream-id as refused
    /// and returns their ids.
    pub(crate) fn get_goaway_streams(
        &mut self,
        last_stream_id: StreamId,
    ) -> Result<Vec<StreamId>, H2Error> {
        // A later GOAWAY may not raise the previous last-stream-id.
        if self.max_send_id < last_stream_id {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        self.max_send_id = last_stream_id;
        let mut ids = vec![];
        for (id, stream) in self.stream_map.iter_mut() {
            let local = if self.client {
                *id % 2 == 1
            } else {
                *id % 2 == 0
            };
            if local && *id > last_stream_id {
                match stream.state {
                    H2StreamState::Closed(_) => {}
                    H2StreamState::Idle => {
                        stream.state = H2StreamState::Closed(CloseReason::RemoteGoAway);
                        stream.header = None;
                        ids.push(*id);
                    }
                    _ => {
                        self.current_concurrent_streams -= 1;
                        stream.state = H2StreamState::Closed(CloseReason::RemoteGoAway);
                        stream.header = None;
                        ids.push(*id);
                    }
                }
            }
        }
        Ok(ids)
    }

    /// Closes every live stream, for connection teardown. Returns the
    /// ids that were still open.
    pub(crate) fn get_all_unclosed_streams(&mut self) -> Vec<StreamId> {
        let mut ids = vec![];
        for (id, stream) in self.stream_map.iter_mut() {
            match stream.state {
                H2StreamState::Closed(_) => {}
                _ => {
                    stream.header = None;
                    stream.state = H2StreamState::Closed(CloseReason::LocalGoAway);
                    ids.push(*id);
                }
            }
        }
        self.current_concurrent_streams = 0;
        ids
    }

    pub(crate) fn clear_streams_states(&mut self) {
        self.pending_stream_window.clear();
        self.pending_send.clear();
        self.pending_conn_window.clear();
        self.pending_concurrency.clear();
    }

    pub(crate) fn send_local_reset(&mut self, id: StreamId) -> StreamEndState {
        match self.stream_map.get_mut(&id) {
            None => StreamEndState::Ignore,
            Some(stream) => match stream.state {
                H2StreamState::Closed(
                    CloseReason::LocalRst
                    | CloseReason::LocalGoAway
                    | CloseReason::RemoteRst
                    | CloseReason::RemoteGoAway,
                ) => StreamEndState::Ignore,
                H2StreamState::Closed(CloseReason::EndStream) => {
                    stream.state = H2StreamState::Closed(CloseReason::LocalRst);
                    StreamEndState::Ignore
                }
                _ => {
                    stream.state = H2StreamState::Closed(CloseReason::LocalRst);
                    stream.header = None;
                    self.decrease_current_concurrency();
                    StreamEndState::OK
                }
            },
        }
    }

    pub(crate) fn recv_remote_reset(&mut self, id: StreamId) -> StreamEndState {
        if self.past_goaway(id) || self.is_settled_remote_id(id) && !self.stream_map.contains_key(&id) {
            return StreamEndState::Ignore;
        }
        match self.stream_map.get_mut(&id) {
            None => StreamEndState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
            Some(stream) => match stream.state {
                H2StreamState::Closed(..) => StreamEndState::Ignore,
                _ => {
                    stream.state = H2StreamState::Closed(CloseReason::RemoteRst);
                    stream.header = None;
                    self.decrease_current_concurrency();
                    StreamEndState::OK
                }
            },
        }
    }

    pub(crate) fn send_headers_frame(&mut self, id: StreamId, eos: bool) -> FrameRecvState {
        match self.stream_map.get_mut(&id) {
            None => FrameRecvState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
            Some(stream) => {
                match stream.state {
                    // A racing close already won; nothing to send.
                    H2StreamState::Closed(_) => return FrameRecvState::Ignore,
                    H2StreamState::Idle => {
                        stream.state = if eos {
                            H2StreamState::LocalHalfClosed(ActiveState::WaitHeaders)
                        } else {
                            H2StreamState::Open {
                                send: ActiveState::WaitData,
                                recv: ActiveState::WaitHeaders,
                            }
                        };
                    }
                    H2StreamState::Open {
                        send: ActiveState::WaitHeaders,
                        recv,
                    } => {
                        stream.state = if eos {
                            H2StreamState::LocalHalfClosed(recv)
                        } else {
                            H2StreamState::Open {
                                send: ActiveState::WaitData,
                                recv,
                            }
                        };
                    }
                    // Trailers after DATA on the sending half.
                    H2StreamState::Open {
                        send: ActiveState::WaitData,
                        recv,
                    } if eos => {
                        stream.state = H2StreamState::LocalHalfClosed(recv);
                    }
                    H2StreamState::RemoteHalfClosed(_) if eos => {
                        stream.state = H2StreamState::Closed(CloseReason::EndStream);
                        self.decrease_current_concurrency();
                    }
                    H2StreamState::RemoteHalfClosed(ActiveState::WaitHeaders) => {
                        stream.state = H2StreamState::RemoteHalfClosed(ActiveState::WaitData);
                    }
                    _ => {
                        return FrameRecvState::Err(H2Error::ConnectionError(
                            ErrorCode::ProtocolError,
                        ));
                    }
                }
                FrameRecvState::OK
            }
        }
    }

    pub(crate) fn send_data_frame(&mut self, id: StreamId, eos: bool) -> FrameRecvState {
        match self.stream_map.get_mut(&id) {
            None => FrameRecvState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
            Some(stream) => {
                match stream.state {
                    H2StreamState::Closed(_) => return FrameRecvState::Ignore,
                    H2StreamState::Open {
                        send: ActiveState::WaitData,
                        recv,
                    } => {
                        if eos {
                            stream.state = H2StreamState::LocalHalfClosed(recv);
                        }
                    }
                    H2StreamState::RemoteHalfClosed(ActiveState::WaitData) => {
                        if eos {
                            stream.state = H2StreamState::Closed(CloseReason::EndStream);
                            self.decrease_current_concurrency();
                        }
                    }
                    _ => {
                        return FrameRecvState::Err(H2Error::ConnectionError(
                            ErrorCode::ProtocolError,
                        ));
                    }
                }
                FrameRecvState::OK
            }
        }
    }

    pub(crate) fn recv_headers(&mut self, id: StreamId, eos: bool) -> FrameRecvState {
        if self.past_goaway(id) || self.is_settled_remote_id(id) && !self.stream_map.contains_key(&id) {
            return FrameRecvState::Ignore;
        }
        match self.stream_map.get_mut(&id) {
            None => FrameRecvState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
            Some(stream) => {
                match stream.state {
                    H2StreamState::Idle => {
                        stream.state = if eos {
                            H2StreamState::RemoteHalfClosed(ActiveState::WaitHeaders)
                        } else {
                            H2StreamState::Open {
                                send: ActiveState::WaitHeaders,
                                recv: ActiveState::WaitData,
                            }
                        };
                    }
                    H2StreamState::Open {
                        send,
                        recv: ActiveState::WaitHeaders,
                    } => {
                        stream.state = if eos {
                            H2StreamState::RemoteHalfClosed(send)
                        } else {
                            H2StreamState::Open {
                                send,
                                recv: ActiveState::WaitData,
                            }
                        };
                    }
                    // Trailers after DATA on the receiving half.
                    H2StreamState::Open {
                        send,
                        recv: ActiveState::WaitData,
                    } if eos => {
                        stream.state = H2StreamState::RemoteHalfClosed(send);
                    }
                    H2StreamState::LocalHalfClosed(_) if eos => {
                        stream.state = H2StreamState::Closed(CloseReason::EndStream);
                        self.decrease_current_concurrency();
                    }
                    H2StreamState::LocalHalfClosed(ActiveState::WaitHeaders) => {
                        stream.state = H2StreamState::LocalHalfClosed(ActiveState::WaitData);
                    }
                    // Frames may still be in flight after any close.
                    H2StreamState::Closed(_) => {
                        return FrameRecvState::Ignore;
                    }
                    _ => {
                        return FrameRecvState::Err(H2Error::ConnectionError(
                            ErrorCode::ProtocolError,
                        ));
                    }
                }
                FrameRecvState::OK
            }
        }
    }

    pub(crate) fn recv_data(&mut self, id: StreamId, eos: bool) -> FrameRecvState {
        if self.past_goaway(id) || self.is_settled_remote_id(id) && !self.stream_map.contains_key(&id) {
            return FrameRecvState::Ignore;
        }
        match self.stream_map.get_mut(&id) {
            None => FrameRecvState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
            Some(stream) => {
                match stream.state {
                    H2StreamState::Open {
                        send,
                        recv: ActiveState::WaitData,
                    } => {
                        if eos {
                            stream.state = H2StreamState::RemoteHalfClosed(send);
                        }
                    }
                    H2StreamState::LocalHalfClosed(ActiveState::WaitData) => {
                        if eos {
                            stream.state = H2StreamState::Closed(CloseReason::EndStream);
                            self.decrease_current_concurrency();
                        }
                    }
                    // Frames may still be in flight after any close.
                    H2StreamState::Closed(_) => {
                        return FrameRecvState::Ignore;
                    }
                    _ => {
                        return FrameRecvState::Err(H2Error::ConnectionError(
                            ErrorCode::ProtocolError,
                        ));
                    }
                }
                FrameRecvState::OK
            }
        }
    }
}

#[cfg(test)]
mod ut_streams {
    use super::*;

    fn streams(client: bool) -> Streams {
        Streams::new(client, 100, 100, 16384, FlowControl::new(100, 100))
    }

    fn open_stream(streams: &mut Streams, id: StreamId) {
        streams.insert_local(id, Parts::new(), false);
        streams.increase_current_concurrency();
        assert!(matches!(
            streams.send_headers_frame(id, false),
            FrameRecvState::OK
        ));
    }

    /// UT test case for the client request/response state walk.
    ///
    /// # Brief
    /// 1. Opens a stream, sends DATA with END_STREAM, receives response
    ///    HEADERS, DATA and trailers.
    /// 2. Checks every intermediate state.
    #[test]
    fn ut_streams_client_state_walk() {
        let mut streams = streams(true);
        streams.insert_local(1, Parts::new(), false);
        streams.increase_current_concurrency();

        assert_eq!(streams.send_headers_frame(1, false), FrameRecvState::OK);
        assert_eq!(
            streams.stream_state(1).unwrap(),
            H2StreamState::Open {
                send: ActiveState::WaitData,
                recv: ActiveState::WaitHeaders,
            }
        );

        assert_eq!(streams.send_data_frame(1, true), FrameRecvState::OK);
        assert_eq!(
            streams.stream_state(1).unwrap(),
            H2StreamState::LocalHalfClosed(ActiveState::WaitHeaders)
        );

        assert_eq!(streams.recv_headers(1, false), FrameRecvState::OK);
        assert_eq!(
            streams.stream_state(1).unwrap(),
            H2StreamState::LocalHalfClosed(ActiveState::WaitData)
        );

        assert_eq!(streams.recv_data(1, false), FrameRecvState::OK);
        // Trailers close the stream.
        assert_eq!(streams.recv_headers(1, true), FrameRecvState::OK);
        assert_eq!(
            streams.stream_state(1).unwrap(),
            H2StreamState::Closed(CloseReason::EndStream)
        );
        assert_eq!(streams.concurrent_streams(), 0);
    }

    /// UT test case for the server response state walk with trailers.
    ///
    /// # Brief
    /// 1. Receives request HEADERS with END_STREAM.
    /// 2. Sends response HEADERS, DATA and trailing HEADERS.
    /// 3. Checks the final state is closed.
    #[test]
    fn ut_streams_server_state_walk() {
        let mut streams = streams(false);
        streams.insert_remote(1);
        streams.increase_current_concurrency();

        assert_eq!(streams.recv_headers(1, true), FrameRecvState::OK);
        assert_eq!(
            streams.stream_state(1).unwrap(),
            H2StreamState::RemoteHalfClosed(ActiveState::WaitHeaders)
        );

        assert_eq!(streams.send_headers_frame(1, false), FrameRecvState::OK);
        assert_eq!(
            streams.stream_state(1).unwrap(),
            H2StreamState::RemoteHalfClosed(ActiveState::WaitData)
        );

        assert_eq!(streams.send_data_frame(1, false), FrameRecvState::OK);
        assert_eq!(streams.send_headers_frame(1, true), FrameRecvState::OK);
        assert_eq!(
            streams.stream_state(1).unwrap(),
            H2StreamState::Closed(CloseReason::EndStream)
        );
    }

    /// UT test case for `Streams::next_data_frame` windows and parking.
    ///
    /// # Brief
    /// 1. Queues a chunk larger than the stream window.
    /// 2. Checks that a window-sized frame is carved and the stream
    ///    parks afterwards.
    /// 3. Grants stream window and checks the stream is rescheduled and
    ///    finishes, acknowledging the write.
    #[test]
    fn ut_streams_next_data_frame() {
        let mut streams = Streams::new(true, 100, 100, 16384, FlowControl::new(100, 1000));
        open_stream(&mut streams, 1);

        let (ack_tx, mut ack_rx) = crate::runtime::unbounded_channel();
        streams
            .queue_outbound(1, vec![7u8; 150], true, Some(ack_tx))
            .unwrap();

        match streams.next_data_frame(1).unwrap() {
            DataDispatch::Frame {
                frame,
                finished_ack,
                has_more,
            } => {
                match frame.payload() {
                    Payload::Data(data) => assert_eq!(data.size(), 100),
                    _ => panic!("unexpected payload"),
                }
                assert!(!frame.flags().is_end_stream());
                assert!(finished_ack.is_none());
                assert!(has_more);
            }
            _ => panic!("expected a frame"),
        }
        // The stream window is exhausted now.
        assert!(matches!(
            streams.next_data_frame(1).unwrap(),
            DataDispatch::Parked
        ));

        streams.reassign_stream_send_window(1, 100).unwrap();
        assert_eq!(streams.next_pending_stream(), Some(1));
        match streams.next_data_frame(1).unwrap() {
            DataDispatch::Frame {
                frame, finished_ack, ..
            } => {
                assert!(frame.flags().is_end_stream());
                assert!(finished_ack.is_some());
                finished_ack.unwrap().send(Ok(())).unwrap();
            }
            _ => panic!("expected a frame"),
        }
        assert_eq!(ack_rx.try_recv().unwrap(), Ok(()));
        assert!(matches!(
            streams.next_data_frame(1).unwrap(),
            DataDispatch::Idle
        ));
    }

    /// UT test case for `Streams::queue_outbound` after end of stream.
    ///
    /// # Brief
    /// 1. Queues an end-of-stream chunk.
    /// 2. Queues another chunk and checks it is rejected.
    #[test]
    fn ut_streams_queue_after_end() {
        let mut streams = streams(true);
        open_stream(&mut streams, 1);
        streams.queue_outbound(1, vec![1], true, None).unwrap();
        assert!(streams.queue_outbound(1, vec![2], false, None).is_err());
    }

    /// UT test case for `Streams::recv_stream_data` oversend.
    ///
    /// # Brief
    /// 1. Receives data up to the stream window.
    /// 2. Receives one more byte and checks the stream-level
    ///    flow-control error.
    #[test]
    fn ut_streams_recv_stream_data_oversend() {
        let mut streams = streams(true);
        open_stream(&mut streams, 1);
        assert!(streams.recv_stream_data(1, 100).is_ok());
        assert_eq!(
            streams.recv_stream_data(1, 1),
            Err(H2Error::StreamError(1, ErrorCode::FlowControlError))
        );
    }

    /// UT test case for `Streams::get_goaway_streams`.
    ///
    /// # Brief
    /// 1. Opens local streams 1, 3 and 5 and closes 5.
    /// 2. Applies a GOAWAY with last stream id 1.
    /// 3. Checks only stream 3 is swept and a higher re-advertisement is
    ///    rejected.
    #[test]
    fn ut_streams_get_goaway_streams() {
        let mut streams = streams(true);
        open_stream(&mut streams, 1);
        open_stream(&mut streams, 3);
        open_stream(&mut streams, 5);
        assert!(matches!(
            streams.send_local_reset(5),
            StreamEndState::OK
        ));

        let swept = streams.get_goaway_streams(1).unwrap();
        assert_eq!(swept, vec![3]);
        assert_eq!(
            streams.stream_state(3).unwrap(),
            H2StreamState::Closed(CloseReason::RemoteGoAway)
        );
        assert_eq!(
            streams.stream_state(1).unwrap(),
            H2StreamState::Open {
                send: ActiveState::WaitData,
                recv: ActiveState::WaitHeaders,
            }
        );

        assert_eq!(
            streams.get_goaway_streams(3),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test case for reset handling on both sides.
    ///
    /// # Brief
    /// 1. Resets an open stream locally and checks later remote frames
    ///    are ignored.
    /// 2. Receives a remote reset on another stream and checks the
    ///    repeated reset is ignored.
    #[test]
    fn ut_streams_resets() {
        let mut streams = streams(true);
        open_stream(&mut streams, 1);
        open_stream(&mut streams, 3);

        assert!(matches!(streams.send_local_reset(1), StreamEndState::OK));
        assert!(matches!(
            streams.recv_data(1, false),
            FrameRecvState::Ignore
        ));
        assert!(matches!(
            streams.recv_headers(1, true),
            FrameRecvState::Ignore
        ));

        assert!(matches!(streams.recv_remote_reset(3), StreamEndState::OK));
        assert!(matches!(
            streams.recv_remote_reset(3),
            StreamEndState::Ignore
        ));
        assert!(streams.is_closed());
    }

    /// UT test case for concurrency admission.
    ///
    /// # Brief
    /// 1. Limits concurrency to one and queues two streams.
    /// 2. Admits one, closes it, and checks the second is admitted
    ///    afterwards.
    #[test]
    fn ut_streams_concurrency_admission() {
        let mut streams = streams(true);
        streams.apply_max_concurrent_streams(1);
        streams.insert_local(1, Parts::new(), false);
        streams.insert_local(3, Parts::new(), false);
        streams.push_pending_concurrency(1);
        streams.push_pending_concurrency(3);

        assert_eq!(streams.try_consume_pending_concurrency(), vec![1]);
        assert!(streams.reach_max_concurrency());
        assert_eq!(streams.send_headers_frame(1, false), FrameRecvState::OK);

        assert!(matches!(streams.send_local_reset(1), StreamEndState::OK));
        assert_eq!(streams.try_consume_pending_concurrency(), vec![3]);
    }
}
