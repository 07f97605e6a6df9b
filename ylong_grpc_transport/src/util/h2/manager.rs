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

//! Connection manage task.
//!
//! `ConnManager` is the brain of one transport: it routes every frame
//! the reader decodes, consumes the events stream handles enqueue,
//! applies both flow-control levels before DATA reaches the writer, and
//! coordinates keepalive, BDP sampling, GOAWAY drains and teardown. All
//! stream and window state is mutated only here, so no other task needs
//! a lock on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ylong_grpc::h2::{
    ErrorCode, Frame, FrameFlags, Goaway, H2Error, Parts, Payload, Ping, RstStream, Setting,
    Settings, SettingsBuilder, StreamId,
};

use crate::config::KeepalivePolicy;
use crate::error::DispatchErrorKind;
use crate::keepalive::TransportState;
use crate::runtime::{select, UnboundedReceiver, UnboundedSender};
use crate::util::h2::bdp::BdpEstimator;
use crate::util::h2::streams::{
    DataDispatch, FrameRecvState, H2StreamState, StreamEndState, Streams, WriteAck,
};
use crate::util::h2::BDP_PING;

// Pings arriving without active streams are held to this spacing when
// the policy does not permit them.
const STREAMLESS_PING_SPACING: std::time::Duration = std::time::Duration::from_secs(2 * 60 * 60);
const MAX_PING_STRIKES: u8 = 2;

/// Messages from the reader task to the manager.
pub(crate) enum OutputMessage {
    Output(Frame),
    OutputExit(DispatchErrorKind),
}

/// Messages from the manager to one stream handle.
pub(crate) enum StreamMessage {
    /// The stream was admitted and its HEADERS queued (client side).
    Started(StreamId),
    /// A header block arrived: initial metadata or trailers.
    Headers { parts: Parts, end_stream: bool },
    /// A DATA payload arrived.
    Data { data: Vec<u8>, end_stream: bool },
    /// The peer reset the stream.
    Reset { code: ErrorCode },
    /// The stream was refused because the connection is draining.
    GoingAway,
    /// The transport failed; the stream dies with it.
    Error(DispatchErrorKind),
}

/// Events from stream handles, the transports and the keepalive task.
pub(crate) enum StreamEvent {
    NewStream {
        parts: Parts,
        end_stream: bool,
        resp_tx: UnboundedSender<StreamMessage>,
    },
    Write {
        id: StreamId,
        data: Vec<u8>,
        end_stream: bool,
        ack: WriteAck,
    },
    WriteHeaders {
        id: StreamId,
        parts: Parts,
        end_stream: bool,
    },
    WindowRelease {
        id: StreamId,
        size: u32,
    },
    Cancel {
        id: StreamId,
        code: ErrorCode,
    },
    GracefulClose,
    IdleTimeout,
    Ping {
        data: [u8; 8],
    },
    CloseConn {
        kind: DispatchErrorKind,
    },
}

/// A peer-initiated stream handed to the server transport.
pub(crate) struct IncomingStream {
    pub(crate) id: StreamId,
    pub(crate) parts: Parts,
    pub(crate) end_stream: bool,
    pub(crate) resp_rx: UnboundedReceiver<StreamMessage>,
}

#[derive(Default)]
pub(crate) struct SettingsSync {
    pub(crate) settings: SettingsState,
}

#[derive(Default, Clone)]
pub(crate) enum SettingsState {
    Acknowledging(Settings),
    #[default]
    Synced,
}

#[derive(Default)]
struct GoAwaySync {
    going_away: Option<Goaway>,
}

/// The endpoint-specific half of the manager.
pub(crate) enum TransportRole {
    Client,
    Server {
        accept_tx: UnboundedSender<IncomingStream>,
        policy: KeepalivePolicy,
        max_streams: u32,
        last_ping: Option<Instant>,
        ping_strikes: u8,
    },
}

pub(crate) struct ConnManager {
    role: TransportRole,
    state: Arc<TransportState>,
    settings: Arc<Mutex<SettingsSync>>,
    frame_tx: UnboundedSender<Frame>,
    resp_rx: UnboundedReceiver<OutputMessage>,
    req_rx: UnboundedReceiver<StreamEvent>,
    // The senders of all connected stream channels.
    senders: HashMap<StreamId, UnboundedSender<StreamMessage>>,
    streams: Streams,
    bdp: Option<BdpEstimator>,
    go_away_sync: GoAwaySync,
    // Error code of a received GOAWAY.
    go_away_received: Option<u32>,
    draining: bool,
}

impl ConnManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        role: TransportRole,
        state: Arc<TransportState>,
        settings: Arc<Mutex<SettingsSync>>,
        frame_tx: UnboundedSender<Frame>,
        resp_rx: UnboundedReceiver<OutputMessage>,
        req_rx: UnboundedReceiver<StreamEvent>,
        streams: Streams,
        bdp: Option<BdpEstimator>,
    ) -> Self {
        Self {
            role,
            state,
            settings,
            frame_tx,
            resp_rx,
            req_rx,
            senders: HashMap::new(),
            streams,
            bdp,
            go_away_sync: GoAwaySync::default(),
            go_away_received: None,
            draining: false,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), DispatchErrorKind> {
        match self.main_loop().await {
            Ok(()) => {
                // A drain completed. Answer a received GOAWAY in kind so
                // the peer can tear down cleanly.
                if self.go_away_received.is_some() && self.go_away_sync.going_away.is_none() {
                    self.send_go_away(ErrorCode::NoError, Vec::new());
                }
                self.state.shutdown();
                Ok(())
            }
            Err(kind) => {
                if let DispatchErrorKind::H2(H2Error::ConnectionError(code)) = kind {
                    self.send_go_away(code, Vec::new());
                }
                self.exit_with_error(kind);
                Err(kind)
            }
        }
    }

    async fn main_loop(&mut self) -> Result<(), DispatchErrorKind> {
        loop {
            select! {
                biased;
                message = self.resp_rx.recv() => match message {
                    Some(OutputMessage::Output(frame)) => self.recv_frame(frame)?,
                    Some(OutputMessage::OutputExit(kind)) => return Err(kind),
                    None => return Err(DispatchErrorKind::ChannelClosed),
                },
                event = self.req_rx.recv() => match event {
                    Some(event) => self.recv_event(event)?,
                    None => return Err(DispatchErrorKind::ChannelClosed),
                },
            }
            self.dispatch_pending_data()?;
            if self.draining && self.streams.is_closed() {
                return Ok(());
            }
        }
    }

    fn recv_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        match frame.payload() {
            Payload::Settings(_) => self.recv_settings_frame(frame),
            Payload::Ping(_) => self.recv_ping_frame(frame),
            Payload::Goaway(_) => self.recv_go_away_frame(frame),
            Payload::RstStream(_) => self.recv_reset_frame(frame),
            Payload::Headers(_) => self.recv_header_frame(frame),
            Payload::Data(_) => self.recv_data_frame(frame),
            Payload::WindowUpdate(_) => self.recv_window_frame(frame),
        }
    }

    fn recv_event(&mut self, event: StreamEvent) -> Result<(), DispatchErrorKind> {
        match event {
            StreamEvent::NewStream {
                parts,
                end_stream,
                resp_tx,
            } => self.event_new_stream(parts, end_stream, resp_tx),
            StreamEvent::Write {
                id,
                data,
                end_stream,
                ack,
            } => {
                match self.streams.can_queue(id) {
                    Ok(()) => {
                        let _ = self.streams.queue_outbound(id, data, end_stream, Some(ack));
                        self.streams.push_back_pending_send(id);
                    }
                    Err(e) => {
                        let _ = ack.send(Err(DispatchErrorKind::H2(e)));
                    }
                }
                Ok(())
            }
            StreamEvent::WriteHeaders {
                id,
                parts,
                end_stream,
            } => self.event_write_headers(id, parts, end_stream),
            StreamEvent::WindowRelease { id, size } => {
                if let Some(update) = self.streams.release_stream_recv_window(id, size) {
                    self.send_frame(update)?;
                }
                Ok(())
            }
            StreamEvent::Cancel { id, code } => {
                self.event_cancel(id, code);
                Ok(())
            }
            StreamEvent::GracefulClose => self.event_graceful_close(),
            StreamEvent::IdleTimeout => {
                if self.streams.concurrent_streams() == 0 {
                    self.event_graceful_close()
                } else {
                    Ok(())
                }
            }
            StreamEvent::Ping { data } => self.send_frame(Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Ping(Ping::new(data)),
            )),
            StreamEvent::CloseConn { kind } => Err(kind),
        }
    }

    fn event_new_stream(
        &mut self,
        parts: Parts,
        end_stream: bool,
        resp_tx: UnboundedSender<StreamMessage>,
    ) -> Result<(), DispatchErrorKind> {
        if self.draining {
            let _ = resp_tx.send(StreamMessage::GoingAway);
            return Ok(());
        }
        let id = match self.streams.generate_id() {
            Ok(id) => id,
            Err(kind) => {
                let _ = resp_tx.send(StreamMessage::Error(kind));
                return Ok(());
            }
        };
        self.streams.insert_local(id, parts, end_stream);
        self.senders.insert(id, resp_tx);
        if self.streams.reach_max_concurrency() || !self.streams.is_pending_concurrency_empty() {
            self.streams.push_pending_concurrency(id);
        } else {
            self.streams.increase_current_concurrency();
            self.admit_stream(id)?;
        }
        Ok(())
    }

    // Emits the queued request HEADERS of an admitted stream and tells
    // the handle its id.
    fn admit_stream(&mut self, id: StreamId) -> Result<(), DispatchErrorKind> {
        let (parts, end_stream) = match self.streams.take_header(id) {
            Some(header) => header,
            None => return Ok(()),
        };
        match self.streams.send_headers_frame(id, end_stream) {
            FrameRecvState::OK => {}
            FrameRecvState::Ignore => return Ok(()),
            FrameRecvState::Err(e) => return Err(e.into()),
        }
        let mut flags = FrameFlags::empty();
        flags.set_end_headers(true);
        flags.set_end_stream(end_stream);
        self.send_frame(Frame::new(
            id,
            flags,
            Payload::Headers(ylong_grpc::h2::Headers::new(parts)),
        ))?;
        if let Some(tx) = self.senders.get(&id) {
            let _ = tx.send(StreamMessage::Started(id));
        }
        self.sync_active();
        Ok(())
    }

    fn event_write_headers(
        &mut self,
        id: StreamId,
        parts: Parts,
        end_stream: bool,
    ) -> Result<(), DispatchErrorKind> {
        match self.streams.send_headers_frame(id, end_stream) {
            FrameRecvState::OK => {}
            FrameRecvState::Ignore => return Ok(()),
            FrameRecvState::Err(e) => return self.handle_h2_error(e),
        }
        let mut flags = FrameFlags::empty();
        flags.set_end_headers(true);
        flags.set_end_stream(end_stream);
        self.send_frame(Frame::new(
            id,
            flags,
            Payload::Headers(ylong_grpc::h2::Headers::new(parts)),
        ))?;
        self.cleanup_if_closed(id);
        Ok(())
    }

    fn event_cancel(&mut self, id: StreamId, code: ErrorCode) {
        if let StreamEndState::OK = self.streams.send_local_reset(id) {
            let frame = Frame::new(
                id,
                FrameFlags::empty(),
                Payload::RstStream(RstStream::new(code.into_code())),
            );
            let _ = self.frame_tx.send(frame);
        }
        self.fail_stream_writes(id, DispatchErrorKind::H2(H2Error::StreamError(id, code)));
        self.senders.remove(&id);
        self.sync_active();
    }

    fn event_graceful_close(&mut self) -> Result<(), DispatchErrorKind> {
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        self.state.set_goaway();
        for id in self.streams.reject_pending_streams() {
            if let Some(tx) = self.senders.remove(&id) {
                let _ = tx.send(StreamMessage::GoingAway);
            }
        }
        let last_stream_id = match self.role {
            // No server-initiated streams exist towards a client.
            TransportRole::Client => 0,
            TransportRole::Server { .. } => self.streams.latest_remote_id,
        };
        self.streams.max_recv_id = last_stream_id;
        self.send_go_away_last(ErrorCode::NoError, last_stream_id, Vec::new());
        Ok(())
    }

    fn recv_settings_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        let settings = match frame.payload() {
            Payload::Settings(settings) => settings,
            _ => return Ok(()),
        };
        if frame.flags().is_ack() {
            // The reader already applied our acknowledged limits to the
            // decoder; local windows were raised at decision time.
            return Ok(());
        }
        for setting in settings.get_settings() {
            match setting {
                Setting::MaxConcurrentStreams(num) => {
                    self.streams.apply_max_concurrent_streams(*num);
                }
                Setting::InitialWindowSize(size) => {
                    self.streams
                        .apply_send_initial_window_size(*size)
                        .map_err(DispatchErrorKind::H2)?;
                }
                Setting::MaxFrameSize(size) => {
                    self.streams.apply_max_frame_size(*size);
                }
                _ => {}
            }
        }
        // The ack carries a copy of the peer settings so the writer can
        // adopt them before putting a plain ACK on the wire.
        let ack = Frame::new(0, FrameFlags::new(0x1), frame.payload().clone());
        self.send_frame(ack)
    }

    fn recv_ping_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        let ping = match frame.payload() {
            Payload::Ping(ping) => ping.clone(),
            _ => return Ok(()),
        };
        if frame.flags().is_ack() {
            if ping.data() == BDP_PING {
                self.bdp_ack();
            } else {
                self.state.set_ping_acked();
            }
            return Ok(());
        }

        let concurrent = self.streams.concurrent_streams();
        let mut calm = false;
        if let TransportRole::Server {
            policy,
            last_ping,
            ping_strikes,
            ..
        } = &mut self.role
        {
            let now = Instant::now();
            let spacing = if concurrent > 0 || policy.is_permit_without_stream() {
                policy.min_time()
            } else {
                STREAMLESS_PING_SPACING
            };
            if let Some(prev) = *last_ping {
                if now.duration_since(prev) < spacing {
                    *ping_strikes += 1;
                }
            }
            *last_ping = Some(now);
            if *ping_strikes > MAX_PING_STRIKES {
                calm = true;
            }
        }
        if calm {
            self.send_go_away(ErrorCode::EnhanceYourCalm, b"too_many_pings".to_vec());
            return Err(DispatchErrorKind::H2(H2Error::ConnectionError(
                ErrorCode::EnhanceYourCalm,
            )));
        }
        self.send_frame(Ping::ack(ping))
    }

    fn recv_go_away_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        let goaway = match frame.payload() {
            Payload::Goaway(goaway) => goaway,
            _ => return Ok(()),
        };
        // Prevents this connection from starting new streams.
        self.draining = true;
        self.state.set_goaway();
        let last_stream_id = goaway.get_last_stream_id();
        let error_code = goaway.get_error_code();
        let swept = self
            .streams
            .get_goaway_streams(last_stream_id)
            .map_err(DispatchErrorKind::H2)?;
        for id in swept {
            self.fail_stream_writes(
                id,
                DispatchErrorKind::H2(H2Error::ConnectionError(ErrorCode::NoError)),
            );
            if let Some(tx) = self.senders.remove(&id) {
                let _ = tx.send(StreamMessage::GoingAway);
            }
        }
        self.go_away_received = Some(error_code);
        self.sync_active();
        Ok(())
    }

    fn recv_reset_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        let id = frame.stream_id();
        let code = match frame.payload() {
            Payload::RstStream(rst) => {
                ErrorCode::try_from(rst.error_code()).unwrap_or(ErrorCode::ProtocolError)
            }
            _ => return Ok(()),
        };
        match self.streams.recv_remote_reset(id) {
            StreamEndState::OK => {
                self.fail_stream_writes(
                    id,
                    DispatchErrorKind::H2(H2Error::StreamError(id, code)),
                );
                if let Some(tx) = self.senders.remove(&id) {
                    let _ = tx.send(StreamMessage::Reset { code });
                }
                self.sync_active();
                Ok(())
            }
            StreamEndState::Ignore => Ok(()),
            StreamEndState::Err(e) => self.handle_h2_error(e),
        }
    }

    fn recv_header_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        let id = frame.stream_id();
        let end_stream = frame.flags().is_end_stream();

        let known = self.streams.stream_map.contains_key(&id);
        if !known {
            return match self.role {
                TransportRole::Client => {
                    // A response for a stream that was never opened.
                    Err(DispatchErrorKind::H2(H2Error::ConnectionError(
                        ErrorCode::ProtocolError,
                    )))
                }
                TransportRole::Server { .. } => {
                    if id % 2 == 1 && id <= self.streams.latest_remote_id {
                        // A stream that was refused without being
                        // registered; drop its late frames.
                        Ok(())
                    } else {
                        self.accept_remote_stream(frame)
                    }
                }
            };
        }

        match self.streams.recv_headers(id, end_stream) {
            FrameRecvState::OK => {
                let parts = match frame.into_payload() {
                    Payload::Headers(headers) => headers.into_parts(),
                    _ => return Ok(()),
                };
                if let Some(tx) = self.senders.get(&id) {
                    let _ = tx.send(StreamMessage::Headers { parts, end_stream });
                }
                self.cleanup_if_closed(id);
                Ok(())
            }
            FrameRecvState::Ignore => Ok(()),
            FrameRecvState::Err(e) => self.handle_h2_error(e),
        }
    }

    // A HEADERS frame on an unknown id opens a stream on the server.
    fn accept_remote_stream(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        let id = frame.stream_id();
        let end_stream = frame.flags().is_end_stream();

        // Client streams are odd and strictly increasing.
        if id % 2 == 0 || id <= self.streams.latest_remote_id {
            return Err(DispatchErrorKind::H2(H2Error::ConnectionError(
                ErrorCode::ProtocolError,
            )));
        }
        if self.draining {
            return self.send_frame(Frame::new(
                id,
                FrameFlags::empty(),
                Payload::RstStream(RstStream::new(ErrorCode::RefusedStream.into_code())),
            ));
        }
        let max_streams = match &self.role {
            TransportRole::Server { max_streams, .. } => *max_streams,
            TransportRole::Client => return Ok(()),
        };
        if self.streams.concurrent_streams() >= max_streams {
            return self.send_frame(Frame::new(
                id,
                FrameFlags::empty(),
                Payload::RstStream(RstStream::new(ErrorCode::RefusedStream.into_code())),
            ));
        }

        let parts = match frame.into_payload() {
            Payload::Headers(headers) => headers.into_parts(),
            _ => return Ok(()),
        };
        if let Err(message) = validate_request_headers(&parts) {
            // Report the rejection in-band: a trailers-only response.
            self.streams.latest_remote_id = id;
            let mut flags = FrameFlags::empty();
            flags.set_end_headers(true);
            flags.set_end_stream(true);
            return self.send_frame(Frame::new(
                id,
                flags,
                Payload::Headers(ylong_grpc::h2::Headers::new(reject_parts(message))),
            ));
        }

        self.streams.insert_remote(id);
        self.streams.increase_current_concurrency();
        match self.streams.recv_headers(id, end_stream) {
            FrameRecvState::OK => {}
            FrameRecvState::Ignore => return Ok(()),
            FrameRecvState::Err(e) => return self.handle_h2_error(e),
        }
        let (resp_tx, resp_rx) = crate::runtime::unbounded_channel();
        self.senders.insert(id, resp_tx);
        self.sync_active();

        let accept_tx = match &self.role {
            TransportRole::Server { accept_tx, .. } => accept_tx,
            TransportRole::Client => return Ok(()),
        };
        if accept_tx
            .send(IncomingStream {
                id,
                parts,
                end_stream,
                resp_rx,
            })
            .is_err()
        {
            // The accept side is gone; refuse the stream.
            self.event_cancel(id, ErrorCode::RefusedStream);
        }
        Ok(())
    }

    fn recv_data_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        let id = frame.stream_id();
        let end_stream = frame.flags().is_end_stream();
        let data = match frame.into_payload() {
            Payload::Data(data) => data,
            _ => return Ok(()),
        };
        let size = data.size() as u32;

        // Connection-level accounting covers every DATA frame and is
        // released immediately: the bytes move into a stream buffer.
        match self.streams.flow_control.recv_data(size) {
            Err(()) => {
                return Err(DispatchErrorKind::H2(H2Error::ConnectionError(
                    ErrorCode::FlowControlError,
                )));
            }
            Ok(Some(update)) => self.send_frame(update)?,
            Ok(None) => {}
        }
        self.bdp_sample(size)?;

        if let Err(e) = self.streams.recv_stream_data(id, size) {
            return self.handle_h2_error(e);
        }
        match self.streams.recv_data(id, end_stream) {
            FrameRecvState::OK => {
                if let Some(tx) = self.senders.get(&id) {
                    let _ = tx.send(StreamMessage::Data {
                        data: data.into_vec(),
                        end_stream,
                    });
                }
                self.cleanup_if_closed(id);
                Ok(())
            }
            FrameRecvState::Ignore => Ok(()),
            FrameRecvState::Err(e) => self.handle_h2_error(e),
        }
    }

    fn recv_window_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        let increment = match frame.payload() {
            Payload::WindowUpdate(update) => update.get_increment(),
            _ => return Ok(()),
        };
        let id = frame.stream_id();
        if id == 0 {
            self.streams
                .increase_conn_send_window(increment)
                .map_err(DispatchErrorKind::H2)?;
            self.streams.reassign_conn_send_window();
        } else if let Err(_e) = self.streams.reassign_stream_send_window(id, increment) {
            // Stream window overflow resets the stream only.
            return self.handle_h2_error(H2Error::StreamError(id, ErrorCode::FlowControlError));
        }
        Ok(())
    }

    fn dispatch_pending_data(&mut self) -> Result<(), DispatchErrorKind> {
        loop {
            for id in self.streams.try_consume_pending_concurrency() {
                self.admit_stream(id)?;
            }
            let size = self.streams.pending_stream_num();
            if size == 0 {
                return Ok(());
            }
            let mut progressed = false;
            for _ in 0..size {
                let id = match self.streams.next_pending_stream() {
                    Some(id) => id,
                    None => break,
                };
                match self.streams.next_data_frame(id) {
                    Ok(DataDispatch::Frame {
                        frame,
                        finished_ack,
                        has_more,
                    }) => {
                        progressed = true;
                        self.send_frame(frame)?;
                        if let Some(ack) = finished_ack {
                            let _ = ack.send(Ok(()));
                        }
                        if has_more {
                            self.streams.push_back_pending_send(id);
                        }
                    }
                    Ok(DataDispatch::Parked) | Ok(DataDispatch::Idle) => {}
                    Err(e) => self.handle_h2_error(e)?,
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn bdp_sample(&mut self, size: u32) -> Result<(), DispatchErrorKind> {
        let need_ping = match self.bdp.as_ref() {
            Some(bdp) => bdp.need_ping(),
            None => return Ok(()),
        };
        if need_ping {
            self.send_frame(Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Ping(Ping::new(BDP_PING)),
            ))?;
            if let Some(bdp) = self.bdp.as_mut() {
                bdp.ping_sent(Instant::now());
            }
        }
        if let Some(bdp) = self.bdp.as_mut() {
            bdp.add_sample(size);
        }
        Ok(())
    }

    fn bdp_ack(&mut self) {
        let new_limit = match self.bdp.as_mut() {
            Some(bdp) => bdp.calculate(Instant::now()),
            None => None,
        };
        if let Some(limit) = new_limit {
            let delta = self.streams.apply_recv_window_limit(limit);
            if delta > 0 {
                let _ = self.frame_tx.send(Frame::new(
                    0,
                    FrameFlags::empty(),
                    Payload::WindowUpdate(ylong_grpc::h2::WindowUpdate::new(delta)),
                ));
            }
            let settings = SettingsBuilder::new().initial_window_size(limit).build();
            let _ = self.frame_tx.send(Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Settings(settings),
            ));
        }
    }

    fn handle_h2_error(&mut self, error: H2Error) -> Result<(), DispatchErrorKind> {
        match error {
            H2Error::StreamError(id, code) => {
                if let StreamEndState::OK = self.streams.send_local_reset(id) {
                    let frame = Frame::new(
                        id,
                        FrameFlags::empty(),
                        Payload::RstStream(RstStream::new(code.into_code())),
                    );
                    let _ = self.frame_tx.send(frame);
                }
                self.fail_stream_writes(
                    id,
                    DispatchErrorKind::H2(H2Error::StreamError(id, code)),
                );
                if let Some(tx) = self.senders.remove(&id) {
                    let _ = tx.send(StreamMessage::Error(DispatchErrorKind::H2(
                        H2Error::StreamError(id, code),
                    )));
                }
                self.sync_active();
                Ok(())
            }
            H2Error::ConnectionError(_) => Err(error.into()),
        }
    }

    fn fail_stream_writes(&mut self, id: StreamId, kind: DispatchErrorKind) {
        for ack in self.streams.take_pending_acks(id) {
            let _ = ack.send(Err(kind));
        }
    }

    fn cleanup_if_closed(&mut self, id: StreamId) {
        if matches!(
            self.streams.stream_state(id),
            Some(H2StreamState::Closed(_))
        ) {
            self.senders.remove(&id);
            self.fail_stream_writes(
                id,
                DispatchErrorKind::H2(H2Error::StreamError(id, ErrorCode::StreamClosed)),
            );
            self.sync_active();
        }
    }

    fn send_frame(&mut self, frame: Frame) -> Result<(), DispatchErrorKind> {
        self.frame_tx
            .send(frame)
            .map_err(|_| DispatchErrorKind::ChannelClosed)
    }

    fn send_go_away(&mut self, code: ErrorCode, debug_data: Vec<u8>) {
        let last_stream_id = self.streams.latest_remote_id;
        self.send_go_away_last(code, last_stream_id, debug_data);
    }

    fn send_go_away_last(&mut self, code: ErrorCode, last_stream_id: StreamId, debug: Vec<u8>) {
        let payload = Goaway::new(code.into_code(), last_stream_id, debug);
        // Avoid sending the same GOAWAY frame multiple times.
        if let Some(ref sent) = self.go_away_sync.going_away {
            if sent.get_error_code() == payload.get_error_code()
                && sent.get_last_stream_id() == payload.get_last_stream_id()
            {
                return;
            }
        }
        self.go_away_sync.going_away = Some(payload.clone());
        let _ = self.frame_tx.send(Frame::new(
            0,
            FrameFlags::empty(),
            Payload::Goaway(payload),
        ));
    }

    fn exit_with_error(&mut self, kind: DispatchErrorKind) {
        self.state.shutdown();
        self.streams.clear_streams_states();
        for id in self.streams.get_all_unclosed_streams() {
            self.fail_stream_writes(id, kind);
            if let Some(tx) = self.senders.remove(&id) {
                let _ = tx.send(StreamMessage::Error(kind));
            }
        }
        for (_id, tx) in self.senders.drain() {
            let _ = tx.send(StreamMessage::Error(kind));
        }
        self.sync_active();
    }

    fn sync_active(&mut self) {
        self.state
            .set_active_streams(self.streams.concurrent_streams() as usize);
    }
}

fn validate_request_headers(parts: &Parts) -> Result<(), &'static str> {
    let (pseudo, fields) = parts.parts();
    if pseudo.method() != Some("POST") {
        return Err("invalid :method, POST is required");
    }
    if !pseudo.path().map_or(false, |path| path.starts_with('/')) {
        return Err("missing or malformed :path");
    }
    match pseudo.scheme() {
        Some("http") | Some("https") => {}
        _ => return Err("invalid :scheme"),
    }
    match fields.get("content-type") {
        Some(value) if value.starts_with("application/grpc") => Ok(()),
        _ => Err("invalid content-type, application/grpc is required"),
    }
}

fn reject_parts(message: &str) -> Parts {
    let mut pseudo = ylong_grpc::pseudo::PseudoHeaders::new();
    pseudo.set_status(Some(String::from("200")));
    let mut fields = ylong_grpc::headers::Headers::new();
    let _ = fields.append("content-type", "application/grpc");
    let _ = fields.append(
        "grpc-status",
        &ylong_grpc::status::Code::FailedPrecondition.into_code().to_string(),
    );
    let _ = fields.append("grpc-message", &ylong_grpc::status::percent_encode(message));
    let mut parts = Parts::new();
    parts.set_pseudo(pseudo);
    parts.set_header_lines(fields);
    parts
}

#[cfg(test)]
mod ut_manager {
    use super::*;

    /// UT test cases for `validate_request_headers`.
    ///
    /// # Brief
    /// 1. Validates a well-formed gRPC request header block.
    /// 2. Checks rejection of a bad method, a missing path and a foreign
    ///    content type.
    #[test]
    fn ut_validate_request_headers() {
        let mut pseudo = ylong_grpc::pseudo::PseudoHeaders::new();
        pseudo.set_method(Some(String::from("POST")));
        pseudo.set_scheme(Some(String::from("http")));
        pseudo.set_path(Some(String::from("/pkg.Service/Call")));
        let mut fields = ylong_grpc::headers::Headers::new();
        fields.append("content-type", "application/grpc+proto").unwrap();
        let mut parts = Parts::new();
        parts.set_pseudo(pseudo.clone());
        parts.set_header_lines(fields);
        assert!(validate_request_headers(&parts).is_ok());

        let mut bad = parts.clone();
        let mut p = pseudo.clone();
        p.set_method(Some(String::from("GET")));
        bad.set_pseudo(p);
        assert!(validate_request_headers(&bad).is_err());

        let mut bad = parts.clone();
        let mut p = pseudo.clone();
        p.set_path(None);
        bad.set_pseudo(p);
        assert!(validate_request_headers(&bad).is_err());

        let mut bad = parts.clone();
        let mut fields = ylong_grpc::headers::Headers::new();
        fields.append("content-type", "text/html").unwrap();
        bad.set_header_lines(fields);
        assert!(validate_request_headers(&bad).is_err());
    }

    /// UT test cases for `reject_parts`.
    ///
    /// # Brief
    /// 1. Builds a trailers-only rejection block.
    /// 2. Checks the status, grpc-status and encoded grpc-message.
    #[test]
    fn ut_reject_parts() {
        let parts = reject_parts("bad content-type");
        let (pseudo, fields) = parts.parts();
        assert_eq!(pseudo.status(), Some("200"));
        assert_eq!(fields.get("grpc-status"), Some("9"));
        assert_eq!(fields.get("grpc-message"), Some("bad content-type"));
    }
}
