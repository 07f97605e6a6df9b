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

//! The server transport.
//!
//! `ServerTransport` validates the client connection preface, advertises
//! its SETTINGS (including MAX_CONCURRENT_STREAMS and the connection
//! window delta) and launches the same engine tasks as the client, plus
//! the server keepalive timers. Incoming streams are validated by the
//! manager and handed out through [`ServerTransport::accept_stream`];
//! `handle_streams` dispatches each one onto its own task.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use ylong_grpc::h2::{
    ErrorCode, Frame, FrameDecoder, FrameEncoder, FrameFlags, Parts, Payload, SettingsBuilder,
    StreamId, WindowUpdate, CONNECTION_PREFACE,
};
use ylong_grpc::pseudo::PseudoHeaders;
use ylong_grpc::status::{Code, Status};
use ylong_grpc::timeout::decode_timeout;

use crate::config::{
    ServerConfig, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE,
};
use crate::error::{dispatch_stream_error, TransportError};
use crate::keepalive::{server_keepalive, TransportState};
use crate::runtime::{
    split, spawn, timeout, unbounded_channel, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufWriter, JoinHandle, UnboundedReceiver, UnboundedSender,
};
use crate::stream::{append_metadata, extract_metadata};
use crate::util::h2::bdp::BdpEstimator;
use crate::util::h2::manager::TransportRole;
use crate::util::h2::{
    ConnManager, FlowControl, IncomingStream, RecvData, SendData, SettingsSync, StreamEvent,
    StreamMessage, Streams,
};
use crate::Headers;

/// The server side of one RPC transport connection.
pub struct ServerTransport {
    events: UnboundedSender<StreamEvent>,
    state: Arc<TransportState>,
    accept_rx: UnboundedReceiver<IncomingStream>,
    handles: Vec<JoinHandle<()>>,
}

impl ServerTransport {
    /// Validates the client preface on `io` and launches a server
    /// transport over it.
    pub async fn accept<S>(mut io: S, config: ServerConfig) -> Result<Self, TransportError>
    where
        S: AsyncRead + AsyncWrite + Sync + Send + Unpin + 'static,
    {
        let mut preface = [0u8; 24];
        io.read_exact(&mut preface).await.map_err(|e| {
            TransportError::connection(
                Code::Unavailable,
                &format!("failed to read client preface: {}", e),
            )
        })?;
        if preface != CONNECTION_PREFACE {
            return Err(TransportError::connection(
                Code::Internal,
                "invalid client connection preface",
            ));
        }

        let state = Arc::new(TransportState::new());
        let settings_sync = Arc::new(Mutex::new(SettingsSync::default()));
        let (frame_tx, frame_rx) = unbounded_channel();
        let (resp_tx, resp_rx) = unbounded_channel();
        let (req_tx, req_rx) = unbounded_channel();
        let (accept_tx, accept_rx) = unbounded_channel();

        let flow = FlowControl::new(config.conn_window_size(), DEFAULT_WINDOW_SIZE);
        let streams = Streams::new(
            false,
            config.stream_window_size(),
            DEFAULT_WINDOW_SIZE,
            DEFAULT_MAX_FRAME_SIZE,
            flow,
        );
        let bdp = if config.window_size_set() {
            None
        } else {
            Some(BdpEstimator::new(config.conn_window_size()))
        };

        let settings = SettingsBuilder::new()
            .header_table_size(DEFAULT_HEADER_TABLE_SIZE)
            .enable_push(false)
            .max_concurrent_streams(config.max_streams())
            .initial_window_size(config.stream_window_size())
            .max_frame_size(config.max_frame_size())
            .max_header_list_size(config.max_header_list_size())
            .build();
        let _ = frame_tx.send(Frame::new(
            0,
            FrameFlags::empty(),
            Payload::Settings(settings),
        ));
        let delta = config.conn_window_size().saturating_sub(DEFAULT_WINDOW_SIZE);
        if delta > 0 {
            let _ = frame_tx.send(Frame::new(
                0,
                FrameFlags::empty(),
                Payload::WindowUpdate(WindowUpdate::new(delta)),
            ));
        }

        let (read, write) = split(io);
        let writer = BufWriter::with_capacity(config.write_buffer_size(), write);
        let encoder =
            FrameEncoder::new(DEFAULT_MAX_FRAME_SIZE as usize, config.use_huffman_coding());
        let decoder = FrameDecoder::new();

        let mut handles = Vec::with_capacity(4);

        let send_sync = settings_sync.clone();
        handles.push(spawn(async move {
            let send = SendData::new(encoder, send_sync, writer, frame_rx);
            let _ = send.run().await;
        }));

        let recv_sync = settings_sync.clone();
        let recv_state = state.clone();
        let read_buffer_size = config.read_buffer_size();
        handles.push(spawn(async move {
            let recv = RecvData::new(
                decoder,
                recv_sync,
                read,
                resp_tx,
                recv_state,
                read_buffer_size,
            );
            let _ = recv.run().await;
        }));

        let manager = ConnManager::new(
            TransportRole::Server {
                accept_tx,
                policy: config.policy().clone(),
                max_streams: config.max_streams(),
                last_ping: None,
                ping_strikes: 0,
            },
            state.clone(),
            settings_sync,
            frame_tx,
            resp_rx,
            req_rx,
            streams,
            bdp,
        );
        handles.push(spawn(async move {
            let _ = manager.run().await;
        }));

        let keepalive = config.keepalive().clone();
        let ka_state = state.clone();
        let ka_events = req_tx.clone();
        handles.push(spawn(async move {
            server_keepalive(keepalive, ka_state, ka_events).await;
        }));

        Ok(Self {
            events: req_tx,
            state,
            accept_rx,
            handles,
        })
    }

    /// Waits for the next incoming stream. Returns `None` once the
    /// connection is closed or drained.
    pub async fn accept_stream(&mut self) -> Option<ServerStream> {
        let incoming = self.accept_rx.recv().await?;
        Some(ServerStream::new(incoming, self.events.clone()))
    }

    /// Accepts streams in a loop and dispatches each one onto its own
    /// task.
    pub async fn handle_streams<F, Fut>(mut self, mut handler: F)
    where
        F: FnMut(ServerStream) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        while let Some(stream) = self.accept_stream().await {
            spawn(handler(stream));
        }
    }

    /// Starts a graceful shutdown: a GOAWAY is sent and the connection
    /// closes once the last active stream completes.
    pub fn graceful_close(&self) {
        self.state.set_goaway();
        let _ = self.events.send(StreamEvent::GracefulClose);
    }

    /// Closes the transport immediately. Active streams fail.
    pub fn close(&self) {
        self.state.shutdown();
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// Returns `true` once the transport stopped accepting new streams.
    pub fn is_closed(&self) -> bool {
        self.state.is_shutdown() || self.state.is_goaway()
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// One incoming RPC stream on a server transport.
pub struct ServerStream {
    id: StreamId,
    method: String,
    authority: Option<String>,
    metadata: Headers,
    deadline: Option<Instant>,
    events: UnboundedSender<StreamEvent>,
    receiver: UnboundedReceiver<StreamMessage>,
    remain: Vec<u8>,
    remain_offset: usize,
    eof: bool,
    sent_headers: bool,
    sent_status: bool,
    terminal: Option<TransportError>,
}

impl ServerStream {
    fn new(incoming: IncomingStream, events: UnboundedSender<StreamEvent>) -> Self {
        let (pseudo, fields) = incoming.parts.parts();
        let method = pseudo.path().unwrap_or("/").to_string();
        let authority = pseudo.authority().map(str::to_string);
        let deadline = fields
            .get("grpc-timeout")
            .and_then(decode_timeout)
            .map(|limit| Instant::now() + limit);
        let metadata = extract_metadata(fields);
        Self {
            id: incoming.id,
            method,
            authority,
            metadata,
            deadline,
            events,
            receiver: incoming.resp_rx,
            remain: Vec::new(),
            remain_offset: 0,
            eof: incoming.end_stream,
            sent_headers: false,
            sent_status: false,
            terminal: None,
        }
    }

    /// Gets the HTTP/2 stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Gets the full method path of the call.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Gets the `:authority` of the call.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Application metadata received with the call.
    pub fn metadata(&self) -> &Headers {
        &self.metadata
    }

    /// The deadline derived from the client's `grpc-timeout`, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sends the response headers explicitly. Writing data sends them
    /// implicitly.
    pub async fn send_headers(&mut self, metadata: &Headers) -> Result<(), TransportError> {
        if self.sent_headers {
            return Ok(());
        }
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        let mut pseudo = PseudoHeaders::new();
        pseudo.set_status(Some(String::from("200")));
        let mut fields = Headers::new();
        let _ = fields.append("content-type", "application/grpc");
        append_metadata(&mut fields, metadata);
        let mut parts = Parts::new();
        parts.set_pseudo(pseudo);
        parts.set_header_lines(fields);
        self.send_event(StreamEvent::WriteHeaders {
            id: self.id,
            parts,
            end_stream: false,
        })?;
        self.sent_headers = true;
        Ok(())
    }

    /// Sends response payload bytes. Resolves once the bytes cleared
    /// both flow-control windows.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        if self.sent_status {
            return Err(TransportError::stream(
                Code::Internal,
                "write after status",
            ));
        }
        if !self.sent_headers {
            self.send_headers(&Headers::new()).await?;
        }
        if self.deadline_expired() {
            return Err(self.fail_deadline());
        }

        let (ack_tx, mut ack_rx) = unbounded_channel();
        self.send_event(StreamEvent::Write {
            id: self.id,
            data: data.to_vec(),
            end_stream: false,
            ack: ack_tx,
        })?;
        match ack_rx.recv().await {
            Some(Ok(())) => Ok(()),
            Some(Err(kind)) => {
                let err = dispatch_stream_error(kind);
                self.terminal = Some(err.clone());
                Err(err)
            }
            None => {
                let err = TransportError::connection(Code::Unavailable, "transport is closed");
                self.terminal = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Finishes the RPC: sends trailers carrying `grpc-status` (and a
    /// percent-encoded `grpc-message` when present) with END_STREAM. A
    /// response that never carried headers goes out as a trailers-only
    /// response.
    pub async fn write_status(
        &mut self,
        status: &Status,
        trailers: &Headers,
    ) -> Result<(), TransportError> {
        if self.sent_status {
            return Ok(());
        }
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        let mut fields = Headers::new();
        let mut parts = Parts::new();
        if !self.sent_headers {
            // Trailers-only response.
            let mut pseudo = PseudoHeaders::new();
            pseudo.set_status(Some(String::from("200")));
            parts.set_pseudo(pseudo);
            let _ = fields.append("content-type", "application/grpc");
        }
        let _ = fields.append("grpc-status", &status.code().into_code().to_string());
        if !status.message().is_empty() {
            let _ = fields.append(
                "grpc-message",
                &ylong_grpc::status::percent_encode(status.message()),
            );
        }
        append_metadata(&mut fields, trailers);
        parts.set_header_lines(fields);

        self.send_event(StreamEvent::WriteHeaders {
            id: self.id,
            parts,
            end_stream: true,
        })?;
        self.sent_status = true;
        self.sent_headers = true;
        Ok(())
    }

    /// Reads request bytes into `buf`. Returns `Ok(0)` once the client
    /// half-closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.remain_offset < self.remain.len() {
                let n = (self.remain.len() - self.remain_offset).min(buf.len());
                buf[..n].copy_from_slice(&self.remain[self.remain_offset..self.remain_offset + n]);
                self.remain_offset += n;
                if self.remain_offset == self.remain.len() {
                    self.remain.clear();
                    self.remain_offset = 0;
                }
                let _ = self.events.send(StreamEvent::WindowRelease {
                    id: self.id,
                    size: n as u32,
                });
                return Ok(n);
            }
            if let Some(err) = &self.terminal {
                return Err(err.clone());
            }
            if self.eof {
                return Ok(0);
            }
            if self.deadline_expired() {
                return Err(self.fail_deadline());
            }

            let received = match self.deadline {
                Some(deadline) => {
                    let limit = deadline.saturating_duration_since(Instant::now());
                    match timeout(limit, self.receiver.recv()).await {
                        Ok(received) => received,
                        Err(_) => return Err(self.fail_deadline()),
                    }
                }
                None => self.receiver.recv().await,
            };
            match received {
                Some(StreamMessage::Data { data, end_stream }) => {
                    self.remain = data;
                    self.remain_offset = 0;
                    if end_stream {
                        self.eof = true;
                    }
                }
                Some(StreamMessage::Headers { end_stream, .. }) => {
                    if end_stream {
                        self.eof = true;
                    }
                }
                Some(StreamMessage::Reset { code }) => {
                    let err = TransportError::stream(
                        Code::from_h2_error(code),
                        "stream reset by client",
                    );
                    self.terminal = Some(err.clone());
                    return Err(err);
                }
                Some(StreamMessage::Error(kind)) => {
                    let err = dispatch_stream_error(kind);
                    self.terminal = Some(err.clone());
                    return Err(err);
                }
                Some(_) => {}
                None => {
                    let err =
                        TransportError::connection(Code::Unavailable, "transport is closed");
                    self.terminal = Some(err.clone());
                    return Err(err);
                }
            }
        }
    }

    /// Cancels the stream with RST_STREAM(CANCEL).
    pub fn cancel(&mut self) {
        if self.terminal.is_none() && !self.sent_status {
            let _ = self.events.send(StreamEvent::Cancel {
                id: self.id,
                code: ErrorCode::Cancel,
            });
            self.terminal = Some(TransportError::stream(Code::Canceled, "stream cancelled"));
        }
    }

    fn send_event(&mut self, event: StreamEvent) -> Result<(), TransportError> {
        self.events.send(event).map_err(|_| {
            let err = TransportError::connection(Code::Unavailable, "transport is closed");
            self.terminal = Some(err.clone());
            err
        })
    }

    fn deadline_expired(&self) -> bool {
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    fn fail_deadline(&mut self) -> TransportError {
        let err = TransportError::stream(Code::DeadlineExceeded, "deadline exceeded");
        if self.terminal.is_none() {
            let _ = self.events.send(StreamEvent::Cancel {
                id: self.id,
                code: ErrorCode::Cancel,
            });
            self.terminal = Some(err.clone());
        }
        err
    }
}

impl Drop for ServerStream {
    fn drop(&mut self) {
        // A handler that exits without a status aborts the stream.
        if !self.sent_status && self.terminal.is_none() {
            let _ = self.events.send(StreamEvent::Cancel {
                id: self.id,
                code: ErrorCode::InternalError,
            });
        }
    }
}

#[cfg(test)]
mod ut_server {
    use super::*;

    fn incoming(parts: Parts, end_stream: bool) -> (ServerStream, UnboundedSender<StreamMessage>) {
        let (events, _events_rx) = unbounded_channel();
        let (tx, resp_rx) = unbounded_channel();
        let stream = ServerStream::new(
            IncomingStream {
                id: 1,
                parts,
                end_stream,
                resp_rx,
            },
            events,
        );
        (stream, tx)
    }

    fn request_parts() -> Parts {
        let mut pseudo = PseudoHeaders::new();
        pseudo.set_method(Some(String::from("POST")));
        pseudo.set_scheme(Some(String::from("http")));
        pseudo.set_path(Some(String::from("/foo.Small")));
        pseudo.set_authority(Some(String::from("localhost")));
        let mut fields = Headers::new();
        fields.append("content-type", "application/grpc").unwrap();
        fields.append("grpc-timeout", "5S").unwrap();
        fields.append("x-id", "42").unwrap();
        let mut parts = Parts::new();
        parts.set_pseudo(pseudo);
        parts.set_header_lines(fields);
        parts
    }

    /// UT test cases for `ServerStream::new` header parsing.
    ///
    /// # Brief
    /// 1. Builds a stream from a decoded request header block.
    /// 2. Checks method, authority, metadata filtering and the deadline
    ///    derived from grpc-timeout.
    #[test]
    fn ut_server_stream_new() {
        let (stream, _tx) = incoming(request_parts(), false);
        assert_eq!(stream.method(), "/foo.Small");
        assert_eq!(stream.authority(), Some("localhost"));
        assert_eq!(stream.metadata().get("x-id"), Some("42"));
        // Reserved names never surface as metadata.
        assert_eq!(stream.metadata().get("grpc-timeout"), None);
        assert!(stream.deadline().is_some());
    }

    /// UT test cases for `ServerStream::read` until the client
    /// half-closes.
    ///
    /// # Brief
    /// 1. Feeds two DATA chunks, the second carrying END_STREAM.
    /// 2. Reads everything and checks the clean EOF.
    #[tokio::test]
    async fn ut_server_stream_read() {
        let (mut stream, tx) = incoming(request_parts(), false);
        tx.send(StreamMessage::Data {
            data: b"pi".to_vec(),
            end_stream: false,
        })
        .unwrap();
        tx.send(StreamMessage::Data {
            data: b"ng".to_vec(),
            end_stream: true,
        })
        .unwrap();

        let mut buf = [0u8; 8];
        let mut collected = Vec::new();
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"ping");
    }

    /// UT test cases for reading a request that was trailers-only on
    /// arrival.
    ///
    /// # Brief
    /// 1. Builds a stream whose request HEADERS carried END_STREAM.
    /// 2. Checks the first read reports EOF.
    #[tokio::test]
    async fn ut_server_stream_read_empty_request() {
        let (mut stream, _tx) = incoming(request_parts(), true);
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }
}
