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

//! The client transport.
//!
//! `ClientTransport` turns one byte-duplex connection into a multiplexed
//! RPC client endpoint: it writes the HTTP/2 preface and initial
//! SETTINGS, then launches the frame writer, the frame reader, the
//! connection manager and (when configured) the keepalive pinger. New
//! streams are admitted by the manager, which serializes stream-id
//! allocation with HEADERS emission so ids always increase on the wire.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ylong_grpc::h2::{
    Frame, FrameDecoder, FrameEncoder, FrameFlags, Payload, SettingsBuilder, WindowUpdate,
    CONNECTION_PREFACE,
};
use ylong_grpc::pseudo::PseudoHeaders;
use ylong_grpc::status::Code;
use ylong_grpc::timeout::encode_timeout;

use crate::config::{
    ClientConfig, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE,
};
use crate::error::{dispatch_stream_error, StreamError, TransportError};
use crate::keepalive::{client_keepalive, TransportState};
use crate::runtime::{
    split, spawn, timeout, unbounded_channel, AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter,
    JoinHandle, TcpStream, UnboundedSender,
};
use crate::stream::append_metadata;
use crate::util::h2::bdp::BdpEstimator;
use crate::util::h2::manager::TransportRole;
use crate::util::h2::{
    ConnManager, FlowControl, RecvData, SendData, SettingsSync, StreamEvent, StreamMessage,
    Streams,
};
use crate::{Headers, Stream};

/// The per-call control data of one RPC.
pub struct CallHeader {
    method: String,
    authority: Option<String>,
    scheme: Option<String>,
    timeout: Option<Duration>,
    metadata: Headers,
    content_subtype: Option<String>,
}

impl CallHeader {
    /// Creates a `CallHeader` for the given full method path, for
    /// example `/pkg.Service/Call`.
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            authority: None,
            scheme: None,
            timeout: None,
            metadata: Headers::new(),
            content_subtype: None,
        }
    }

    /// Overrides the `:authority` of the call.
    pub fn set_authority(&mut self, authority: &str) {
        self.authority = Some(authority.to_string());
    }

    /// Overrides the `:scheme` of the call.
    pub fn set_scheme(&mut self, scheme: &str) {
        self.scheme = Some(scheme.to_string());
    }

    /// Sets the call deadline, transmitted as `grpc-timeout`.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Sets the `content-type` subtype, for example `proto`.
    pub fn set_content_subtype(&mut self, subtype: &str) {
        self.content_subtype = Some(subtype.to_string());
    }

    /// Application metadata sent with the call. Reserved names are
    /// dropped; `-bin` names are base64-coded on the wire.
    pub fn metadata_mut(&mut self) -> &mut Headers {
        &mut self.metadata
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// The client side of one RPC transport connection.
pub struct ClientTransport {
    events: UnboundedSender<StreamEvent>,
    state: Arc<TransportState>,
    handles: Vec<JoinHandle<()>>,
    authority: String,
    user_agent: String,
}

impl ClientTransport {
    /// Establishes a TCP connection to `addr` (honoring the configured
    /// connect timeout) and layers a client transport over it.
    pub async fn dial(addr: &str, config: ClientConfig) -> Result<Self, TransportError> {
        let connecting = TcpStream::connect(addr);
        let io = match config.connect_timeout() {
            Some(limit) => match timeout(limit, connecting).await {
                Ok(connected) => connected,
                Err(_) => {
                    return Err(TransportError::connection(
                        Code::Unavailable,
                        "connect deadline exceeded",
                    ));
                }
            },
            None => connecting.await,
        }
        .map_err(|e| {
            TransportError::connection(Code::Unavailable, &format!("dial failed: {}", e))
        })?;
        let _ = io.set_nodelay(true);
        Ok(Self::connect(io, config, addr))
    }

    /// Layers a client transport over an established byte-duplex
    /// connection. `authority` becomes the default `:authority` of
    /// calls.
    pub fn connect<S>(io: S, config: ClientConfig, authority: &str) -> Self
    where
        S: AsyncRead + AsyncWrite + Sync + Send + Unpin + 'static,
    {
        let state = Arc::new(TransportState::new());
        let settings_sync = Arc::new(Mutex::new(SettingsSync::default()));
        let (frame_tx, frame_rx) = unbounded_channel();
        let (resp_tx, resp_rx) = unbounded_channel();
        let (req_tx, req_rx) = unbounded_channel();

        let flow = FlowControl::new(config.conn_window_size(), DEFAULT_WINDOW_SIZE);
        let streams = Streams::new(
            true,
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

        // Initial SETTINGS; a client leaves MAX_CONCURRENT_STREAMS
        // unbounded.
        let settings = SettingsBuilder::new()
            .header_table_size(DEFAULT_HEADER_TABLE_SIZE)
            .enable_push(false)
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
            let mut writer = writer;
            if writer.write_all(CONNECTION_PREFACE).await.is_ok() {
                let send = SendData::new(encoder, send_sync, writer, frame_rx);
                let _ = send.run().await;
            }
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
            TransportRole::Client,
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

        if let Some(keepalive) = config.keepalive() {
            let params = keepalive.clone();
            let ka_state = state.clone();
            let ka_events = req_tx.clone();
            handles.push(spawn(async move {
                client_keepalive(params, ka_state, ka_events).await;
            }));
        }

        Self {
            events: req_tx,
            state,
            handles,
            authority: authority.to_string(),
            user_agent: config.user_agent().to_string(),
        }
    }

    /// Opens a new stream for one RPC. Blocks while the peer's
    /// MAX_CONCURRENT_STREAMS limit is exhausted; fails with a drain
    /// rejection once the transport is shutting down.
    pub async fn new_stream(&self, call: CallHeader) -> Result<Stream, TransportError> {
        if self.state.is_goaway() {
            return Err(TransportError::Stream(StreamError::drain()));
        }
        if self.state.is_shutdown() {
            return Err(TransportError::connection(
                Code::Unavailable,
                "transport is closed",
            ));
        }
        let deadline = call.timeout().map(|limit| Instant::now() + limit);
        let parts = self.build_request_parts(&call);

        let (resp_tx, mut resp_rx) = unbounded_channel();
        if self
            .events
            .send(StreamEvent::NewStream {
                parts,
                end_stream: false,
                resp_tx,
            })
            .is_err()
        {
            return Err(self.closed_error());
        }
        match resp_rx.recv().await {
            Some(StreamMessage::Started(id)) => {
                Ok(Stream::new(id, self.events.clone(), resp_rx, deadline))
            }
            Some(StreamMessage::GoingAway) => Err(TransportError::Stream(StreamError::drain())),
            Some(StreamMessage::Error(kind)) => Err(dispatch_stream_error(kind)),
            Some(_) => Err(TransportError::stream(
                Code::Internal,
                "unexpected stream admission message",
            )),
            None => Err(self.closed_error()),
        }
    }

    /// Starts a graceful shutdown: new streams are refused with a drain
    /// rejection, a GOAWAY is sent, and the connection closes once the
    /// last active stream completes.
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

    fn closed_error(&self) -> TransportError {
        if self.state.is_goaway() {
            TransportError::Stream(StreamError::drain())
        } else {
            TransportError::connection(Code::Unavailable, "transport is closed")
        }
    }

    fn build_request_parts(&self, call: &CallHeader) -> ylong_grpc::h2::Parts {
        let mut pseudo = PseudoHeaders::new();
        pseudo.set_method(Some(String::from("POST")));
        pseudo.set_scheme(Some(
            call.scheme.clone().unwrap_or_else(|| String::from("http")),
        ));
        pseudo.set_path(Some(call.method.clone()));
        pseudo.set_authority(Some(
            call.authority
                .clone()
                .unwrap_or_else(|| self.authority.clone()),
        ));

        let mut fields = Headers::new();
        let content_type = match &call.content_subtype {
            Some(subtype) => format!("application/grpc+{}", subtype),
            None => String::from("application/grpc"),
        };
        let _ = fields.append("content-type", &content_type);
        let _ = fields.append("te", "trailers");
        let _ = fields.append("user-agent", &self.user_agent);
        if let Some(limit) = call.timeout {
            let _ = fields.append("grpc-timeout", &encode_timeout(limit));
        }
        append_metadata(&mut fields, &call.metadata);

        let mut parts = ylong_grpc::h2::Parts::new();
        parts.set_pseudo(pseudo);
        parts.set_header_lines(fields);
        parts
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod ut_client {
    use super::*;

    /// UT test cases for `CallHeader` construction.
    ///
    /// # Brief
    /// 1. Builds a call header with every option set.
    /// 2. Checks the stored values.
    #[test]
    fn ut_call_header() {
        let mut call = CallHeader::new("/foo.Small");
        call.set_authority("example.com");
        call.set_scheme("https");
        call.set_timeout(Duration::from_secs(1));
        call.set_content_subtype("proto");
        call.metadata_mut().append("x-id", "7").unwrap();

        assert_eq!(call.method, "/foo.Small");
        assert_eq!(call.authority.as_deref(), Some("example.com"));
        assert_eq!(call.scheme.as_deref(), Some("https"));
        assert_eq!(call.timeout(), Some(Duration::from_secs(1)));
        assert_eq!(call.content_subtype.as_deref(), Some("proto"));
        assert_eq!(call.metadata.get("x-id"), Some("7"));
    }
}
