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

//! The client-side stream handle.
//!
//! A [`Stream`] carries one RPC. Writing queues bytes through the
//! manager and resolves once they have cleared both flow-control levels;
//! reading drains the per-stream receive buffer and surfaces the
//! end-to-end status parsed from trailers. After any terminal error both
//! directions stay poisoned with that same error.

use std::time::Instant;

use ylong_grpc::h2::{ErrorCode, Parts, StreamId};
use ylong_grpc::status::{Code, Status};

use crate::error::{dispatch_stream_error, StreamError, TransportError};
use crate::runtime::{timeout, unbounded_channel, UnboundedReceiver, UnboundedSender};
use crate::util::base64;
use crate::util::h2::{StreamEvent, StreamMessage};
use crate::Headers;

/// Header names the transport owns; they are never surfaced as (or taken
/// from) application metadata.
pub(crate) const RESERVED_HEADERS: [&str; 8] = [
    "content-type",
    "grpc-message-type",
    "grpc-encoding",
    "grpc-accept-encoding",
    "grpc-message",
    "grpc-status",
    "grpc-timeout",
    "te",
];

/// A bidirectional RPC stream opened by the client transport.
pub struct Stream {
    writer: StreamWriter,
    reader: StreamReader,
}

/// The sending half of a stream.
pub struct StreamWriter {
    id: StreamId,
    events: UnboundedSender<StreamEvent>,
    deadline: Option<Instant>,
    local_closed: bool,
    failed: Option<TransportError>,
}

/// The receiving half of a stream.
pub struct StreamReader {
    id: StreamId,
    events: UnboundedSender<StreamEvent>,
    receiver: UnboundedReceiver<StreamMessage>,
    deadline: Option<Instant>,
    remain: Vec<u8>,
    remain_offset: usize,
    headers: Option<Headers>,
    trailers: Option<Headers>,
    status: Option<Status>,
    terminal: Option<TransportError>,
    eof: bool,
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        events: UnboundedSender<StreamEvent>,
        receiver: UnboundedReceiver<StreamMessage>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            writer: StreamWriter {
                id,
                events: events.clone(),
                deadline,
                local_closed: false,
                failed: None,
            },
            reader: StreamReader {
                id,
                events,
                receiver,
                deadline,
                remain: Vec::new(),
                remain_offset: 0,
                headers: None,
                trailers: None,
                status: None,
                terminal: None,
                eof: false,
            },
        }
    }

    /// Gets the HTTP/2 stream id.
    pub fn id(&self) -> StreamId {
        self.reader.id
    }

    /// Sends bytes on the stream; `end_stream` half-closes the local
    /// side. Resolves once the bytes cleared both flow-control windows.
    pub async fn write(&mut self, data: &[u8], end_stream: bool) -> Result<(), TransportError> {
        self.writer.write(data, end_stream).await
    }

    /// Reads received bytes into `buf`. Returns `Ok(0)` at a clean end
    /// of stream; the final status is then available through `status`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.reader.read(buf).await
    }

    /// Cancels the stream with the given status. Pending and future
    /// operations fail with it.
    pub fn cancel(&mut self, status: Status) {
        self.reader.cancel(status);
    }

    /// Initial metadata received from the peer, once headers arrived.
    pub fn headers(&self) -> Option<&Headers> {
        self.reader.headers()
    }

    /// Trailing metadata received from the peer.
    pub fn trailers(&self) -> Option<&Headers> {
        self.reader.trailers()
    }

    /// The end-to-end status, once the stream terminated.
    pub fn status(&self) -> Option<&Status> {
        self.reader.status()
    }

    /// Splits the stream into independently usable halves, so one task
    /// can write while another reads.
    pub fn split(self) -> (StreamWriter, StreamReader) {
        (self.writer, self.reader)
    }
}

impl StreamWriter {
    /// Sends bytes on the stream; see [`Stream::write`].
    pub async fn write(&mut self, data: &[u8], end_stream: bool) -> Result<(), TransportError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.local_closed {
            return Err(TransportError::stream(
                Code::Internal,
                "write after end of stream",
            ));
        }
        if deadline_expired(self.deadline) {
            return Err(self.fail_deadline());
        }

        let (ack_tx, mut ack_rx) = unbounded_channel();
        if self
            .events
            .send(StreamEvent::Write {
                id: self.id,
                data: data.to_vec(),
                end_stream,
                ack: ack_tx,
            })
            .is_err()
        {
            let err = TransportError::connection(Code::Unavailable, "transport is closed");
            self.failed = Some(err.clone());
            return Err(err);
        }

        let acked = match remaining(self.deadline) {
            Some(limit) => match timeout(limit, ack_rx.recv()).await {
                Ok(acked) => acked,
                Err(_) => {
                    let _ = self.events.send(StreamEvent::Cancel {
                        id: self.id,
                        code: ErrorCode::Cancel,
                    });
                    return Err(self.fail_deadline());
                }
            },
            None => ack_rx.recv().await,
        };
        match acked {
            Some(Ok(())) => {
                if end_stream {
                    self.local_closed = true;
                }
                Ok(())
            }
            Some(Err(kind)) => {
                let err = dispatch_stream_error(kind);
                self.failed = Some(err.clone());
                Err(err)
            }
            None => {
                let err = TransportError::connection(Code::Unavailable, "transport is closed");
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    fn fail_deadline(&mut self) -> TransportError {
        let err = TransportError::stream(Code::DeadlineExceeded, "deadline exceeded");
        self.failed = Some(err.clone());
        err
    }
}

impl StreamReader {
    /// Reads received bytes; see [`Stream::read`].
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
                // Consumed bytes go back to the peer's window.
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
            let message = self.recv_message().await?;
            self.process_message(message);
        }
    }

    /// Cancels the stream; see [`Stream::cancel`].
    pub fn cancel(&mut self, status: Status) {
        if self.terminal.is_none() && !self.eof {
            let _ = self.events.send(StreamEvent::Cancel {
                id: self.id,
                code: ErrorCode::Cancel,
            });
            self.terminal = Some(TransportError::Stream(StreamError::new(status)));
        }
    }

    /// Initial metadata received from the peer.
    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    /// Trailing metadata received from the peer.
    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    /// The end-to-end status, once the stream terminated.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    async fn recv_message(&mut self) -> Result<StreamMessage, TransportError> {
        if deadline_expired(self.deadline) {
            return Err(self.fail_deadline());
        }
        let received = match remaining(self.deadline) {
            Some(limit) => match timeout(limit, self.receiver.recv()).await {
                Ok(received) => received,
                Err(_) => return Err(self.fail_deadline()),
            },
            None => self.receiver.recv().await,
        };
        match received {
            Some(message) => Ok(message),
            None => {
                let err = TransportError::connection(Code::Unavailable, "transport is closed");
                self.terminal = Some(err.clone());
                Err(err)
            }
        }
    }

    fn process_message(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Started(_) => {}
            StreamMessage::Headers { parts, end_stream } => {
                self.process_headers(parts, end_stream);
            }
            StreamMessage::Data { data, end_stream } => {
                self.remain = data;
                self.remain_offset = 0;
                if end_stream {
                    self.eof = true;
                }
            }
            StreamMessage::Reset { code } => {
                if code == ErrorCode::NoError && self.status.is_some() {
                    self.eof = true;
                } else {
                    let rpc = match Code::from_h2_error(code) {
                        // NO_ERROR before any status still ends the RPC
                        // without a result.
                        Code::Ok => Code::Internal,
                        other => other,
                    };
                    let status = Status::new(rpc, "stream reset by peer");
                    self.status = Some(status.clone());
                    self.terminal = Some(TransportError::Stream(StreamError::new(status)));
                }
            }
            StreamMessage::GoingAway => {
                let err = TransportError::Stream(StreamError::drain());
                self.status = Some(err.status().clone());
                self.terminal = Some(err);
            }
            StreamMessage::Error(kind) => {
                let err = dispatch_stream_error(kind);
                self.status = Some(err.status().clone());
                self.terminal = Some(err);
            }
        }
    }

    fn process_headers(&mut self, parts: Parts, end_stream: bool) {
        let (pseudo, fields) = parts.parts();

        // A proxy may answer with a bare HTTP status before any
        // grpc-status exists; the first non-200 wins.
        if self.headers.is_none() {
            if let Some(raw) = pseudo.status() {
                let http_status = raw.parse::<u16>().unwrap_or(0);
                if http_status != 200 {
                    let status = Status::new(
                        Code::from_http_status(http_status),
                        &format!("unexpected HTTP status {}", raw),
                    );
                    self.status = Some(status.clone());
                    self.terminal = Some(TransportError::Stream(StreamError::new(status)));
                    return;
                }
            }
        }

        let trailers = self.headers.is_some() || end_stream;
        if !trailers {
            self.headers = Some(extract_metadata(fields));
            return;
        }

        match fields.get("grpc-status") {
            Some(raw) => {
                let status = Status::from_trailers(raw, fields.get("grpc-message"));
                self.trailers = Some(extract_metadata(fields));
                if status.is_ok() {
                    self.status = Some(status);
                    self.eof = true;
                } else {
                    self.status = Some(status.clone());
                    self.terminal = Some(TransportError::Stream(StreamError::new(status)));
                }
            }
            None if end_stream => {
                let status = Status::new(Code::Unknown, "missing grpc-status in trailers");
                self.status = Some(status.clone());
                self.terminal = Some(TransportError::Stream(StreamError::new(status)));
            }
            None => {
                // Trailers must end the stream.
                let status = Status::new(Code::Internal, "trailers without END_STREAM");
                self.status = Some(status.clone());
                self.terminal = Some(TransportError::Stream(StreamError::new(status)));
            }
        }
    }

    fn fail_deadline(&mut self) -> TransportError {
        let err = TransportError::stream(Code::DeadlineExceeded, "deadline exceeded");
        if self.terminal.is_none() {
            let _ = self.events.send(StreamEvent::Cancel {
                id: self.id,
                code: ErrorCode::Cancel,
            });
            self.status = Some(err.status().clone());
            self.terminal = Some(err.clone());
        }
        err
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        // An unfinished stream is cancelled so the peer and the stream
        // map are released.
        if self.terminal.is_none() && !self.eof {
            let _ = self.events.send(StreamEvent::Cancel {
                id: self.id,
                code: ErrorCode::Cancel,
            });
        }
    }
}

fn deadline_expired(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(deadline) if Instant::now() >= deadline)
}

fn remaining(deadline: Option<Instant>) -> Option<std::time::Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

/// Copies application metadata into a wire field section, dropping
/// reserved names and base64-coding `-bin` values.
pub(crate) fn append_metadata(fields: &mut Headers, metadata: &Headers) {
    for (name, value) in metadata.iter() {
        if RESERVED_HEADERS.contains(&name) {
            continue;
        }
        if name.ends_with("-bin") {
            let encoded = base64::encode(value.as_bytes());
            let encoded = String::from_utf8(encoded).unwrap_or_default();
            let _ = fields.append(name, &encoded);
        } else {
            let _ = fields.append(name, value);
        }
    }
}

/// Extracts application metadata from a wire field section, dropping
/// reserved names and decoding `-bin` values.
pub(crate) fn extract_metadata(fields: &Headers) -> Headers {
    let mut metadata = Headers::new();
    for (name, value) in fields.iter() {
        if RESERVED_HEADERS.contains(&name) {
            continue;
        }
        if name.ends_with("-bin") {
            if let Some(decoded) = base64::decode(value.as_bytes()) {
                if let Ok(text) = String::from_utf8(decoded) {
                    let _ = metadata.append(name, &text);
                }
            }
        } else {
            let _ = metadata.append(name, value);
        }
    }
    metadata
}
