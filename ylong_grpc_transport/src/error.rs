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

//! Definition of the transport error taxonomy.
//!
//! Two user-visible kinds exist. A [`StreamError`] carries an RPC status
//! and poisons one stream; the connection survives. A
//! [`ConnectionError`] is fatal: the transport closes and every stream
//! fails. A stream error may additionally be marked as a drain
//! rejection, meaning the stream never reached the peer and is safe to
//! retry on another connection.

use core::fmt;

use ylong_grpc::h2::H2Error;
use ylong_grpc::status::{Code, Status};

/// Internal error plumbing between the reader, writer, manager and
/// stream handles.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub(crate) enum DispatchErrorKind {
    H2(H2Error),
    Io(std::io::ErrorKind),
    ChannelClosed,
    Disconnect,
    KeepaliveTimeout,
}

impl From<std::io::Error> for DispatchErrorKind {
    fn from(value: std::io::Error) -> Self {
        DispatchErrorKind::Io(value.kind())
    }
}

impl From<H2Error> for DispatchErrorKind {
    fn from(err: H2Error) -> Self {
        DispatchErrorKind::H2(err)
    }
}

/// An error scoped to one stream. The connection stays usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    status: Status,
    drain: bool,
}

impl StreamError {
    /// Creates a `StreamError` carrying the given status.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            drain: false,
        }
    }

    /// Creates the drain rejection: the transport is shutting down
    /// gracefully and the stream was never started, so retrying it on a
    /// fresh connection is safe.
    pub fn drain() -> Self {
        Self {
            status: Status::new(Code::Unavailable, "the connection is draining"),
            drain: true,
        }
    }

    /// Gets the RPC status of the error.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Returns `true` for a drain rejection.
    pub fn is_drain(&self) -> bool {
        self.drain
    }
}

/// A fatal transport error: the connection is closed and every stream on
/// it fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionError {
    status: Status,
}

impl ConnectionError {
    /// Creates a `ConnectionError` carrying the given status.
    pub fn new(status: Status) -> Self {
        Self { status }
    }

    /// Gets the RPC status of the error.
    pub fn status(&self) -> &Status {
        &self.status
    }
}

/// The error type surfaced by every transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A per-stream failure; other streams are unaffected.
    Stream(StreamError),
    /// A connection failure; the transport is unusable.
    Connection(ConnectionError),
}

impl TransportError {
    pub(crate) fn stream(code: Code, message: &str) -> Self {
        TransportError::Stream(StreamError::new(Status::new(code, message)))
    }

    pub(crate) fn connection(code: Code, message: &str) -> Self {
        TransportError::Connection(ConnectionError::new(Status::new(code, message)))
    }

    /// Gets the RPC status carried by the error.
    pub fn status(&self) -> &Status {
        match self {
            TransportError::Stream(err) => err.status(),
            TransportError::Connection(err) => err.status(),
        }
    }

    /// Returns `true` if this is a drain rejection.
    pub fn is_drain(&self) -> bool {
        matches!(self, TransportError::Stream(err) if err.is_drain())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Stream(err) => write!(f, "stream error: {}", err.status()),
            TransportError::Connection(err) => write!(f, "connection error: {}", err.status()),
        }
    }
}

impl std::error::Error for TransportError {}

/// Maps an internal dispatch error to the error a stream operation
/// surfaces.
pub(crate) fn dispatch_stream_error(kind: DispatchErrorKind) -> TransportError {
    match kind {
        DispatchErrorKind::H2(H2Error::StreamError(_, code)) => TransportError::Stream(
            StreamError::new(Status::new(Code::from_h2_error(code), "stream reset")),
        ),
        DispatchErrorKind::H2(H2Error::ConnectionError(code)) => {
            let rpc = match Code::from_h2_error(code) {
                // A clean GOAWAY still fails in-flight work.
                Code::Ok => Code::Unavailable,
                other => other,
            };
            TransportError::connection(rpc, "connection terminated by http2 error")
        }
        DispatchErrorKind::Io(kind) => TransportError::connection(
            Code::Unavailable,
            &format!("connection i/o error: {:?}", kind),
        ),
        DispatchErrorKind::ChannelClosed => {
            TransportError::connection(Code::Unavailable, "transport is closed")
        }
        DispatchErrorKind::Disconnect => {
            TransportError::connection(Code::Unavailable, "connection closed by peer")
        }
        DispatchErrorKind::KeepaliveTimeout => TransportError::connection(
            Code::Unavailable,
            "keepalive ping failed to receive ACK within timeout",
        ),
    }
}

#[cfg(test)]
mod ut_error {
    use super::*;
    use ylong_grpc::h2::ErrorCode;

    /// UT test cases for `dispatch_stream_error`.
    ///
    /// # Brief
    /// 1. Maps stream-level, connection-level, io and keepalive dispatch
    ///    errors.
    /// 2. Checks the surfaced kinds and codes.
    #[test]
    fn ut_dispatch_stream_error() {
        let err = dispatch_stream_error(DispatchErrorKind::H2(H2Error::StreamError(
            1,
            ErrorCode::Cancel,
        )));
        assert!(matches!(&err, TransportError::Stream(e) if e.status().code() == Code::Canceled));

        let err = dispatch_stream_error(DispatchErrorKind::H2(H2Error::ConnectionError(
            ErrorCode::EnhanceYourCalm,
        )));
        assert!(
            matches!(&err, TransportError::Connection(e) if e.status().code() == Code::ResourceExhausted)
        );

        let err = dispatch_stream_error(DispatchErrorKind::H2(H2Error::ConnectionError(
            ErrorCode::NoError,
        )));
        assert_eq!(err.status().code(), Code::Unavailable);

        let err = dispatch_stream_error(DispatchErrorKind::KeepaliveTimeout);
        assert_eq!(err.status().code(), Code::Unavailable);
        assert!(!err.is_drain());
    }

    /// UT test cases for `StreamError::drain`.
    ///
    /// # Brief
    /// 1. Creates a drain rejection.
    /// 2. Checks the code and the drain marker.
    #[test]
    fn ut_stream_error_drain() {
        let err = TransportError::Stream(StreamError::drain());
        assert!(err.is_drain());
        assert_eq!(err.status().code(), Code::Unavailable);
    }
}
