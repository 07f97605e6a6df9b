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

//! `ylong_grpc_transport` provides the client and server engines of a
//! full-duplex, multiplexed RPC transport layered over HTTP/2.
//!
//! A transport turns one byte-duplex connection into a set of concurrent,
//! independently flow-controlled request/response streams with
//! end-to-end status semantics, keepalive and graceful shutdown. Each
//! transport owns three long-lived tasks (a frame reader, a frame
//! writer and a connection manager) plus a keepalive timer task; stream
//! handles talk to the manager through channels and never touch the
//! socket directly.
//!
//! # Supported roles
//! - [`ClientTransport`]: dials, opens streams, runs the keepalive
//!   pinger.
//! - [`ServerTransport`]: accepts streams, enforces the keepalive
//!   policy, runs connection idle and age timers.

mod error;

mod client;
mod config;
mod keepalive;
mod server;
mod stream;

pub(crate) mod util;

pub use client::{CallHeader, ClientTransport};
pub use config::{
    ClientConfig, ClientKeepalive, KeepalivePolicy, ServerConfig, ServerKeepalive,
};
pub use error::{ConnectionError, StreamError, TransportError};
pub use server::{ServerStream, ServerTransport};
pub use stream::{Stream, StreamReader, StreamWriter};

pub use ylong_grpc::headers::Headers;
pub use ylong_grpc::status::{Code, Status};

// Runtime components import adapter.
#[cfg(feature = "tokio_base")]
pub(crate) mod runtime {
    pub(crate) use tokio::io::{
        split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf,
    };
    pub(crate) use tokio::net::TcpStream;
    pub(crate) use tokio::select;
    pub(crate) use tokio::spawn;
    pub(crate) use tokio::sync::mpsc::error::TryRecvError;
    pub(crate) use tokio::sync::mpsc::{
        unbounded_channel, UnboundedReceiver, UnboundedSender,
    };
    pub(crate) use tokio::task::JoinHandle;
    pub(crate) use tokio::time::{sleep, timeout};
}
