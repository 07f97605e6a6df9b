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

#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ylong_grpc::h2::{Frame, FrameDecoder, FrameEncoder, FrameKind};
use ylong_grpc_transport::{ClientConfig, ClientTransport, ServerConfig, ServerTransport};

/// Builds a connected client/server transport pair over loopback TCP.
pub async fn transport_pair(
    client_config: ClientConfig,
    server_config: ServerConfig,
) -> (ClientTransport, ServerTransport) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("server bind port failed");
    let addr = listener.local_addr().expect("get server local address failed");

    let server_task = tokio::spawn(async move {
        let (io, _) = listener.accept().await.expect("accept failed");
        io.set_nodelay(true).ok();
        ServerTransport::accept(io, server_config)
            .await
            .expect("server transport failed")
    });

    let client = ClientTransport::dial(&addr.to_string(), client_config)
        .await
        .expect("client dial failed");
    let server = server_task.await.expect("server task failed");
    (client, server)
}

/// Binds a listener and returns it with its address string.
pub async fn local_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("server bind port failed");
    let addr = listener.local_addr().expect("get server local address failed");
    (listener, addr.to_string())
}

/// Serializes one frame to wire octets.
pub fn encode_frame(encoder: &mut FrameEncoder, frame: Frame) -> Vec<u8> {
    encoder.set_frame(frame).expect("encode frame failed");
    let mut out = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = encoder.encode(&mut chunk);
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    out
}

/// Reads from the socket until `predicate` matches a decoded frame or
/// the deadline passes. Returns the matching frame.
pub async fn wait_for_frame<F>(
    io: &mut TcpStream,
    decoder: &mut FrameDecoder,
    limit: std::time::Duration,
    mut predicate: F,
) -> Option<Frame>
where
    F: FnMut(&Frame) -> bool,
{
    let deadline = std::time::Instant::now() + limit;
    let mut buf = [0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let read = match tokio::time::timeout(remaining, io.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => return None,
            Ok(Ok(read)) => read,
            Ok(Err(_)) => return None,
        };
        let frames = match decoder.decode(&buf[..read]) {
            Ok(frames) => frames,
            Err(_) => return None,
        };
        for kind in frames {
            if let FrameKind::Complete(frame) = kind {
                if predicate(&frame) {
                    return Some(frame);
                }
            }
        }
    }
}

/// Writes raw bytes and flushes.
pub async fn send_raw(io: &mut TcpStream, bytes: &[u8]) {
    io.write_all(bytes).await.expect("raw write failed");
    io.flush().await.expect("raw flush failed");
}
