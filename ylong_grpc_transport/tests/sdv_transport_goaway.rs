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

#![cfg(feature = "tokio_base")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::transport_pair;
use ylong_grpc_transport::{
    CallHeader, ClientConfig, Headers, ServerConfig, ServerStream, Status,
};

/// SDV test case for graceful close with an active stream.
///
/// # Brief
/// 1. Opens a stream whose response the server delays.
/// 2. Calls `graceful_close` mid-RPC, then issues 100 concurrent
///    `new_stream` calls.
/// 3. Checks every new call fails with a drain rejection while the
///    active stream still completes normally.
#[tokio::test]
async fn sdv_transport_graceful_close() {
    let (client, server) = transport_pair(ClientConfig::new(), ServerConfig::new()).await;

    tokio::spawn(server.handle_streams(|mut stream: ServerStream| async move {
        let mut buf = [0u8; 64];
        while stream.read(&mut buf).await.expect("server read failed") != 0 {}
        // Answer only after the client started draining.
        tokio::time::sleep(Duration::from_millis(500)).await;
        stream.write(b"pong").await.expect("server write failed");
        stream
            .write_status(&Status::ok(), &Headers::new())
            .await
            .expect("server status failed");
    }));

    let mut active = client
        .new_stream(CallHeader::new("/foo.Slow"))
        .await
        .expect("new stream failed");
    active.write(b"ping", true).await.expect("write failed");

    client.graceful_close();

    let client = Arc::new(client);
    let mut rejected = Vec::new();
    for _ in 0..100 {
        let client = client.clone();
        rejected.push(tokio::spawn(async move {
            client.new_stream(CallHeader::new("/foo.Late")).await
        }));
    }
    for task in rejected {
        let result = task.await.expect("new_stream task failed");
        let err = result.err().expect("draining transport accepted a stream");
        assert!(err.is_drain(), "expected drain rejection, got {}", err);
    }

    // The in-flight stream is unaffected by the drain.
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), active.read(&mut buf))
        .await
        .expect("active stream starved during drain")
        .expect("active stream failed");
    assert_eq!(&buf[..n], b"pong");
    while active.read(&mut buf).await.expect("active read failed") != 0 {}
    assert!(active.status().expect("missing status").is_ok());
}

/// SDV test case for the server-initiated drain.
///
/// # Brief
/// 1. The server gracefully closes while no stream is active.
/// 2. Checks a subsequent client call is refused with a retryable
///    error.
#[tokio::test]
async fn sdv_transport_server_drain() {
    let (client, server) = transport_pair(ClientConfig::new(), ServerConfig::new()).await;

    server.graceful_close();
    // Let the GOAWAY travel to the client.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = client
        .new_stream(CallHeader::new("/foo.Refused"))
        .await
        .err()
        .expect("drained connection accepted a stream");
    assert!(err.is_drain() || err.status().code() == ylong_grpc_transport::Code::Unavailable);
}
