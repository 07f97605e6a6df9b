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

use std::time::{Duration, Instant};

use common::{encode_frame, local_listener, send_raw, wait_for_frame};
use tokio::io::AsyncReadExt;
use ylong_grpc::h2::{
    ErrorCode, Frame, FrameDecoder, FrameEncoder, FrameFlags, Payload, Ping, Settings,
    CONNECTION_PREFACE,
};
use ylong_grpc_transport::{
    ClientConfig, ClientKeepalive, ClientTransport, KeepalivePolicy, ServerConfig,
    ServerTransport,
};

/// SDV test case for the client keepalive timeout.
///
/// # Brief
/// 1. Dials a peer that accepts the connection but never answers.
/// 2. Configures keepalive with time 2 s, timeout 1 s, permitted
///    without streams.
/// 3. Checks the transport transitions to closed within time + timeout
///    plus slack, and that new streams then fail.
#[tokio::test]
async fn sdv_transport_keepalive_close() {
    let (listener, addr) = local_listener().await;
    let silent_peer = tokio::spawn(async move {
        let (mut io, _) = listener.accept().await.expect("accept failed");
        // Swallow everything, answer nothing.
        let mut sink = [0u8; 4096];
        while let Ok(n) = io.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    });

    let mut config = ClientConfig::new();
    config.set_keepalive(
        ClientKeepalive::new(Duration::from_secs(2), Duration::from_secs(1))
            .permit_without_stream(),
    );
    let client = ClientTransport::dial(&addr, config).await.expect("dial failed");

    let started = Instant::now();
    while !client.is_closed() {
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "keepalive did not close the unresponsive connection"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // Time (2s) + timeout (1s) plus scheduling slack.
    assert!(started.elapsed() >= Duration::from_secs(2));

    let err = client
        .new_stream(ylong_grpc_transport::CallHeader::new("/foo.Dead"))
        .await
        .err()
        .expect("closed transport accepted a stream");
    assert_eq!(err.status().code(), ylong_grpc_transport::Code::Unavailable);

    silent_peer.abort();
}

/// SDV test case for server keepalive enforcement.
///
/// # Brief
/// 1. Starts a server whose policy requires 2 s between pings.
/// 2. A raw client opens the connection and pings every 50 ms with no
///    streams.
/// 3. Checks the server answers with GOAWAY(ENHANCE_YOUR_CALM) within
///    10 s.
#[tokio::test]
async fn sdv_transport_ping_enforcement() {
    let (listener, addr) = local_listener().await;

    let mut policy = KeepalivePolicy::new();
    policy.set_min_time(Duration::from_secs(2));
    let mut config = ServerConfig::new();
    config.set_keepalive_policy(policy);

    let server = tokio::spawn(async move {
        let (io, _) = listener.accept().await.expect("accept failed");
        let _transport = ServerTransport::accept(io, config)
            .await
            .expect("server transport failed");
        // Keep the transport alive while the raw client misbehaves.
        tokio::time::sleep(Duration::from_secs(15)).await;
    });

    let mut io = tokio::net::TcpStream::connect(&addr)
        .await
        .expect("connect failed");
    io.set_nodelay(true).ok();

    let mut encoder = FrameEncoder::new(16384, false);
    let mut preface = CONNECTION_PREFACE.to_vec();
    preface.extend_from_slice(&encode_frame(
        &mut encoder,
        Frame::new(0, FrameFlags::empty(), Payload::Settings(Settings::new(vec![]))),
    ));
    send_raw(&mut io, &preface).await;

    let mut decoder = FrameDecoder::new();
    let goaway = async {
        loop {
            let ping = encode_frame(
                &mut encoder,
                Frame::new(0, FrameFlags::empty(), Payload::Ping(Ping::new([9; 8]))),
            );
            send_raw(&mut io, &ping).await;
            if let Some(frame) = wait_for_frame(
                &mut io,
                &mut decoder,
                Duration::from_millis(50),
                |frame| matches!(frame.payload(), Payload::Goaway(_)),
            )
            .await
            {
                break frame;
            }
        }
    };
    let frame = tokio::time::timeout(Duration::from_secs(10), goaway)
        .await
        .expect("no GOAWAY within the enforcement window");
    match frame.payload() {
        Payload::Goaway(goaway) => {
            assert_eq!(
                goaway.get_error_code(),
                ErrorCode::EnhanceYourCalm.into_code()
            );
            assert_eq!(goaway.get_debug_data(), b"too_many_pings");
        }
        _ => panic!("unexpected frame"),
    }

    server.abort();
}
