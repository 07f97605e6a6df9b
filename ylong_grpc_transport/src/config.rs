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

//! Transport configuration module.

use core::time::Duration;

pub(crate) const DEFAULT_WINDOW_SIZE: u32 = 65535;
pub(crate) const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024;
pub(crate) const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 16 * 1024;
pub(crate) const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;
pub(crate) const DEFAULT_WRITE_BUFFER_SIZE: usize = 32 * 1024;
pub(crate) const DEFAULT_READ_BUFFER_SIZE: usize = 32 * 1024;
pub(crate) const DEFAULT_MAX_STREAMS: u32 = 100;
pub(crate) const DEFAULT_USER_AGENT: &str = "ylong-grpc-rust/0.1.0";

const DEFAULT_SERVER_KEEPALIVE_TIME: Duration = Duration::from_secs(2 * 60 * 60);
const DEFAULT_SERVER_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_ENFORCEMENT_MIN_TIME: Duration = Duration::from_secs(5 * 60);

/// Options which configure a client transport.
#[derive(Clone)]
pub struct ClientConfig {
    init_stream_window_size: u32,
    init_conn_window_size: u32,
    window_size_set: bool,
    max_frame_size: u32,
    max_header_list_size: u32,
    write_buffer_size: usize,
    read_buffer_size: usize,
    connect_timeout: Option<Duration>,
    keepalive: Option<ClientKeepalive>,
    user_agent: String,
    use_huffman: bool,
}

impl ClientConfig {
    /// `ClientConfig` constructor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial per-stream receive window. Setting an explicit
    /// window disables adaptive (BDP) window sizing.
    pub fn set_stream_window_size(&mut self, size: u32) {
        self.init_stream_window_size = size;
        self.window_size_set = true;
    }

    /// Sets the initial connection receive window. Setting an explicit
    /// window disables adaptive (BDP) window sizing.
    pub fn set_conn_window_size(&mut self, size: u32) {
        self.init_conn_window_size = size;
        self.window_size_set = true;
    }

    /// Sets the SETTINGS_MAX_FRAME_SIZE advertised to the peer.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Sets the SETTINGS_MAX_HEADER_LIST_SIZE advertised to the peer.
    pub fn set_max_header_list_size(&mut self, size: u32) {
        self.max_header_list_size = size;
    }

    /// Sets the socket write buffer size.
    pub fn set_write_buffer_size(&mut self, size: usize) {
        self.write_buffer_size = size;
    }

    /// Sets the socket read buffer size.
    pub fn set_read_buffer_size(&mut self, size: usize) {
        self.read_buffer_size = size;
    }

    /// Sets the deadline applied around connection establishment.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = Some(timeout);
    }

    /// Enables client keepalive with the given parameters.
    pub fn set_keepalive(&mut self, keepalive: ClientKeepalive) {
        self.keepalive = Some(keepalive);
    }

    /// Sets the user agent sent with every call.
    pub fn set_user_agent(&mut self, user_agent: &str) {
        self.user_agent = user_agent.to_string();
    }

    /// Selects Huffman coding of header strings.
    pub fn set_use_huffman_coding(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    pub(crate) fn stream_window_size(&self) -> u32 {
        self.init_stream_window_size
    }

    pub(crate) fn conn_window_size(&self) -> u32 {
        self.init_conn_window_size
    }

    pub(crate) fn window_size_set(&self) -> bool {
        self.window_size_set
    }

    pub(crate) fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub(crate) fn max_header_list_size(&self) -> u32 {
        self.max_header_list_size
    }

    pub(crate) fn write_buffer_size(&self) -> usize {
        self.write_buffer_size
    }

    pub(crate) fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub(crate) fn keepalive(&self) -> Option<&ClientKeepalive> {
        self.keepalive.as_ref()
    }

    pub(crate) fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub(crate) fn use_huffman_coding(&self) -> bool {
        self.use_huffman
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            init_stream_window_size: DEFAULT_WINDOW_SIZE,
            init_conn_window_size: DEFAULT_WINDOW_SIZE,
            window_size_set: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            connect_timeout: None,
            keepalive: None,
            user_agent: String::from(DEFAULT_USER_AGENT),
            use_huffman: true,
        }
    }
}

/// Client keepalive parameters.
///
/// Every `time` interval a PING is sent; if no acknowledgement arrives
/// within `timeout` the connection is closed as unreachable. When
/// `permit_without_stream` is false the pinger pauses while no stream is
/// active.
#[derive(Clone)]
pub struct ClientKeepalive {
    time: Duration,
    timeout: Duration,
    permit_without_stream: bool,
}

impl ClientKeepalive {
    /// Creates keepalive parameters with the given interval and timeout.
    pub fn new(time: Duration, timeout: Duration) -> Self {
        Self {
            time,
            timeout,
            permit_without_stream: false,
        }
    }

    /// Keeps pinging even while no stream is active.
    pub fn permit_without_stream(mut self) -> Self {
        self.permit_without_stream = true;
        self
    }

    pub(crate) fn time(&self) -> Duration {
        self.time
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn is_permit_without_stream(&self) -> bool {
        self.permit_without_stream
    }
}

/// Options which configure a server transport.
#[derive(Clone)]
pub struct ServerConfig {
    init_stream_window_size: u32,
    init_conn_window_size: u32,
    window_size_set: bool,
    max_frame_size: u32,
    max_header_list_size: u32,
    write_buffer_size: usize,
    read_buffer_size: usize,
    max_streams: u32,
    keepalive: ServerKeepalive,
    policy: KeepalivePolicy,
    use_huffman: bool,
}

impl ServerConfig {
    /// `ServerConfig` constructor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial per-stream receive window. Setting an explicit
    /// window disables adaptive (BDP) window sizing.
    pub fn set_stream_window_size(&mut self, size: u32) {
        self.init_stream_window_size = size;
        self.window_size_set = true;
    }

    /// Sets the initial connection receive window. Setting an explicit
    /// window disables adaptive (BDP) window sizing.
    pub fn set_conn_window_size(&mut self, size: u32) {
        self.init_conn_window_size = size;
        self.window_size_set = true;
    }

    /// Sets the SETTINGS_MAX_FRAME_SIZE advertised to the peer.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Sets the SETTINGS_MAX_HEADER_LIST_SIZE advertised to the peer.
    pub fn set_max_header_list_size(&mut self, size: u32) {
        self.max_header_list_size = size;
    }

    /// Sets the socket write buffer size.
    pub fn set_write_buffer_size(&mut self, size: usize) {
        self.write_buffer_size = size;
    }

    /// Sets the socket read buffer size.
    pub fn set_read_buffer_size(&mut self, size: usize) {
        self.read_buffer_size = size;
    }

    /// Sets the maximum number of concurrent streams the server accepts.
    pub fn set_max_streams(&mut self, num: u32) {
        self.max_streams = num;
    }

    /// Sets the server keepalive parameters.
    pub fn set_keepalive(&mut self, keepalive: ServerKeepalive) {
        self.keepalive = keepalive;
    }

    /// Sets the keepalive enforcement policy.
    pub fn set_keepalive_policy(&mut self, policy: KeepalivePolicy) {
        self.policy = policy;
    }

    /// Selects Huffman coding of header strings.
    pub fn set_use_huffman_coding(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    pub(crate) fn stream_window_size(&self) -> u32 {
        self.init_stream_window_size
    }

    pub(crate) fn conn_window_size(&self) -> u32 {
        self.init_conn_window_size
    }

    pub(crate) fn window_size_set(&self) -> bool {
        self.window_size_set
    }

    pub(crate) fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub(crate) fn max_header_list_size(&self) -> u32 {
        self.max_header_list_size
    }

    pub(crate) fn write_buffer_size(&self) -> usize {
        self.write_buffer_size
    }

    pub(crate) fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub(crate) fn max_streams(&self) -> u32 {
        self.max_streams
    }

    pub(crate) fn keepalive(&self) -> &ServerKeepalive {
        &self.keepalive
    }

    pub(crate) fn policy(&self) -> &KeepalivePolicy {
        &self.policy
    }

    pub(crate) fn use_huffman_coding(&self) -> bool {
        self.use_huffman
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            init_stream_window_size: DEFAULT_WINDOW_SIZE,
            init_conn_window_size: DEFAULT_WINDOW_SIZE,
            window_size_set: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_streams: DEFAULT_MAX_STREAMS,
            keepalive: ServerKeepalive::default(),
            policy: KeepalivePolicy::default(),
            use_huffman: true,
        }
    }
}

/// Server keepalive parameters: connection idle and age limits plus the
/// server-initiated PING interval and timeout.
#[derive(Clone)]
pub struct ServerKeepalive {
    max_connection_idle: Option<Duration>,
    max_connection_age: Option<Duration>,
    max_connection_age_grace: Option<Duration>,
    time: Duration,
    timeout: Duration,
}

impl ServerKeepalive {
    /// `ServerKeepalive` constructor with infinite idle and age limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends GOAWAY after the connection has had no active streams for
    /// this duration.
    pub fn set_max_connection_idle(&mut self, idle: Duration) {
        self.max_connection_idle = Some(idle);
    }

    /// Sends GOAWAY after the connection has existed for this duration.
    pub fn set_max_connection_age(&mut self, age: Duration) {
        self.max_connection_age = Some(age);
    }

    /// Hard-closes the connection this long after the age GOAWAY.
    pub fn set_max_connection_age_grace(&mut self, grace: Duration) {
        self.max_connection_age_grace = Some(grace);
    }

    /// Sets the server-initiated PING interval.
    pub fn set_time(&mut self, time: Duration) {
        self.time = time;
    }

    /// Sets the PING acknowledgement timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn max_connection_idle(&self) -> Option<Duration> {
        self.max_connection_idle
    }

    pub(crate) fn max_connection_age(&self) -> Option<Duration> {
        self.max_connection_age
    }

    pub(crate) fn max_connection_age_grace(&self) -> Option<Duration> {
        self.max_connection_age_grace
    }

    pub(crate) fn time(&self) -> Duration {
        self.time
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ServerKeepalive {
    fn default() -> Self {
        Self {
            max_connection_idle: None,
            max_connection_age: None,
            max_connection_age_grace: None,
            time: DEFAULT_SERVER_KEEPALIVE_TIME,
            timeout: DEFAULT_SERVER_KEEPALIVE_TIMEOUT,
        }
    }
}

/// Server-side enforcement policy for client pings.
///
/// A client pinging more often than `min_time` (while streams are
/// active, or always when `permit_without_stream` is set) accumulates
/// strikes; too many strikes close the connection with
/// GOAWAY(ENHANCE_YOUR_CALM).
#[derive(Clone)]
pub struct KeepalivePolicy {
    min_time: Duration,
    permit_without_stream: bool,
}

impl KeepalivePolicy {
    /// `KeepalivePolicy` constructor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum allowed interval between client pings.
    pub fn set_min_time(&mut self, min_time: Duration) {
        self.min_time = min_time;
    }

    /// Permits pings while no stream is active.
    pub fn set_permit_without_stream(&mut self, permit: bool) {
        self.permit_without_stream = permit;
    }

    pub(crate) fn min_time(&self) -> Duration {
        self.min_time
    }

    pub(crate) fn is_permit_without_stream(&self) -> bool {
        self.permit_without_stream
    }
}

impl Default for KeepalivePolicy {
    fn default() -> Self {
        Self {
            min_time: DEFAULT_ENFORCEMENT_MIN_TIME,
            permit_without_stream: false,
        }
    }
}

#[cfg(test)]
mod ut_config {
    use super::*;

    /// UT test cases for `ClientConfig` defaults and setters.
    ///
    /// # Brief
    /// 1. Checks the protocol defaults of a fresh config.
    /// 2. Sets a window size and checks that adaptive sizing is marked
    ///    disabled.
    #[test]
    fn ut_client_config() {
        let config = ClientConfig::new();
        assert_eq!(config.stream_window_size(), DEFAULT_WINDOW_SIZE);
        assert_eq!(config.conn_window_size(), DEFAULT_WINDOW_SIZE);
        assert!(!config.window_size_set());
        assert!(config.keepalive().is_none());

        let mut config = ClientConfig::new();
        config.set_stream_window_size(1 << 20);
        assert!(config.window_size_set());
        assert_eq!(config.stream_window_size(), 1 << 20);
    }

    /// UT test cases for `ServerKeepalive` and `KeepalivePolicy`
    /// defaults.
    ///
    /// # Brief
    /// 1. Checks that idle and age limits default to infinite.
    /// 2. Checks the default ping interval, timeout and policy minimum.
    #[test]
    fn ut_server_keepalive_defaults() {
        let keepalive = ServerKeepalive::new();
        assert!(keepalive.max_connection_idle().is_none());
        assert!(keepalive.max_connection_age().is_none());
        assert_eq!(keepalive.time(), Duration::from_secs(7200));
        assert_eq!(keepalive.timeout(), Duration::from_secs(20));

        let policy = KeepalivePolicy::new();
        assert_eq!(policy.min_time(), Duration::from_secs(300));
        assert!(!policy.is_permit_without_stream());
    }
}
