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

//! Keepalive timers of the transport.
//!
//! Each transport runs one keepalive task next to its reader, writer and
//! manager. The client variant sends periodic PINGs and closes the
//! connection when an acknowledgement misses its timeout. The server
//! variant additionally watches connection idle time and connection age,
//! draining and finally closing the connection when the limits expire.
//! All coordination happens through [`TransportState`], a small set of
//! shared atomics, plus the manager's event channel.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ClientKeepalive, ServerKeepalive};
use crate::error::DispatchErrorKind;
use crate::runtime::{sleep, UnboundedSender};
use crate::util::h2::{StreamEvent, KEEPALIVE_PING};

/// Shared observable state of one transport.
pub(crate) struct TransportState {
    epoch: Instant,
    shutdown: AtomicBool,
    goaway: AtomicBool,
    active_streams: AtomicUsize,
    // Milliseconds since `epoch` of the latest socket read.
    last_read: AtomicU64,
    // Milliseconds since `epoch` at which the transport became idle.
    idle_since: AtomicU64,
    ping_acked: AtomicBool,
}

impl TransportState {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            shutdown: AtomicBool::new(false),
            goaway: AtomicBool::new(false),
            active_streams: AtomicUsize::new(0),
            last_read: AtomicU64::new(0),
            idle_since: AtomicU64::new(0),
            ping_acked: AtomicBool::new(false),
        }
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn set_goaway(&self) {
        self.goaway.store(true, Ordering::Release);
    }

    pub(crate) fn is_goaway(&self) -> bool {
        self.goaway.load(Ordering::Acquire)
    }

    pub(crate) fn mark_read(&self) {
        self.last_read.store(self.now_millis(), Ordering::Release);
    }

    pub(crate) fn set_active_streams(&self, num: usize) {
        let was = self.active_streams.swap(num, Ordering::AcqRel);
        if was > 0 && num == 0 {
            self.idle_since.store(self.now_millis(), Ordering::Release);
        }
    }

    pub(crate) fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::Acquire)
    }

    /// How long the transport has been without active streams.
    pub(crate) fn idle_duration(&self) -> Duration {
        if self.active_streams() > 0 {
            return Duration::ZERO;
        }
        let since = self.idle_since.load(Ordering::Acquire);
        Duration::from_millis(self.now_millis().saturating_sub(since))
    }

    pub(crate) fn clear_ping_acked(&self) {
        self.ping_acked.store(false, Ordering::Release);
    }

    pub(crate) fn set_ping_acked(&self) {
        self.ping_acked.store(true, Ordering::Release);
    }

    pub(crate) fn is_ping_acked(&self) -> bool {
        self.ping_acked.load(Ordering::Acquire)
    }
}

/// The client keepalive pinger.
pub(crate) async fn client_keepalive(
    params: ClientKeepalive,
    state: Arc<TransportState>,
    events: UnboundedSender<StreamEvent>,
) {
    loop {
        sleep(params.time()).await;
        if state.is_shutdown() {
            return;
        }
        if !params.is_permit_without_stream() && state.active_streams() == 0 {
            continue;
        }
        if !ping_round(params.timeout(), &state, &events).await {
            return;
        }
    }
}

/// The server keepalive task: idle limit, age limit with grace, and the
/// server-initiated pinger.
pub(crate) async fn server_keepalive(
    params: ServerKeepalive,
    state: Arc<TransportState>,
    events: UnboundedSender<StreamEvent>,
) {
    const TICK: Duration = Duration::from_millis(100);

    let started = Instant::now();
    let mut next_ping = Instant::now() + params.time();
    let mut age_goaway_at: Option<Instant> = None;

    loop {
        sleep(TICK).await;
        let now = Instant::now();
        if state.is_shutdown() {
            return;
        }

        if let Some(idle) = params.max_connection_idle() {
            if state.active_streams() == 0 && state.idle_duration() >= idle && !state.is_goaway() {
                let _ = events.send(StreamEvent::IdleTimeout);
            }
        }

        if let Some(age) = params.max_connection_age() {
            if age_goaway_at.is_none() && now.duration_since(started) >= age {
                age_goaway_at = Some(now);
                let _ = events.send(StreamEvent::GracefulClose);
            }
            if let (Some(sent), Some(grace)) = (age_goaway_at, params.max_connection_age_grace()) {
                if now.duration_since(sent) >= grace {
                    let _ = events.send(StreamEvent::CloseConn {
                        kind: DispatchErrorKind::Disconnect,
                    });
                    return;
                }
            }
        }

        if now >= next_ping {
            if !ping_round(params.timeout(), &state, &events).await {
                return;
            }
            next_ping = Instant::now() + params.time();
        }
    }
}

// Sends one keepalive PING and waits out the acknowledgement timeout.
// Returns false when the transport should be considered dead.
async fn ping_round(
    timeout: Duration,
    state: &Arc<TransportState>,
    events: &UnboundedSender<StreamEvent>,
) -> bool {
    state.clear_ping_acked();
    if events
        .send(StreamEvent::Ping {
            data: KEEPALIVE_PING,
        })
        .is_err()
    {
        return false;
    }
    sleep(timeout).await;
    if state.is_shutdown() {
        return false;
    }
    if !state.is_ping_acked() {
        let _ = events.send(StreamEvent::CloseConn {
            kind: DispatchErrorKind::KeepaliveTimeout,
        });
        return false;
    }
    true
}

#[cfg(test)]
mod ut_transport_state {
    use super::*;

    /// UT test cases for `TransportState` flags.
    ///
    /// # Brief
    /// 1. Toggles the shutdown, goaway and ping-ack flags.
    /// 2. Checks every accessor.
    #[test]
    fn ut_state_flags() {
        let state = TransportState::new();
        assert!(!state.is_shutdown());
        assert!(!state.is_goaway());
        assert!(!state.is_ping_acked());

        state.shutdown();
        state.set_goaway();
        state.set_ping_acked();
        assert!(state.is_shutdown());
        assert!(state.is_goaway());
        assert!(state.is_ping_acked());

        state.clear_ping_acked();
        assert!(!state.is_ping_acked());
    }

    /// UT test cases for idle tracking.
    ///
    /// # Brief
    /// 1. Marks the transport active, then idle.
    /// 2. Checks the idle duration is zero while active and grows once
    ///    idle.
    #[test]
    fn ut_state_idle_tracking() {
        let state = TransportState::new();
        state.set_active_streams(2);
        assert_eq!(state.idle_duration(), Duration::ZERO);

        state.set_active_streams(0);
        std::thread::sleep(Duration::from_millis(20));
        assert!(state.idle_duration() >= Duration::from_millis(10));
    }
}
