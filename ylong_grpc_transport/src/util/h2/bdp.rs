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

//! Bandwidth-delay-product sampling for adaptive receive windows.
//!
//! A measurement PING is sent when a sample period starts; every DATA
//! byte received until its ACK counts into the sample. If a sample shows
//! the peer can fill most of the current window within one round trip,
//! the window target doubles, capped at 16 MiB. The round-trip time is
//! smoothed with an exponentially weighted moving average.

use std::time::{Duration, Instant};

/// Ceiling for the adaptive window.
pub(crate) const BDP_LIMIT: u32 = 16 * 1024 * 1024;

// A sample at or above this share of the current window triggers growth.
const GROW_NUMERATOR: u64 = 3;
const GROW_DENOMINATOR: u64 = 4;

pub(crate) struct BdpEstimator {
    // Current window target; starts at the initial window size.
    limit: u32,
    sample: u32,
    ping_outstanding: bool,
    sent_at: Option<Instant>,
    rtt: Option<Duration>,
}

impl BdpEstimator {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            limit,
            sample: 0,
            ping_outstanding: false,
            sent_at: None,
            rtt: None,
        }
    }

    /// Returns `true` if a measurement PING should be sent now. The
    /// caller sends it and then calls `ping_sent`.
    pub(crate) fn need_ping(&self) -> bool {
        !self.ping_outstanding
    }

    /// Starts a sample period.
    pub(crate) fn ping_sent(&mut self, now: Instant) {
        self.ping_outstanding = true;
        self.sample = 0;
        self.sent_at = Some(now);
    }

    /// Adds received payload bytes to the running sample.
    pub(crate) fn add_sample(&mut self, size: u32) {
        if self.ping_outstanding {
            self.sample = self.sample.saturating_add(size);
        }
    }

    /// Finishes the sample period on PING ACK. Returns the new window
    /// target when the sample justifies growth.
    pub(crate) fn calculate(&mut self, now: Instant) -> Option<u32> {
        if !self.ping_outstanding {
            return None;
        }
        self.ping_outstanding = false;
        let sent_at = self.sent_at.take()?;
        let rtt = now.saturating_duration_since(sent_at);
        self.rtt = Some(match self.rtt {
            // EWMA with 7/8 history weight.
            Some(prev) => (prev * 7 + rtt) / 8,
            None => rtt,
        });

        if self.limit >= BDP_LIMIT {
            return None;
        }
        if self.sample as u64 * GROW_DENOMINATOR >= self.limit as u64 * GROW_NUMERATOR {
            let next = (self.sample.max(self.limit)).saturating_mul(2).min(BDP_LIMIT);
            if next > self.limit {
                self.limit = next;
                return Some(next);
            }
        }
        None
    }

    pub(crate) fn limit(&self) -> u32 {
        self.limit
    }

    pub(crate) fn rtt(&self) -> Option<Duration> {
        self.rtt
    }
}
