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

//! `grpc-timeout` header value codec.
//!
//! The value is a positive decimal of at most eight digits followed by a
//! unit: `n` (nanoseconds), `u` (microseconds), `m` (milliseconds), `S`
//! (seconds), `M` (minutes) or `H` (hours). Encoding promotes to coarser
//! units until the value fits in eight digits, rounding up so a deadline
//! is never shortened.

use std::time::Duration;

const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

/// Encodes a `Duration` as a `grpc-timeout` header value.
pub fn encode_timeout(timeout: Duration) -> String {
    let nanos = timeout.as_nanos();
    let units: [(char, u128); 6] = [
        ('n', 1),
        ('u', 1_000),
        ('m', 1_000_000),
        ('S', 1_000_000_000),
        ('M', 60 * 1_000_000_000),
        ('H', 3600 * 1_000_000_000),
    ];
    for (unit, scale) in units {
        let value = (nanos + scale - 1) / scale;
        if value <= MAX_TIMEOUT_VALUE {
            return format!("{}{}", value, unit);
        }
    }
    // Even hours overflow eight digits; clamp to the maximum.
    format!("{}H", MAX_TIMEOUT_VALUE)
}

/// Decodes a `grpc-timeout` header value. Returns `None` for a malformed
/// value.
pub fn decode_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "n" => Duration::from_nanos(amount),
        "u" => Duration::from_micros(amount),
        "m" => Duration::from_millis(amount),
        "S" => Duration::from_secs(amount),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        _ => return None,
    };
    Some(duration)
}
