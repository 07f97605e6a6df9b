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

//! RPC status codes and the `Status` value delivered in trailers.
//!
//! A `Status` is the end-to-end result of one RPC: a numeric code plus an
//! optional message. On the wire it travels as the `grpc-status` and
//! `grpc-message` trailer fields; the message is percent-encoded so that
//! arbitrary text survives the header value character set.

use core::fmt;
use std::convert::TryFrom;

use crate::h2::ErrorCode;

/// Canonical RPC status codes.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Code {
    /// Not an error; returned on success.
    Ok = 0,
    /// The operation was cancelled, typically by the caller.
    Canceled = 1,
    /// Unknown error, for example a status from an unknown error space.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// The entity that a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission to execute the operation.
    PermissionDenied = 7,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented or not supported.
    Unimplemented = 12,
    /// Some invariant expected by the underlying system has been broken.
    Internal = 13,
    /// The service is currently unavailable; retrying may succeed.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request does not have valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Gets the numeric value of the code.
    pub fn into_code(self) -> u32 {
        self as u32
    }

    /// Maps an HTTP response status to an RPC code, used when a proxy
    /// answers before any `grpc-status` is available.
    pub fn from_http_status(status: u16) -> Code {
        match status {
            200 => Code::Ok,
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 | 502 | 503 | 504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }

    /// Maps an HTTP/2 error code (from RST_STREAM or GOAWAY) to an RPC
    /// code.
    pub fn from_h2_error(code: ErrorCode) -> Code {
        match code {
            ErrorCode::NoError => Code::Ok,
            ErrorCode::ProtocolError
            | ErrorCode::InternalError
            | ErrorCode::FlowControlError
            | ErrorCode::SettingsTimeout
            | ErrorCode::FrameSizeError
            | ErrorCode::CompressionError
            | ErrorCode::ConnectError
            | ErrorCode::StreamClosed
            | ErrorCode::Http1_1Required => Code::Internal,
            ErrorCode::RefusedStream => Code::Unavailable,
            ErrorCode::Cancel => Code::Canceled,
            ErrorCode::EnhanceYourCalm => Code::ResourceExhausted,
            ErrorCode::InadequateSecurity => Code::PermissionDenied,
        }
    }
}

impl TryFrom<u32> for Code {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Code::Ok,
            1 => Code::Canceled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return Err(()),
        };
        Ok(code)
    }
}

/// The end-to-end result of one RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    /// Creates a `Status` with the given code and message.
    pub fn new(code: Code, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    /// Creates an OK `Status`.
    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    /// Gets the code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Gets the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if the code is `Ok`.
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Builds a `Status` from decoded `grpc-status` and `grpc-message`
    /// trailer values. An unparsable code maps to `Unknown`.
    pub fn from_trailers(status: &str, message: Option<&str>) -> Self {
        let code = status
            .parse::<u32>()
            .ok()
            .and_then(|raw| Code::try_from(raw).ok())
            .unwrap_or(Code::Unknown);
        Self {
            code,
            message: message.map(percent_decode).unwrap_or_default(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "rpc status: {:?}", self.code)
        } else {
            write!(f, "rpc status: {:?}: {}", self.code, self.message)
        }
    }
}

/// Percent-encodes a `grpc-message` value. Printable ASCII except `%`
/// passes through; everything else becomes `%XX`.
pub fn percent_encode(message: &str) -> String {
    let mut encoded = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..0x7f).contains(&byte) && byte != b'%' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Decodes a percent-encoded `grpc-message` value. Malformed escapes are
/// passed through undecoded.
pub fn percent_decode(message: &str) -> String {
    let bytes = message.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (hex_value(bytes.get(i + 1)), hex_value(bytes.get(i + 2)))
            {
                decoded.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: Option<&u8>) -> Option<u8> {
    match byte {
        Some(b @ b'0'..=b'9') => Some(b - b'0'),
        Some(b @ b'a'..=b'f') => Some(b - b'a' + 10),
        Some(b @ b'A'..=b'F') => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod ut_status {
    use super::*;

    /// UT test cases for `Code::from_http_status`.
    ///
    /// # Brief
    /// 1. Maps every row of the HTTP status table.
    /// 2. Checks an unmapped status falls back to `Unknown`.
    #[test]
    fn ut_code_from_http_status() {
        assert_eq!(Code::from_http_status(200), Code::Ok);
        assert_eq!(Code::from_http_status(400), Code::Internal);
        assert_eq!(Code::from_http_status(401), Code::Unauthenticated);
        assert_eq!(Code::from_http_status(403), Code::PermissionDenied);
        assert_eq!(Code::from_http_status(404), Code::Unimplemented);
        assert_eq!(Code::from_http_status(429), Code::Unavailable);
        assert_eq!(Code::from_http_status(502), Code::Unavailable);
        assert_eq!(Code::from_http_status(503), Code::Unavailable);
        assert_eq!(Code::from_http_status(504), Code::Unavailable);
        assert_eq!(Code::from_http_status(418), Code::Unknown);
    }

    /// UT test cases for `Code::from_h2_error`.
    ///
    /// # Brief
    /// 1. Maps every HTTP/2 error code.
    /// 2. Checks the table of spec mappings.
    #[test]
    fn ut_code_from_h2_error() {
        assert_eq!(Code::from_h2_error(ErrorCode::NoError), Code::Ok);
        assert_eq!(Code::from_h2_error(ErrorCode::ProtocolError), Code::Internal);
        assert_eq!(Code::from_h2_error(ErrorCode::InternalError), Code::Internal);
        assert_eq!(
            Code::from_h2_error(ErrorCode::FlowControlError),
            Code::Internal
        );
        assert_eq!(
            Code::from_h2_error(ErrorCode::RefusedStream),
            Code::Unavailable
        );
        assert_eq!(Code::from_h2_error(ErrorCode::Cancel), Code::Canceled);
        assert_eq!(
            Code::from_h2_error(ErrorCode::EnhanceYourCalm),
            Code::ResourceExhausted
        );
        assert_eq!(
            Code::from_h2_error(ErrorCode::InadequateSecurity),
            Code::PermissionDenied
        );
        assert_eq!(
            Code::from_h2_error(ErrorCode::Http1_1Required),
            Code::Internal
        );
    }

    /// UT test cases for percent encoding and decoding.
    ///
    /// # Brief
    /// 1. Encodes a message with spaces, `%` and non-ASCII bytes.
    /// 2. Decodes it back and checks the round trip.
    /// 3. Decodes malformed escapes and checks they pass through.
    #[test]
    fn ut_percent_coding() {
        assert_eq!(percent_encode("ok message"), "ok message");
        assert_eq!(percent_encode("50% done\n"), "50%25 done%0A");
        assert_eq!(percent_encode("héllo"), "h%C3%A9llo");

        assert_eq!(percent_decode("50%25 done%0A"), "50% done\n");
        assert_eq!(percent_decode("h%C3%A9llo"), "héllo");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    /// UT test cases for `Status::from_trailers`.
    ///
    /// # Brief
    /// 1. Parses well-formed, message-carrying and malformed trailers.
    /// 2. Checks codes and decoded messages.
    #[test]
    fn ut_status_from_trailers() {
        let status = Status::from_trailers("0", None);
        assert!(status.is_ok());
        assert_eq!(status.message(), "");

        let status = Status::from_trailers("14", Some("try%20again"));
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "try again");

        let status = Status::from_trailers("not-a-code", None);
        assert_eq!(status.code(), Code::Unknown);

        let status = Status::from_trailers("99", None);
        assert_eq!(status.code(), Code::Unknown);
    }
}
