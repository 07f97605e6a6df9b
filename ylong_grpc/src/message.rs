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

//! gRPC length-prefixed message framing inside DATA frames.
//!
//! Each message is a 5-byte prefix (one compressed flag octet and a
//! 4-byte big-endian length) followed by the payload. The transport
//! itself treats DATA as an opaque byte stream; this codec is the piece
//! the layer above uses to delimit messages on it.

const MESSAGE_HEADER_LENGTH: usize = 5;

/// Appends one length-prefixed message to `dst`.
pub fn encode_message(payload: &[u8], compressed: bool, dst: &mut Vec<u8>) {
    dst.push(compressed as u8);
    dst.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    dst.extend_from_slice(payload);
}

/// One message recovered from the stream: the compressed flag and the
/// payload bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct Message {
    /// The compressed flag octet of the prefix.
    pub compressed: bool,
    /// The message payload.
    pub payload: Vec<u8>,
}

/// Reassembles length-prefixed messages from arbitrarily chunked DATA
/// bytes.
#[derive(Default)]
pub struct MessageReader {
    buffer: Vec<u8>,
}

impl MessageReader {
    /// Creates an empty `MessageReader`.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feeds the bytes of one DATA chunk.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pops the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Option<Message> {
        if self.buffer.len() < MESSAGE_HEADER_LENGTH {
            return None;
        }
        let length = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;
        if self.buffer.len() < MESSAGE_HEADER_LENGTH + length {
            return None;
        }
        let compressed = self.buffer[0] != 0;
        let rest = self.buffer.split_off(MESSAGE_HEADER_LENGTH + length);
        let payload = self.buffer[MESSAGE_HEADER_LENGTH..].to_vec();
        self.buffer = rest;
        Some(Message {
            compressed,
            payload,
        })
    }

    /// Returns `true` if no partial message is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod ut_message {
    use super::*;

    /// UT test cases for `encode_message` and `MessageReader`.
    ///
    /// # Brief
    /// 1. Encodes two messages back to back.
    /// 2. Feeds them into a reader in odd-sized chunks.
    /// 3. Checks both messages are recovered in order.
    #[test]
    fn ut_message_round_trip() {
        let mut wire = Vec::new();
        encode_message(b"ping", false, &mut wire);
        encode_message(b"pong!", true, &mut wire);
        assert_eq!(&wire[..5], &[0, 0, 0, 0, 4]);

        let mut reader = MessageReader::new();
        reader.push(&wire[..3]);
        assert_eq!(reader.next_message(), None);
        reader.push(&wire[3..11]);
        assert_eq!(
            reader.next_message(),
            Some(Message {
                compressed: false,
                payload: b"ping".to_vec(),
            })
        );
        reader.push(&wire[11..]);
        assert_eq!(
            reader.next_message(),
            Some(Message {
                compressed: true,
                payload: b"pong!".to_vec(),
            })
        );
        assert_eq!(reader.next_message(), None);
        assert!(reader.is_empty());
    }

    /// UT test cases for the empty message.
    ///
    /// # Brief
    /// 1. Encodes an empty payload.
    /// 2. Checks the prefix-only wire form and its recovery.
    #[test]
    fn ut_message_empty() {
        let mut wire = Vec::new();
        encode_message(b"", false, &mut wire);
        assert_eq!(wire, [0, 0, 0, 0, 0]);

        let mut reader = MessageReader::new();
        reader.push(&wire);
        let message = reader.next_message().unwrap();
        assert!(message.payload.is_empty());
        assert!(!message.compressed);
    }
}
