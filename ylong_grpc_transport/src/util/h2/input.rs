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

//! Frame send task.
//!
//! `SendData` is the single writer of the connection: it drains the
//! frame channel fed by the manager, serializes every frame through the
//! [`FrameEncoder`] and writes the octets to the socket. The socket
//! write buffer is flushed whenever the channel runs empty, so a burst
//! of small frames coalesces into few writes while an idle queue never
//! withholds bytes.

use std::sync::{Arc, Mutex};

use ylong_grpc::h2::{Frame, FrameEncoder, Payload, Setting};

use crate::error::DispatchErrorKind;
use crate::runtime::{AsyncWrite, AsyncWriteExt, BufWriter, TryRecvError, UnboundedReceiver, WriteHalf};
use crate::util::h2::manager::{SettingsState, SettingsSync};

const ENCODE_CHUNK_SIZE: usize = 4096;

pub(crate) struct SendData<S> {
    encoder: FrameEncoder,
    // Synchronizes locally sent SETTINGS with the reader and manager.
    settings: Arc<Mutex<SettingsSync>>,
    writer: BufWriter<WriteHalf<S>>,
    frame_rx: UnboundedReceiver<Frame>,
}

impl<S: AsyncWrite + Unpin + Sync + Send + 'static> SendData<S> {
    pub(crate) fn new(
        encoder: FrameEncoder,
        settings: Arc<Mutex<SettingsSync>>,
        writer: BufWriter<WriteHalf<S>>,
        frame_rx: UnboundedReceiver<Frame>,
    ) -> Self {
        Self {
            encoder,
            settings,
            writer,
            frame_rx,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), DispatchErrorKind> {
        let mut chunk = [0u8; ENCODE_CHUNK_SIZE];
        loop {
            let frame = match self.frame_rx.try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => {
                    // The queue drained; push buffered bytes to the peer
                    // before parking.
                    self.writer
                        .flush()
                        .await
                        .map_err(|e| DispatchErrorKind::Io(e.kind()))?;
                    match self.frame_rx.recv().await {
                        Some(frame) => frame,
                        None => return Err(DispatchErrorKind::ChannelClosed),
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(DispatchErrorKind::ChannelClosed);
                }
            };

            let frame = self.update_settings(frame);
            self.encoder.set_frame(frame).map_err(DispatchErrorKind::H2)?;
            loop {
                let size = self.encoder.encode(&mut chunk);
                if size == 0 {
                    break;
                }
                self.writer
                    .write_all(&chunk[..size])
                    .await
                    .map_err(|e| DispatchErrorKind::Io(e.kind()))?;
            }
        }
    }

    // A local SETTINGS frame starts an acknowledgement round. A SETTINGS
    // ACK built by the manager carries a copy of the peer's settings so
    // the encoder can adopt them; the copy is replaced by a plain ACK on
    // the wire.
    fn update_settings(&mut self, frame: Frame) -> Frame {
        let settings = match frame.payload() {
            Payload::Settings(settings) => settings,
            _ => return frame,
        };
        if frame.flags().is_ack() {
            for setting in settings.get_settings() {
                if let Setting::HeaderTableSize(size) = setting {
                    self.encoder.update_header_table_size(*size as usize);
                }
                if let Setting::MaxFrameSize(size) = setting {
                    self.encoder.update_max_frame_size(*size as usize);
                }
            }
            ylong_grpc::h2::Settings::ack()
        } else {
            let mut sync = self.settings.lock().unwrap();
            sync.settings = SettingsState::Acknowledging(settings.clone());
            frame
        }
    }
}
