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

//! Frame recv task.
//!
//! `RecvData` owns the read half of the socket: it feeds raw bytes into
//! the streaming [`FrameDecoder`] and forwards every completed frame to
//! the manager. It also timestamps read activity for the keepalive
//! timers and applies acknowledged local settings to the decoder.

use std::sync::{Arc, Mutex};

use ylong_grpc::h2::{Frame, FrameDecoder, FrameKind, Payload, Setting};

use crate::error::DispatchErrorKind;
use crate::keepalive::TransportState;
use crate::runtime::{AsyncRead, AsyncReadExt, ReadHalf, UnboundedSender};
use crate::util::h2::manager::{OutputMessage, SettingsState, SettingsSync};

pub(crate) struct RecvData<S> {
    decoder: FrameDecoder,
    settings: Arc<Mutex<SettingsSync>>,
    reader: ReadHalf<S>,
    resp_tx: UnboundedSender<OutputMessage>,
    state: Arc<TransportState>,
    read_buffer_size: usize,
}

impl<S: AsyncRead + Unpin + Sync + Send + 'static> RecvData<S> {
    pub(crate) fn new(
        decoder: FrameDecoder,
        settings: Arc<Mutex<SettingsSync>>,
        reader: ReadHalf<S>,
        resp_tx: UnboundedSender<OutputMessage>,
        state: Arc<TransportState>,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            decoder,
            settings,
            reader,
            resp_tx,
            state,
            read_buffer_size,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), DispatchErrorKind> {
        let mut buf = vec![0u8; self.read_buffer_size.max(1)];
        loop {
            let read = self
                .reader
                .read(&mut buf)
                .await
                .map_err(|e| DispatchErrorKind::Io(e.kind()))?;
            if read == 0 {
                let _ = self
                    .resp_tx
                    .send(OutputMessage::OutputExit(DispatchErrorKind::Disconnect));
                return Err(DispatchErrorKind::Disconnect);
            }
            self.state.mark_read();

            match self.decoder.decode(&buf[..read]) {
                Ok(frames) => {
                    for kind in frames {
                        if let FrameKind::Complete(frame) = kind {
                            self.update_settings(&frame);
                            if self.resp_tx.send(OutputMessage::Output(frame)).is_err() {
                                return Err(DispatchErrorKind::ChannelClosed);
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = self
                        .resp_tx
                        .send(OutputMessage::OutputExit(DispatchErrorKind::H2(e)));
                    return Err(DispatchErrorKind::H2(e));
                }
            }
        }
    }

    // The peer acknowledged our SETTINGS: the values we advertised now
    // bind the peer, so the decoder adopts our own limits.
    fn update_settings(&mut self, frame: &Frame) {
        if let Payload::Settings(_) = frame.payload() {
            if frame.flags().is_ack() {
                let mut sync = self.settings.lock().unwrap();
                if let SettingsState::Acknowledging(ref settings) = sync.settings {
                    for setting in settings.get_settings() {
                        if let Setting::MaxHeaderListSize(size) = setting {
                            self.decoder.set_max_header_list_size(*size as usize);
                        }
                        if let Setting::MaxFrameSize(size) = setting {
                            let _ = self.decoder.set_max_frame_size(*size);
                        }
                        if let Setting::HeaderTableSize(size) = setting {
                            self.decoder.set_max_header_table_size(*size as usize);
                        }
                    }
                }
                sync.settings = SettingsState::Synced;
            }
        }
    }
}
