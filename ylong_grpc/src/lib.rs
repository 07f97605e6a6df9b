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

//! `ylong_grpc` provides the wire-level components an RPC-over-HTTP/2
//! transport needs: the HTTP/2 binary framing layer with HPACK field
//! compression, RPC status codes with their wire mappings, gRPC
//! length-prefixed message framing and the `grpc-timeout` value codec.
//! The companion crate `ylong_grpc_transport` builds the client and
//! server transport engines on top of these components.

pub mod h2;
pub mod headers;
pub mod message;
pub mod pseudo;
pub mod status;
pub mod timeout;

pub(crate) mod huffman;
