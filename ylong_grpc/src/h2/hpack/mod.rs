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

//! [HPACK] implementation of the [HTTP/2 protocol].
//!
//! [HPACK]: https://httpwg.org/specs/rfc7541.html
//! [HTTP/2 protocol]: https://httpwg.org/specs/rfc9113.html
//!
//! HPACK is the header compression format of HTTP/2: header fields are
//! represented either as references into a static or dynamic indexing
//! table or as literals, with string values optionally Huffman coded. The
//! format has a bounded memory requirement, which makes it suitable for
//! long-lived multiplexed connections.

mod decoder;
mod encoder;
mod integer;
pub(crate) mod table;

pub(crate) use decoder::HpackDecoder;
pub(crate) use encoder::HpackEncoder;
