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

use crate::h2::hpack::table::Header;
use crate::headers::Headers;
use crate::pseudo::PseudoHeaders;

/// HTTP/2 HEADERS frame payload implementation: the pseudo-header fields
/// plus the regular field section.
#[derive(PartialEq, Eq, Clone, Default, Debug)]
pub struct Parts {
    pub(crate) pseudo: PseudoHeaders,
    pub(crate) map: Headers,
}

impl Parts {
    /// The constructor of `Parts`.
    pub fn new() -> Self {
        Self {
            pseudo: PseudoHeaders::new(),
            map: Headers::new(),
        }
    }

    /// Sets pseudo-headers for `Parts`.
    pub fn set_pseudo(&mut self, pseudo: PseudoHeaders) {
        self.pseudo = pseudo;
    }

    /// Sets regular field lines for `Parts`.
    pub fn set_header_lines(&mut self, headers: Headers) {
        self.map = headers;
    }

    /// Returns `true` if neither pseudo-headers nor field lines are set.
    pub fn is_empty(&self) -> bool {
        self.pseudo.is_empty() && self.map.is_empty()
    }

    pub(crate) fn update(&mut self, header: Header, value: String) {
        match header {
            Header::Authority => self.pseudo.set_authority(Some(value)),
            Header::Method => self.pseudo.set_method(Some(value)),
            Header::Path => self.pseudo.set_path(Some(value)),
            Header::Scheme => self.pseudo.set_scheme(Some(value)),
            Header::Status => self.pseudo.set_status(Some(value)),
            Header::Other(name) => self.map.append_raw(name, value),
        }
    }

    /// Returns pseudo-headers and regular field lines as a tuple of
    /// references.
    pub fn parts(&self) -> (&PseudoHeaders, &Headers) {
        (&self.pseudo, &self.map)
    }

    /// Consumes the `Parts` and returns the pseudo-headers and the field
    /// lines.
    pub fn into_parts(self) -> (PseudoHeaders, Headers) {
        (self.pseudo, self.map)
    }
}
