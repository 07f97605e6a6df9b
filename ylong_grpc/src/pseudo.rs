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

//! Pseudo-header fields of HTTP/2.
//!
//! Pseudo-header fields carry the message control data of a request or a
//! response. They start with a colon and always precede regular fields in
//! a header block.

/// The pseudo-header fields defined for requests and responses.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct PseudoHeaders {
    authority: Option<String>,
    method: Option<String>,
    path: Option<String>,
    scheme: Option<String>,
    status: Option<String>,
}

impl PseudoHeaders {
    /// Creates an empty `PseudoHeaders`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no pseudo-header is set.
    pub fn is_empty(&self) -> bool {
        self.authority.is_none()
            && self.method.is_none()
            && self.path.is_none()
            && self.scheme.is_none()
            && self.status.is_none()
    }

    /// Gets the `:authority` value.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Sets the `:authority` value.
    pub fn set_authority(&mut self, authority: Option<String>) {
        self.authority = authority;
    }

    /// Gets the `:method` value.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Sets the `:method` value.
    pub fn set_method(&mut self, method: Option<String>) {
        self.method = method;
    }

    /// Gets the `:path` value.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Sets the `:path` value.
    pub fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }

    /// Gets the `:scheme` value.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Sets the `:scheme` value.
    pub fn set_scheme(&mut self, scheme: Option<String>) {
        self.scheme = scheme;
    }

    /// Gets the `:status` value.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Sets the `:status` value.
    pub fn set_status(&mut self, status: Option<String>) {
        self.status = status;
    }
}
