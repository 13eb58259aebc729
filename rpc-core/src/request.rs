// Copyright 2024. The Tari Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! The neutral request/response data model (spec §3).

use bytes::Bytes;

use crate::error::Code;
use crate::headers::Headers;

/// Fields shared between a full [`Request`] and a [`StreamRequest`]'s metadata.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub caller: String,
    pub service: String,
    pub shard_key: Option<String>,
    pub routing_key: Option<String>,
    pub routing_delegate: Option<String>,
    pub encoding: String,
    pub procedure: String,
    pub caller_procedure: Option<String>,
    pub headers: Headers,
}

impl RequestMeta {
    /// Validates the fields every inbound request must carry (spec §4.8): non-empty
    /// caller, service, procedure, encoding.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.caller.is_empty() {
            return Err(crate::error::Error::invalid_argument("missing rpc-caller"));
        }
        if self.service.is_empty() {
            return Err(crate::error::Error::invalid_argument("missing rpc-service"));
        }
        if self.procedure.is_empty() {
            return Err(crate::error::Error::invalid_argument("missing procedure"));
        }
        if self.encoding.is_empty() {
            return Err(crate::error::Error::invalid_argument("missing rpc-encoding"));
        }
        Ok(())
    }

    /// Splits `Procedure` into `(service, method)`. Unqualified procedures (no `::`)
    /// belong to the `__default__` service, per spec §4.7 step 2.
    pub fn split_procedure(&self) -> (String, String) {
        split_procedure(&self.procedure)
    }
}

/// Splits a `<service>::<method>` procedure name; unqualified names default to
/// `__default__` (spec §4.7 step 2, §6).
pub fn split_procedure(procedure: &str) -> (String, String) {
    match procedure.split_once("::") {
        Some((service, method)) => (service.to_owned(), method.to_owned()),
        None => ("__default__".to_owned(), procedure.to_owned()),
    }
}

/// An immutable (once dispatched) unary request (spec §3).
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub meta: RequestMeta,
    pub body: Bytes,
}

impl std::ops::Deref for Request {
    type Target = RequestMeta;

    fn deref(&self) -> &Self::Target {
        &self.meta
    }
}

impl std::ops::DerefMut for Request {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.meta
    }
}

/// Structured detail accompanying an application-level error (spec §3).
#[derive(Debug, Clone, Default)]
pub struct ApplicationErrorMeta {
    pub name: String,
    pub details: String,
    pub code: Option<Code>,
}

/// A unary response: body, headers, and the application-error marker (spec §3).
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub body: Bytes,
    pub headers: Headers,
    pub application_error: bool,
    pub application_error_meta: Option<ApplicationErrorMeta>,
}

impl Response {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: Headers::new(),
            application_error: false,
            application_error_meta: None,
        }
    }

    /// Marks this response as an application-level failure (spec §3, §4.8): transport-level
    /// success, but the handler reports a business failure via `rpc-application-error`.
    pub fn set_application_error(&mut self, name: impl Into<String>, details: impl Into<String>) {
        self.application_error = true;
        self.application_error_meta = Some(ApplicationErrorMeta {
            name: name.into(),
            details: details.into(),
            code: None,
        });
    }
}

/// One message of a stream body (spec §3).
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub body: Bytes,
    pub body_size: usize,
}

impl StreamMessage {
    pub fn new(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let body_size = body.len();
        Self { body, body_size }
    }
}

/// A streaming call's metadata, without a single eagerly-available body (spec §3): the
/// per-message sequence is driven lazily by the stream bridge (see [`crate::transport::grpc::stream`]).
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub meta: RequestMeta,
}

impl std::ops::Deref for StreamRequest {
    type Target = RequestMeta;

    fn deref(&self) -> &Self::Target {
        &self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_procedure_defaults_unqualified_to_default_service() {
        assert_eq!(
            split_procedure("KeyValue::GetValue"),
            ("KeyValue".to_owned(), "GetValue".to_owned())
        );
        assert_eq!(split_procedure("GetValue"), ("__default__".to_owned(), "GetValue".to_owned()));
    }

    #[test]
    fn meta_validate_rejects_missing_fields() {
        let meta = RequestMeta::default();
        assert!(meta.validate().is_err());

        let meta = RequestMeta {
            caller: "c".into(),
            service: "s".into(),
            procedure: "p".into(),
            encoding: "proto".into(),
            ..Default::default()
        };
        assert!(meta.validate().is_ok());
    }
}
