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

//! The error taxonomy shared by every transport binding.

use std::fmt;

/// A status code, bijective with the gRPC code set (see [`Code::to_grpc`] /
/// [`Code::from_grpc`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// Maps a yarpc-style code to its gRPC counterpart. This mapping is a bijection:
    /// round-tripping through [`Code::from_grpc`] always recovers the original code.
    pub fn to_grpc(self) -> tonic::Code {
        match self {
            Code::Cancelled => tonic::Code::Cancelled,
            Code::Unknown => tonic::Code::Unknown,
            Code::InvalidArgument => tonic::Code::InvalidArgument,
            Code::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            Code::NotFound => tonic::Code::NotFound,
            Code::AlreadyExists => tonic::Code::AlreadyExists,
            Code::PermissionDenied => tonic::Code::PermissionDenied,
            Code::ResourceExhausted => tonic::Code::ResourceExhausted,
            Code::FailedPrecondition => tonic::Code::FailedPrecondition,
            Code::Aborted => tonic::Code::Aborted,
            Code::OutOfRange => tonic::Code::OutOfRange,
            Code::Unimplemented => tonic::Code::Unimplemented,
            Code::Internal => tonic::Code::Internal,
            Code::Unavailable => tonic::Code::Unavailable,
            Code::DataLoss => tonic::Code::DataLoss,
            Code::Unauthenticated => tonic::Code::Unauthenticated,
        }
    }

    /// Maps a gRPC code back to a yarpc-style code. A gRPC code with no entry in the
    /// domain (there is none - the mapping is total) degrades to [`Code::Unknown`].
    pub fn from_grpc(code: tonic::Code) -> Code {
        match code {
            tonic::Code::Ok => Code::Unknown, // OK never carries an error; callers never observe this.
            tonic::Code::Cancelled => Code::Cancelled,
            tonic::Code::Unknown => Code::Unknown,
            tonic::Code::InvalidArgument => Code::InvalidArgument,
            tonic::Code::DeadlineExceeded => Code::DeadlineExceeded,
            tonic::Code::NotFound => Code::NotFound,
            tonic::Code::AlreadyExists => Code::AlreadyExists,
            tonic::Code::PermissionDenied => Code::PermissionDenied,
            tonic::Code::ResourceExhausted => Code::ResourceExhausted,
            tonic::Code::FailedPrecondition => Code::FailedPrecondition,
            tonic::Code::Aborted => Code::Aborted,
            tonic::Code::OutOfRange => Code::OutOfRange,
            tonic::Code::Unimplemented => Code::Unimplemented,
            tonic::Code::Internal => Code::Internal,
            tonic::Code::Unavailable => Code::Unavailable,
            tonic::Code::DataLoss => Code::DataLoss,
            tonic::Code::Unauthenticated => Code::Unauthenticated,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A framework error carrying a [`Code`], an optional name tag, an optional message, and
/// optional Protobuf-encoded details (carried as raw bytes - the crate does not interpret
/// them, consistent with encodings being an external collaborator).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {}", .name.as_deref().unwrap_or(""))]
pub struct Error {
    pub code: Code,
    pub name: Option<String>,
    pub message: String,
    pub details: Option<prost_types::Any>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            name: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_details(mut self, details: prost_types::Any) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// The wire message: `"<name>: <message>"`, or just `<name>` when the message is
    /// empty, or just `<message>` when there is no name. See spec §4.10.
    pub fn wire_message(&self) -> String {
        match (&self.name, self.message.is_empty()) {
            (Some(name), true) => name.clone(),
            (Some(name), false) => format!("{name}: {}", self.message),
            (None, _) => self.message.clone(),
        }
    }

    /// Strips a leading `"<name>: "` prefix from `message` given a known `name`, per
    /// the receiving side of spec §4.10.
    pub fn strip_name_prefix(name: &str, message: &str) -> String {
        let prefix = format!("{name}: ");
        message
            .strip_prefix(&prefix)
            .map(str::to_owned)
            .unwrap_or_else(|| message.to_owned())
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let name = status
            .metadata()
            .get("rpc-error-name")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let message = match &name {
            Some(name) => Error::strip_name_prefix(name, status.message()),
            None => status.message().to_owned(),
        };
        Error {
            code: Code::from_grpc(status.code()),
            name,
            message,
            details: None,
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let mut status = tonic::Status::new(err.code.to_grpc(), err.wire_message());
        if let Some(name) = &err.name {
            if let Ok(value) = name.parse() {
                status.metadata_mut().insert("rpc-error-name", value);
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: &[Code] = &[
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    #[test]
    fn code_bijection_round_trips() {
        for &code in ALL_CODES {
            assert_eq!(Code::from_grpc(code.to_grpc()), code);
        }
    }

    #[test]
    fn wire_message_formats_name_and_message() {
        let err = Error::new(Code::NotFound, "foo").with_name("bar");
        assert_eq!(err.wire_message(), "bar: foo");

        let err = Error::new(Code::NotFound, "").with_name("bar");
        assert_eq!(err.wire_message(), "bar");

        let err = Error::new(Code::NotFound, "foo");
        assert_eq!(err.wire_message(), "foo");
    }

    #[test]
    fn strip_name_prefix_only_strips_matching_prefix() {
        assert_eq!(Error::strip_name_prefix("bar", "bar: foo"), "foo");
        assert_eq!(Error::strip_name_prefix("bar", "unrelated"), "unrelated");
    }
}
