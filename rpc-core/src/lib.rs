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

//! Transport-neutral RPC dispatch plane and its gRPC transport binding.
//!
//! A single process can expose and consume remote procedure calls - unary and
//! bidirectional streaming - over multiple concrete transports under a uniform
//! request object and routing discipline. This crate carries the dispatch
//! plane plus the gRPC binding; concrete application encodings, the config
//! loader and telemetry exporters are external collaborators.

pub mod backoff;
pub mod chooser;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod headers;
pub mod lifecycle;
pub mod peer;
pub mod request;
pub mod router;
pub mod stream;
pub mod tracing_ctx;
pub mod transport;

pub use error::{Code, Error, Result};
pub use headers::Headers;
pub use request::{
    ApplicationErrorMeta,
    Request,
    RequestMeta,
    Response,
    StreamMessage,
    StreamRequest,
};
