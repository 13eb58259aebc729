// Copyright 2024. The Tari Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the following
// disclaimer in the documentation and/or other materials provided with the distribution.
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

//! The transport-neutral bidirectional stream abstraction (spec §4.9).
//!
//! A streaming call is an ordered sequence of opaque messages over a connection a concrete
//! transport binding owns. [`transport::grpc::stream`](crate::transport::grpc::stream) is the
//! gRPC realisation of these traits; the router and dispatcher only ever see the traits here.

use async_trait::async_trait;

use crate::error::Error;
use crate::headers::Headers;
use crate::request::{StreamMessage, StreamRequest};

/// The server side of a stream, handed to a [`crate::router::StreamHandler`] (spec §4.9).
///
/// `receive_message` returns `Ok(None)` on client half-close ("EOF means the client half-closed").
/// The server closes its own half simply by returning from the handler; there is no explicit
/// `Close` on this side.
#[async_trait]
pub trait ServerStream: Send {
    fn request(&self) -> &StreamRequest;

    async fn receive_message(&mut self) -> Result<Option<StreamMessage>, Error>;

    async fn send_message(&mut self, message: StreamMessage) -> Result<(), Error>;

    /// Sends an early header frame before the first message, if the handler wants headers
    /// visible before any body arrives.
    async fn send_headers(&mut self, headers: Headers) -> Result<(), Error>;

    /// Sets trailer metadata applied when the handler returns (spec §4.9 "trailer propagation").
    fn set_trailers(&mut self, headers: Headers);
}

/// The client side of an outbound stream (spec §4.9).
///
/// `close` is idempotent: "a single atomic `closed` flag guards against double-close". A
/// `send_message` after close returns EOF; a `receive_message` after close propagates the
/// underlying terminal error.
#[async_trait]
pub trait ClientStream: Send {
    async fn send_message(&mut self, message: StreamMessage) -> Result<(), Error>;

    async fn receive_message(&mut self) -> Result<Option<StreamMessage>, Error>;

    /// Headers are extracted lazily on first read; empty until then.
    fn headers(&self) -> &Headers;

    /// Closes the client's send half (`CloseSend`). Calling this more than once is a no-op;
    /// only the first call runs the close sequence (update span, finish span, invoke onFinish).
    async fn close(&mut self, err: Option<&Error>) -> Result<(), Error>;
}
