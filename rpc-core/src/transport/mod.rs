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

//! The transport-neutral surface a concrete transport binding (spec §4.7-4.9) implements.
//!
//! A [`TransportSpec`](crate::config::TransportSpec) builds one [`Inbound`], one
//! [`UnaryOutbound`] and one [`StreamOutbound`] per direction it serves. The only binding
//! shipped in this crate is [`grpc`].

pub mod grpc;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Error;
use crate::lifecycle::Lifecycle;
use crate::request::{Request, Response, StreamRequest};
use crate::router::Router;
use crate::stream::ClientStream;

/// Accepts calls from the wire and dispatches them through a [`Router`] (spec §4.2, §4.8).
/// `set_router` must be called before `start`; starting without one is an internal error.
#[async_trait]
pub trait Inbound: Lifecycle {
    fn set_router(&self, router: Arc<Router>);
}

/// Issues unary calls to a remote peer chosen by a [`crate::chooser::Chooser`] (spec §4.7).
#[async_trait]
pub trait UnaryOutbound: Lifecycle {
    async fn call(&self, deadline: Option<Instant>, request: Request) -> Result<Response, Error>;
}

/// Opens bidirectional streams to a remote peer chosen by a [`crate::chooser::Chooser`]
/// (spec §4.9).
#[async_trait]
pub trait StreamOutbound: Lifecycle {
    async fn call_stream(&self, deadline: Option<Instant>, request: StreamRequest) -> Result<Box<dyn ClientStream>, Error>;
}
