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

//! The gRPC outbound: unary (spec §4.7) and stream (spec §4.9 client side).

use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Request as TonicRequest;

use super::codec::RawCodec;
use super::metadata;
use super::options::Compression;
use super::stream::GrpcClientStream;
use crate::chooser::Chooser;
use crate::error::Error;
use crate::lifecycle::Lifecycle;
use crate::request::{Request, Response, StreamRequest};
use crate::stream::ClientStream;
use crate::transport::{StreamOutbound, UnaryOutbound};

fn channel_for(peer: &crate::peer::Peer) -> Result<Channel, Error> {
    peer.payload::<Channel>()
        .cloned()
        .ok_or_else(|| Error::internal(format!("peer {} has no gRPC channel payload", peer.identifier())))
}

fn path_and_query(procedure: &str) -> Result<http::uri::PathAndQuery, Error> {
    metadata::procedure_to_path(procedure)
        .parse()
        .map_err(|e| Error::internal(format!("invalid procedure path: {e}")))
}

/// Issues outbound unary calls (spec §4.7). Preconditions (non-nil body, non-empty
/// `Procedure`, valid header bytes, no reserved application header) are enforced by
/// [`metadata::build_outbound_metadata`] before anything goes on the wire.
pub struct GrpcUnaryOutbound {
    chooser: Arc<dyn Chooser>,
    max_message_size: Option<usize>,
    compression: Option<Compression>,
}

impl GrpcUnaryOutbound {
    pub fn new(chooser: Arc<dyn Chooser>) -> Self {
        Self::with_max_message_size(chooser, None)
    }

    pub fn with_max_message_size(chooser: Arc<dyn Chooser>, max_message_size: Option<usize>) -> Self {
        Self::with_options(chooser, max_message_size, None)
    }

    pub fn with_options(chooser: Arc<dyn Chooser>, max_message_size: Option<usize>, compression: Option<Compression>) -> Self {
        Self { chooser, max_message_size, compression }
    }
}

#[async_trait]
impl Lifecycle for GrpcUnaryOutbound {
    async fn start(&self) -> Result<(), Error> {
        self.chooser.start().await
    }

    async fn stop(&self) -> Result<(), Error> {
        self.chooser.stop().await
    }

    fn is_running(&self) -> bool {
        true
    }
}

#[async_trait]
impl UnaryOutbound for GrpcUnaryOutbound {
    async fn call(&self, deadline: Option<tokio::time::Instant>, request: Request) -> Result<Response, Error> {
        let request_metadata = metadata::build_outbound_metadata(&request.meta)?;
        if request.meta.procedure.is_empty() {
            return Err(Error::invalid_argument("procedure must not be empty"));
        }

        let (peer, on_finish) = self.chooser.choose(deadline, &request).await?;
        let result = self.call_on_peer(&peer, request_metadata, &request, deadline).await;
        on_finish.finish(result.as_ref().err());
        result
    }
}

impl GrpcUnaryOutbound {
    async fn call_on_peer(
        &self,
        peer: &crate::peer::Peer,
        request_metadata: tonic::metadata::MetadataMap,
        request: &Request,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<Response, Error> {
        let channel = channel_for(peer)?;
        let path = path_and_query(&request.meta.procedure)?;

        let mut client = tonic::client::Grpc::new(channel);
        if let Some(limit) = self.max_message_size {
            client = client.max_decoding_message_size(limit).max_encoding_message_size(limit);
        }
        if let Some(compression) = self.compression {
            let encoding = compression.to_tonic();
            client = client.send_compressed(encoding).accept_compressed(encoding);
        }
        client
            .ready()
            .await
            .map_err(|e| Error::unavailable(format!("gRPC channel not ready: {e}")))?;

        let mut tonic_request = TonicRequest::new(request.body.clone());
        *tonic_request.metadata_mut() = request_metadata;
        if let Some(deadline) = deadline {
            if let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) {
                tonic_request.set_timeout(remaining);
            }
        }

        let response = client
            .unary(tonic_request, path, RawCodec)
            .await
            .map_err(Error::from)?;

        let (response_metadata, body) = (response.metadata().clone(), response.into_inner());
        let (headers, application_error, application_error_meta) =
            metadata::decode_response_metadata(&request.meta.service, &response_metadata)?;

        Ok(Response {
            body,
            headers,
            application_error,
            application_error_meta,
        })
    }
}

/// Issues outbound streaming calls (spec §4.9 client side).
pub struct GrpcStreamOutbound {
    chooser: Arc<dyn Chooser>,
    max_message_size: Option<usize>,
    compression: Option<Compression>,
}

impl GrpcStreamOutbound {
    pub fn new(chooser: Arc<dyn Chooser>) -> Self {
        Self::with_max_message_size(chooser, None)
    }

    pub fn with_max_message_size(chooser: Arc<dyn Chooser>, max_message_size: Option<usize>) -> Self {
        Self::with_options(chooser, max_message_size, None)
    }

    pub fn with_options(chooser: Arc<dyn Chooser>, max_message_size: Option<usize>, compression: Option<Compression>) -> Self {
        Self { chooser, max_message_size, compression }
    }
}

#[async_trait]
impl Lifecycle for GrpcStreamOutbound {
    async fn start(&self) -> Result<(), Error> {
        self.chooser.start().await
    }

    async fn stop(&self) -> Result<(), Error> {
        self.chooser.stop().await
    }

    fn is_running(&self) -> bool {
        true
    }
}

#[async_trait]
impl StreamOutbound for GrpcStreamOutbound {
    async fn call_stream(
        &self,
        deadline: Option<tokio::time::Instant>,
        request: StreamRequest,
    ) -> Result<Box<dyn ClientStream>, Error> {
        let as_request = Request {
            meta: request.meta.clone(),
            body: bytes::Bytes::new(),
        };
        let request_metadata = metadata::build_outbound_metadata(&request.meta)?;
        let (peer, on_finish) = self.chooser.choose(deadline, &as_request).await?;
        let channel = channel_for(&peer)?;
        let path = path_and_query(&request.meta.procedure)?;

        let mut client = tonic::client::Grpc::new(channel);
        if let Some(limit) = self.max_message_size {
            client = client.max_decoding_message_size(limit).max_encoding_message_size(limit);
        }
        if let Some(compression) = self.compression {
            let encoding = compression.to_tonic();
            client = client.send_compressed(encoding).accept_compressed(encoding);
        }
        client
            .ready()
            .await
            .map_err(|e| Error::unavailable(format!("gRPC channel not ready: {e}")))?;

        GrpcClientStream::open(client, path, request_metadata, &request.meta, on_finish).await
    }
}
