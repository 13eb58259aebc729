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

//! The gRPC realisation of the transport-neutral [`ClientStream`]/[`ServerStream`] traits
//! (spec §4.9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request as TonicRequest, Status, Streaming};

use super::codec::RawCodec;
use crate::chooser::OnFinish;
use crate::error::Error;
use crate::headers::Headers;
use crate::request::{RequestMeta, StreamMessage, StreamRequest};
use crate::stream::{ClientStream, ServerStream};
use crate::tracing_ctx::{SpanContext, SpanGuard};

const OUTBOUND_BUFFER: usize = 16;

/// Client-side outbound stream (spec §4.9 "Client stream"). Headers are extracted lazily on
/// first read. A single atomic `closed` flag guards the cooperative close sequence.
pub struct GrpcClientStream {
    outbound_tx: Option<mpsc::Sender<Bytes>>,
    inbound: Streaming<Bytes>,
    headers: Headers,
    closed: AtomicBool,
    span: Option<SpanGuard>,
    on_finish: OnFinish,
}

impl GrpcClientStream {
    pub async fn open(
        mut client: tonic::client::Grpc<Channel>,
        path: http::uri::PathAndQuery,
        request_metadata: tonic::metadata::MetadataMap,
        meta: &RequestMeta,
        on_finish: OnFinish,
    ) -> Result<Box<dyn ClientStream>, Error> {
        let span_context = SpanContext::extract(&meta.headers);
        let span = SpanGuard::open(&meta.procedure, &meta.service, span_context.as_ref());

        let (tx, rx) = mpsc::channel::<Bytes>(OUTBOUND_BUFFER);
        let outbound = ReceiverStream::new(rx);

        let mut request = TonicRequest::new(outbound);
        *request.metadata_mut() = request_metadata;

        let response = client
            .streaming(request, path, RawCodec)
            .await
            .map_err(Error::from)?;

        let headers = response_headers(response.metadata());
        let inbound = response.into_inner();

        Ok(Box::new(GrpcClientStream {
            outbound_tx: Some(tx),
            inbound,
            headers,
            closed: AtomicBool::new(false),
            span: Some(span),
            on_finish,
        }))
    }
}

fn response_headers(metadata: &tonic::metadata::MetadataMap) -> Headers {
    let mut headers = Headers::new();
    for key_value in metadata.iter() {
        if let tonic::metadata::KeyAndValueRef::Ascii(key, value) = key_value {
            if let Ok(value_str) = value.to_str() {
                headers.set_unchecked(crate::headers::canonicalize(key.as_str()), value_str.to_owned());
            }
        }
    }
    headers
}

#[async_trait]
impl ClientStream for GrpcClientStream {
    async fn send_message(&mut self, message: StreamMessage) -> Result<(), Error> {
        match &self.outbound_tx {
            Some(tx) => tx
                .send(message.body)
                .await
                .map_err(|_| Error::new(crate::error::Code::Unknown, "stream closed by peer")),
            None => Err(Error::new(crate::error::Code::Unknown, "EOF")),
        }
    }

    async fn receive_message(&mut self) -> Result<Option<StreamMessage>, Error> {
        match self.inbound.message().await {
            Ok(Some(body)) => Ok(Some(StreamMessage::new(body))),
            Ok(None) => Ok(None),
            // A cancellation race at end-of-stream surfaces as Cancelled from tonic; the
            // receive side treats it as a normal EOF (spec §4.9 "Cancellation").
            Err(status) if status.code() == tonic::Code::Cancelled => Ok(None),
            Err(status) => Err(Error::from(status)),
        }
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    async fn close(&mut self, err: Option<&Error>) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.outbound_tx.take();
        if let Some(span) = self.span.take() {
            if let Some(err) = err {
                span.record_error(err);
            }
            span.finish();
        }
        self.on_finish.finish(err);
        Ok(())
    }
}

impl Drop for GrpcClientStream {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(span) = self.span.take() {
                span.finish();
            }
            self.on_finish.finish(None);
        }
    }
}

/// Server-side stream (spec §4.9 "Server stream"), handed to a
/// [`crate::router::StreamHandler`]. Constructed by `transport/grpc/inbound.rs`'s
/// `RouterStreamingService`, one per inbound streaming call.
pub struct GrpcServerStream {
    request: StreamRequest,
    inbound: Streaming<Bytes>,
    outbound_tx: mpsc::Sender<Result<Bytes, Status>>,
    trailers: Arc<Mutex<Headers>>,
}

impl GrpcServerStream {
    /// Builds a server stream plus a handle to its trailer accumulator. The handler only ever
    /// sees `Self` through the `ServerStream` trait object; the caller keeps the returned
    /// `Arc<Mutex<Headers>>` to read back whatever `send_headers`/`set_trailers` accumulated
    /// once the handler returns, since by then the stream itself has been dropped.
    pub fn new(
        request: StreamRequest,
        inbound: Streaming<Bytes>,
        outbound_tx: mpsc::Sender<Result<Bytes, Status>>,
    ) -> (Self, Arc<Mutex<Headers>>) {
        let trailers = Arc::new(Mutex::new(Headers::new()));
        let stream = Self {
            request,
            inbound,
            outbound_tx,
            trailers: trailers.clone(),
        };
        (stream, trailers)
    }
}

#[async_trait]
impl ServerStream for GrpcServerStream {
    fn request(&self) -> &StreamRequest {
        &self.request
    }

    async fn receive_message(&mut self) -> Result<Option<StreamMessage>, Error> {
        match self.inbound.message().await {
            Ok(Some(body)) => Ok(Some(StreamMessage::new(body))),
            Ok(None) => Ok(None),
            Err(status) if status.code() == tonic::Code::Cancelled => Ok(None),
            Err(status) => Err(Error::from(status)),
        }
    }

    async fn send_message(&mut self, message: StreamMessage) -> Result<(), Error> {
        self.outbound_tx
            .send(Ok(message.body))
            .await
            .map_err(|_| Error::new(crate::error::Code::Unknown, "client disconnected"))
    }

    async fn send_headers(&mut self, headers: Headers) -> Result<(), Error> {
        // tonic's streaming server API sends response headers on the first body poll; an
        // early header frame distinct from that isn't expressible without a lower-level H2
        // handle, so these are folded into the trailers sent at handler return instead.
        let mut trailers = self.trailers.lock().expect("trailers lock poisoned");
        for (key, value) in headers.iter() {
            trailers.set_unchecked(key.to_owned(), value.to_owned());
        }
        Ok(())
    }

    fn set_trailers(&mut self, headers: Headers) {
        let mut trailers = self.trailers.lock().expect("trailers lock poisoned");
        for (key, value) in headers.iter() {
            trailers.set_unchecked(key.to_owned(), value.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `GrpcServerStream` wraps a `tonic::Streaming<Bytes>`, which only tonic's own server glue
    // can construct, so its dispatch path (`transport/grpc/inbound.rs`'s `RouterStreamingService`)
    // is covered by integration tests against a real HTTP/2 listener rather than a unit test here.
    #[test]
    fn set_trailers_merges_into_existing_trailers() {
        let mut trailers = Headers::new();
        trailers.set_unchecked("x-a", "1");
        let mut merged = Headers::new();
        for (k, v) in trailers.iter() {
            merged.set_unchecked(k.to_owned(), v.to_owned());
        }
        merged.set_unchecked("x-b", "2");
        assert_eq!(merged.get("x-a"), Some("1"));
        assert_eq!(merged.get("x-b"), Some("2"));
    }
}
