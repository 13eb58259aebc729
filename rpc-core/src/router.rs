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

//! The in-process handler registry and its lookup discipline (spec §4.2).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Error;
use crate::request::{Request, RequestMeta, Response};
use crate::stream::ServerStream;

#[async_trait]
pub trait UnaryHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Response, Error>;
}

#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: Box<dyn ServerStream>) -> Result<(), Error>;
}

/// Fire-and-forget: the handler has no response body and the dispatcher does not wait for it
/// to complete before the transport acknowledges the call (spec §3, §4.2).
#[async_trait]
pub trait OnewayHandler: Send + Sync {
    async fn handle(&self, request: Request);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Unary,
    Streaming,
    Oneway,
}

#[derive(Clone)]
pub enum HandlerSpec {
    Unary(Arc<dyn UnaryHandler>),
    Streaming(Arc<dyn StreamHandler>),
    Oneway(Arc<dyn OnewayHandler>),
}

impl HandlerSpec {
    pub fn handler_type(&self) -> HandlerType {
        match self {
            HandlerSpec::Unary(_) => HandlerType::Unary,
            HandlerSpec::Streaming(_) => HandlerType::Streaming,
            HandlerSpec::Oneway(_) => HandlerType::Oneway,
        }
    }
}

/// One routable `(Service, Procedure, Encoding?)` registration (spec §3 Router Entry).
#[derive(Clone)]
pub struct Entry {
    pub service: String,
    pub procedure: String,
    pub encoding: Option<String>,
    pub handler_type: HandlerType,
}

type EncodingTable = HashMap<Option<String>, HandlerSpec>;

#[derive(Default)]
struct Inner {
    table: HashMap<(String, String), EncodingTable>,
}

/// `Procedures() -> []Entry`, `Choose(request) -> HandlerSpec | error` (spec §4.2).
///
/// Lookup is exact on `(Service, Procedure)`. `Encoding` only participates when more than one
/// handler is registered for that pair; with a single handler, any request encoding matches it.
#[derive(Default)]
pub struct Router {
    inner: Mutex<Inner>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, service: &str, procedure: &str, encoding: Option<String>, spec: HandlerSpec) {
        let mut inner = self.inner.lock().expect("router lock poisoned");
        inner
            .table
            .entry((service.to_owned(), procedure.to_owned()))
            .or_default()
            .insert(encoding, spec);
    }

    pub fn register_unary(
        &self,
        service: impl Into<String>,
        procedure: impl Into<String>,
        encoding: Option<String>,
        handler: Arc<dyn UnaryHandler>,
    ) {
        self.register(&service.into(), &procedure.into(), encoding, HandlerSpec::Unary(handler));
    }

    pub fn register_streaming(
        &self,
        service: impl Into<String>,
        procedure: impl Into<String>,
        encoding: Option<String>,
        handler: Arc<dyn StreamHandler>,
    ) {
        self.register(&service.into(), &procedure.into(), encoding, HandlerSpec::Streaming(handler));
    }

    pub fn register_oneway(
        &self,
        service: impl Into<String>,
        procedure: impl Into<String>,
        encoding: Option<String>,
        handler: Arc<dyn OnewayHandler>,
    ) {
        self.register(&service.into(), &procedure.into(), encoding, HandlerSpec::Oneway(handler));
    }

    pub fn procedures(&self) -> Vec<Entry> {
        let inner = self.inner.lock().expect("router lock poisoned");
        inner
            .table
            .iter()
            .flat_map(|((service, procedure), encodings)| {
                encodings.iter().map(move |(encoding, spec)| Entry {
                    service: service.clone(),
                    procedure: procedure.clone(),
                    encoding: encoding.clone(),
                    handler_type: spec.handler_type(),
                })
            })
            .collect()
    }

    /// Resolves `meta` to a registered [`HandlerSpec`]. Missing route fails `Unimplemented`
    /// (spec §4.2).
    pub fn choose(&self, meta: &RequestMeta) -> Result<HandlerSpec, Error> {
        let inner = self.inner.lock().expect("router lock poisoned");
        let key = (meta.service.clone(), meta.procedure.clone());
        let encodings = inner.table.get(&key).ok_or_else(|| {
            Error::unimplemented(format!("no procedure registered for {}::{}", meta.service, meta.procedure))
        })?;

        if encodings.len() == 1 {
            return Ok(encodings.values().next().expect("checked len == 1").clone());
        }

        encodings.get(&Some(meta.encoding.clone())).cloned().ok_or_else(|| {
            Error::unimplemented(format!(
                "no handler registered for {}::{} with encoding {}",
                meta.service, meta.procedure, meta.encoding
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Response;

    struct EchoHandler;

    #[async_trait]
    impl UnaryHandler for EchoHandler {
        async fn handle(&self, request: Request) -> Result<Response, Error> {
            Ok(Response::new(request.body))
        }
    }

    #[tokio::test]
    async fn choose_resolves_exact_service_and_procedure() {
        let router = Router::new();
        router.register_unary("KeyValue", "GetValue", None, Arc::new(EchoHandler));

        let meta = RequestMeta {
            service: "KeyValue".into(),
            procedure: "GetValue".into(),
            encoding: "raw".into(),
            ..Default::default()
        };
        let spec = router.choose(&meta).unwrap();
        assert_eq!(spec.handler_type(), HandlerType::Unary);
    }

    #[test]
    fn choose_fails_unimplemented_for_missing_route() {
        let router = Router::new();
        let meta = RequestMeta {
            service: "KeyValue".into(),
            procedure: "GetValue".into(),
            ..Default::default()
        };
        let err = router.choose(&meta).unwrap_err();
        assert_eq!(err.code, crate::error::Code::Unimplemented);
    }

    #[tokio::test]
    async fn choose_dispatches_on_encoding_only_when_ambiguous() {
        let router = Router::new();
        router.register_unary("KeyValue", "GetValue", Some("proto".into()), Arc::new(EchoHandler));
        router.register_unary("KeyValue", "GetValue", Some("json".into()), Arc::new(EchoHandler));

        let meta = RequestMeta {
            service: "KeyValue".into(),
            procedure: "GetValue".into(),
            encoding: "proto".into(),
            ..Default::default()
        };
        assert!(router.choose(&meta).is_ok());

        let meta = RequestMeta {
            service: "KeyValue".into(),
            procedure: "GetValue".into(),
            encoding: "raw".into(),
            ..Default::default()
        };
        assert!(router.choose(&meta).is_err());
    }

    #[test]
    fn procedures_lists_every_registration() {
        let router = Router::new();
        router.register_unary("KeyValue", "GetValue", None, Arc::new(EchoHandler));
        let entries = router.procedures();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].service, "KeyValue");
        assert_eq!(entries[0].procedure, "GetValue");
    }
}
