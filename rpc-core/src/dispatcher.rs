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

//! The top-level `Dispatcher` (spec §6): owns one [`Router`], a set of named inbounds, and a
//! set of named outbound clients, and sequences their lifecycle as one unit.

use std::collections::HashMap;
use std::sync::Arc;

use tari_shutdown::ShutdownSignal;

use crate::error::Error;
use crate::lifecycle::{Lifecycle, Once};
use crate::router::Router;
use crate::transport::{Inbound, StreamOutbound, UnaryOutbound};

/// One named outbound client: a unary and/or streaming call surface to a particular
/// downstream service (spec §6).
#[derive(Default)]
pub struct ClientConfig {
    pub unary: Option<Box<dyn UnaryOutbound>>,
    pub stream: Option<Box<dyn StreamOutbound>>,
}

/// Owns the process-wide [`Router`] plus every configured inbound/outbound, and sequences
/// their `Start`/`Stop` as one unit (spec §5, §6): inbounds start last (after outbounds, so a
/// peer never observes traffic before its own dependencies are ready) and stop first, in the
/// manner of `tari_comms`'s `CommsBuilder`/`ConnectivityManager` start ordering.
pub struct Dispatcher {
    router: Arc<Router>,
    inbounds: Vec<(String, Arc<dyn Inbound>)>,
    clients: HashMap<String, ClientConfig>,
    lifecycle: Once,
}

impl Dispatcher {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            inbounds: Vec::new(),
            clients: HashMap::new(),
            lifecycle: Once::new(),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn add_inbound(&mut self, name: impl Into<String>, inbound: Arc<dyn Inbound>) {
        inbound.set_router(self.router.clone());
        self.inbounds.push((name.into(), inbound));
    }

    pub fn add_client(&mut self, name: impl Into<String>, client: ClientConfig) {
        self.clients.insert(name.into(), client);
    }

    pub fn client(&self, name: &str) -> Option<&ClientConfig> {
        self.clients.get(name)
    }

    /// Starts every outbound client, then every inbound (spec §5, §6). A failure midway
    /// leaves earlier-started components running; the caller should call [`Dispatcher::stop`]
    /// to unwind them rather than dropping the dispatcher.
    pub async fn start(&self) -> Result<(), Error> {
        self.lifecycle
            .start(|| async {
                for client in self.clients.values() {
                    if let Some(unary) = &client.unary {
                        unary.start().await?;
                    }
                    if let Some(stream) = &client.stream {
                        stream.start().await?;
                    }
                }
                for (_, inbound) in &self.inbounds {
                    inbound.start().await?;
                }
                Ok(())
            })
            .await
    }

    /// Stops every inbound, then every outbound client, the reverse of `start` (spec §5).
    pub async fn stop(&self) -> Result<(), Error> {
        self.lifecycle
            .stop(|| async {
                for (_, inbound) in self.inbounds.iter().rev() {
                    inbound.stop().await?;
                }
                for client in self.clients.values() {
                    if let Some(stream) = &client.stream {
                        stream.stop().await?;
                    }
                    if let Some(unary) = &client.unary {
                        unary.stop().await?;
                    }
                }
                Ok(())
            })
            .await
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Runs until `shutdown` fires, then stops every component (spec §6's intended host-process
    /// usage - an application calls this from its main task after `start`).
    pub async fn run_until_shutdown(&self, mut shutdown: ShutdownSignal) -> Result<(), Error> {
        shutdown.wait().await;
        tracing::info!("dispatcher shutting down: shutdown signal received");
        self.stop().await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::router::Router;

    struct RecordingInbound {
        router: std::sync::Mutex<Option<Arc<Router>>>,
        started: std::sync::atomic::AtomicBool,
    }

    impl RecordingInbound {
        fn new() -> Self {
            Self {
                router: std::sync::Mutex::new(None),
                started: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Lifecycle for RecordingInbound {
        async fn start(&self) -> Result<(), Error> {
            self.started.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), Error> {
            self.started.store(false, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.started.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl Inbound for RecordingInbound {
        fn set_router(&self, router: Arc<Router>) {
            *self.router.lock().unwrap() = Some(router);
        }
    }

    #[tokio::test]
    async fn start_sets_router_and_runs_every_inbound() {
        let mut dispatcher = Dispatcher::new(Arc::new(Router::new()));
        let inbound = Arc::new(RecordingInbound::new());
        dispatcher.add_inbound("grpc", inbound.clone());

        dispatcher.start().await.unwrap();
        assert!(inbound.is_running());
        assert!(inbound.router.lock().unwrap().is_some());
        assert!(dispatcher.is_running());

        dispatcher.stop().await.unwrap();
        assert!(!inbound.is_running());
    }
}
