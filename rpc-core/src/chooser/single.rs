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

//! The `Single` reference chooser: pins exactly one peer (spec §4.6).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Chooser, OnFinish};
use crate::error::Error;
use crate::peer::transport::{Dialer, PeerTransport};
use crate::peer::{ConnectionStatus, Peer, Subscriber, SubscriberId};
use crate::request::Request;

struct Registered {
    peer: Arc<Peer>,
    subscriber_id: SubscriberId,
}

pub struct SingleChooser {
    transport: Arc<PeerTransport>,
    dialer: Arc<dyn Dialer>,
    address: String,
    registered: Mutex<Option<Registered>>,
    notify: Arc<Notify>,
    stopped: std::sync::atomic::AtomicBool,
}

impl SingleChooser {
    pub fn new(transport: Arc<PeerTransport>, dialer: Arc<dyn Dialer>, address: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            dialer,
            address: address.into(),
            registered: Mutex::new(None),
            notify: Arc::new(Notify::new()),
            stopped: std::sync::atomic::AtomicBool::new(false),
        })
    }
}

struct WakeOnStatusChange(Arc<Notify>);

impl Subscriber for WakeOnStatusChange {
    fn on_status_changed(&self, _peer_id: &str, _status: ConnectionStatus) {
        self.0.notify_waiters();
    }
}

#[async_trait]
impl Chooser for SingleChooser {
    async fn start(&self) -> Result<(), Error> {
        let subscriber: Arc<dyn Subscriber> = Arc::new(WakeOnStatusChange(self.notify.clone()));
        let (subscriber_id, peer) = self.transport.retain_peer(&self.address, &*self.dialer, subscriber).await?;
        *self.registered.lock().expect("lock poisoned") = Some(Registered { peer, subscriber_id });
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
        if let Some(registered) = self.registered.lock().expect("lock poisoned").take() {
            self.transport.release_peer(&self.address, registered.subscriber_id).await?;
        }
        Ok(())
    }

    async fn update(&self, _additions: Vec<String>, _removals: Vec<String>) -> Result<(), Error> {
        // A Single chooser pins one address for its whole lifetime; updates are a no-op.
        Ok(())
    }

    async fn choose(&self, deadline: Option<Instant>, _request: &Request) -> Result<(Arc<Peer>, OnFinish), Error> {
        loop {
            if self.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::unavailable("chooser has been stopped"));
            }
            let (peer, subscriber_id) = {
                let guard = self.registered.lock().expect("lock poisoned");
                let registered = guard.as_ref().ok_or_else(|| Error::internal("chooser not started"))?;
                (registered.peer.clone(), registered.subscriber_id)
            };
            if peer.status() == ConnectionStatus::Available {
                return Ok((peer.clone(), OnFinish::new(peer, subscriber_id)));
            }
            let notified = self.notify.notified();
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(Error::deadline_exceeded("no peer became available before the deadline"));
                    }
                },
                None => notified.await,
            }
        }
    }
}
