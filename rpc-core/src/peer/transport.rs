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

//! The `address -> Peer` directory with reference counting (spec §4.4).
//!
//! Per the "cyclic references" design note (spec §9), a [`Peer`] does not hold a back-pointer
//! to its owning transport; the transport owns the `address -> Peer` map and every retain/
//! release goes through it, so the reference count lives in the map, not in the peer.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::monitor::{run_monitor, VendorConnectionState};
use super::{Peer, SubscriberId, Subscriber};
use crate::backoff::BackoffStrategy;
use crate::error::Error;
use crate::lifecycle::{Lifecycle, Once};

/// What a [`Dialer`] hands back after a successful dial: the transport-specific connection
/// payload, and a watcher the monitor polls for state changes.
pub struct DialedPeer {
    pub payload: Box<dyn Any + Send + Sync>,
    pub watcher: Box<dyn ConnectivityWatcher>,
}

/// Observes a dialed connection's state changes for the peer connection monitor (spec §4.5).
/// Implementations are transport-specific (the gRPC binding's watcher polls channel readiness;
/// see [`crate::transport::grpc::dialer`]).
#[async_trait]
pub trait ConnectivityWatcher: Send + Sync {
    /// Blocks until the connection's state changes, or returns `Shutdown` once the
    /// connection can no longer produce further transitions.
    async fn next_state(&mut self) -> VendorConnectionState;
}

/// A decorator over the transport carrying per-use dial options (TLS, keepalive, compressor,
/// context dialer). Multiple dialers may share one [`PeerTransport`]; options set on a peer at
/// first retention are sticky (spec §4.4) - a later `dial` call on an already-cached address
/// never runs, so its options never take effect.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, id: &str) -> Result<DialedPeer, Error>;
}

struct PeerEntry {
    peer: Arc<Peer>,
    cancel_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

/// The `address -> Peer` registry. `Start` is idempotent and required before peers can serve
/// traffic; `Stop` cancels every peer monitor then awaits each peer's stopped signal (spec §4.4).
pub struct PeerTransport {
    peers: Mutex<HashMap<String, PeerEntry>>,
    backoff_strategy: Arc<dyn BackoffStrategy>,
    lifecycle: Once,
}

impl PeerTransport {
    pub fn new(backoff_strategy: Arc<dyn BackoffStrategy>) -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
            backoff_strategy,
            lifecycle: Once::new(),
        })
    }

    /// Returns the cached peer for `id` or dials a new one via `dialer`, registering
    /// `subscriber` either way (spec §4.4).
    pub async fn retain_peer(
        &self,
        id: &str,
        dialer: &dyn Dialer,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(SubscriberId, Arc<Peer>), Error> {
        // Fast path: peer already cached, dialer options are not consulted (sticky).
        {
            let peers = self.peers.lock().expect("peer transport lock poisoned");
            if let Some(entry) = peers.get(id) {
                let sub_id = entry.peer.add_subscriber(subscriber);
                return Ok((sub_id, entry.peer.clone()));
            }
        }

        let dialed = dialer.dial(id).await?;
        let peer = Peer::new(id, dialed.payload);
        let sub_id = peer.add_subscriber(subscriber);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let backoff = self.backoff_strategy.new_backoff();
        let join = tokio::spawn(run_monitor(peer.clone(), dialed.watcher, backoff, cancel_rx));

        let mut peers = self.peers.lock().expect("peer transport lock poisoned");
        // Another task may have raced us to dial the same address; prefer the one already
        // inserted and let ours be dropped (its monitor is cancelled immediately).
        if let Some(existing) = peers.get(id) {
            let _ = cancel_tx.send(());
            let sub_id = existing.peer.add_subscriber(subscriber.clone());
            peer.remove_subscriber(sub_id).ok();
            return Ok((sub_id, existing.peer.clone()));
        }
        peers.insert(
            id.to_owned(),
            PeerEntry {
                peer: peer.clone(),
                cancel_tx: Some(cancel_tx),
                join,
            },
        );
        Ok((sub_id, peer))
    }

    /// Decrements the subscriber set; when it reaches zero the peer is removed and its
    /// monitor is asked to stop (spec §4.4).
    pub async fn release_peer(&self, id: &str, subscriber_id: SubscriberId) -> Result<(), Error> {
        let entry = {
            let peers = self.peers.lock().expect("peer transport lock poisoned");
            match peers.get(id) {
                Some(entry) => entry.peer.clone(),
                None => return Err(Error::internal(format!("no peer cached for {id}"))),
            }
        };
        entry.remove_subscriber(subscriber_id)?;
        if entry.num_subscribers() == 0 {
            let mut peers = self.peers.lock().expect("peer transport lock poisoned");
            if let Some(mut removed) = peers.remove(id) {
                if entry.num_subscribers() == 0 {
                    if let Some(cancel) = removed.cancel_tx.take() {
                        let _ = cancel.send(());
                    }
                    drop(peers);
                    let _ = removed.join.await;
                } else {
                    // Someone re-retained between our check and the lock; put it back.
                    peers.insert(id.to_owned(), removed);
                }
            }
        }
        Ok(())
    }

    pub fn get_cached(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers
            .lock()
            .expect("peer transport lock poisoned")
            .get(id)
            .map(|e| e.peer.clone())
    }

    pub fn len(&self) -> usize {
        self.peers.lock().expect("peer transport lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Lifecycle for PeerTransport {
    async fn start(&self) -> Result<(), Error> {
        self.lifecycle.start(|| async { Ok(()) }).await
    }

    async fn stop(&self) -> Result<(), Error> {
        self.lifecycle
            .stop(|| async {
                let ids: Vec<String> = self
                    .peers
                    .lock()
                    .expect("peer transport lock poisoned")
                    .keys()
                    .cloned()
                    .collect();
                for id in ids {
                    let mut peers = self.peers.lock().expect("peer transport lock poisoned");
                    if let Some(mut entry) = peers.remove(&id) {
                        if let Some(cancel) = entry.cancel_tx.take() {
                            let _ = cancel.send(());
                        }
                        drop(peers);
                        let _ = entry.join.await;
                    }
                }
                Ok(())
            })
            .await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::NullBackoff;
    use crate::peer::ConnectionStatus;

    struct ImmediatelyReadyWatcher;

    #[async_trait]
    impl ConnectivityWatcher for ImmediatelyReadyWatcher {
        async fn next_state(&mut self) -> VendorConnectionState {
            std::future::pending().await
        }
    }

    struct StaticDialer;

    #[async_trait]
    impl Dialer for StaticDialer {
        async fn dial(&self, _id: &str) -> Result<DialedPeer, Error> {
            Ok(DialedPeer {
                payload: Box::new(()),
                watcher: Box::new(ImmediatelyReadyWatcher),
            })
        }
    }

    struct NoopSubscriber;
    impl Subscriber for NoopSubscriber {}

    #[tokio::test]
    async fn retain_creates_and_reuses_peer() {
        let transport = PeerTransport::new(Arc::new(NullBackoff));
        let dialer = StaticDialer;
        let sub = Arc::new(NoopSubscriber);

        let (id1, peer1) = transport.retain_peer("a:1", &dialer, sub.clone()).await.unwrap();
        let (id2, peer2) = transport.retain_peer("a:1", &dialer, sub.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&peer1, &peer2));
        assert_eq!(peer1.num_subscribers(), 2);
        assert_ne!(id1, id2);
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test]
    async fn release_removes_peer_when_subscribers_drain_to_zero() {
        let transport = PeerTransport::new(Arc::new(NullBackoff));
        let dialer = StaticDialer;
        let sub = Arc::new(NoopSubscriber);

        let (id1, _peer) = transport.retain_peer("a:1", &dialer, sub.clone()).await.unwrap();
        assert_eq!(transport.len(), 1);
        transport.release_peer("a:1", id1).await.unwrap();
        assert_eq!(transport.len(), 0);
    }

    #[tokio::test]
    async fn initial_status_is_unavailable() {
        let transport = PeerTransport::new(Arc::new(NullBackoff));
        let dialer = StaticDialer;
        let sub = Arc::new(NoopSubscriber);
        let (_id, peer) = transport.retain_peer("a:1", &dialer, sub).await.unwrap();
        assert_eq!(peer.status(), ConnectionStatus::Unavailable);
    }
}
