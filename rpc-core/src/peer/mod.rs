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

//! The abstract [`Peer`] (spec §4.3) and its [`ConnectionStatus`] state machine.
//!
//! A `Peer` carries no transport-specific connection type of its own - per the "tagged-variant
//! Peer" design note (spec §9), the concrete connection resource is owned by whichever
//! [`transport`](crate::peer::transport) dialed it and stashed in `payload`.

pub mod monitor;
pub mod transport;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// `Unavailable -> Connecting -> Available`, driven solely by the dial state machine
/// (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unavailable,
    Connecting,
    Available,
}

/// Receives peer status and request-count notifications (spec §4.3).
///
/// Implementations must not block for long or re-enter peer operations synchronously;
/// the peer snapshots its subscriber set under lock and notifies outside of it (spec §4.3).
pub trait Subscriber: Send + Sync {
    fn on_status_changed(&self, peer_id: &str, status: ConnectionStatus) {
        let _ = (peer_id, status);
    }
}

pub type SubscriberId = u64;

struct Inner {
    status: ConnectionStatus,
    pending_requests: u64,
    subscribers: HashMap<SubscriberId, Arc<dyn Subscriber>>,
}

/// A remote endpoint identified by an opaque string, typically `host:port` (spec §3).
///
/// Shared by every [`Chooser`](crate::chooser::Chooser) that retains it; its lifetime is the
/// longest holder's (spec §3 invariant: `Subscribers != empty` iff it is indexed by its
/// transport).
pub struct Peer {
    identifier: String,
    inner: Mutex<Inner>,
    next_subscriber_id: AtomicU64,
    payload: Box<dyn Any + Send + Sync>,
}

impl Peer {
    pub fn new(identifier: impl Into<String>, payload: Box<dyn Any + Send + Sync>) -> Arc<Self> {
        Arc::new(Self {
            identifier: identifier.into(),
            inner: Mutex::new(Inner {
                status: ConnectionStatus::Unavailable,
                pending_requests: 0,
                subscribers: HashMap::new(),
            }),
            next_subscriber_id: AtomicU64::new(0),
            payload,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Downcasts the transport-specific connection payload this peer's transport dialed.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn add_subscriber(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        inner.subscribers.insert(id, subscriber);
        id
    }

    /// Errors if `id` is not a currently-registered subscriber (spec §4.3).
    pub fn remove_subscriber(&self, id: SubscriberId) -> Result<(), crate::error::Error> {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        inner
            .subscribers
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| crate::error::Error::internal(format!("subscriber {id} is not registered")))
    }

    pub fn num_subscribers(&self) -> usize {
        self.inner.lock().expect("peer lock poisoned").subscribers.len()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().expect("peer lock poisoned").status
    }

    /// Sets the status and notifies every current subscriber. The subscriber set is
    /// snapshotted under lock, then notified outside of it, so notification never
    /// recursively acquires the peer lock (spec §4.3).
    pub fn set_status(&self, status: ConnectionStatus) {
        let subscribers: Vec<Arc<dyn Subscriber>> = {
            let mut inner = self.inner.lock().expect("peer lock poisoned");
            inner.status = status;
            inner.subscribers.values().cloned().collect()
        };
        for subscriber in subscribers {
            subscriber.on_status_changed(&self.identifier, status);
        }
    }

    /// Increments the pending-request counter and notifies every subscriber except
    /// `originator`, to avoid re-entrancy (spec §4.3).
    pub fn start_request(&self, originator: SubscriberId) {
        let (status, subscribers) = {
            let mut inner = self.inner.lock().expect("peer lock poisoned");
            inner.pending_requests += 1;
            let status = inner.status;
            let subscribers: Vec<_> = inner
                .subscribers
                .iter()
                .filter(|(id, _)| **id != originator)
                .map(|(_, s)| s.clone())
                .collect();
            (status, subscribers)
        };
        for subscriber in subscribers {
            subscriber.on_status_changed(&self.identifier, status);
        }
    }

    pub fn end_request(&self, originator: SubscriberId) {
        let (status, subscribers) = {
            let mut inner = self.inner.lock().expect("peer lock poisoned");
            inner.pending_requests = inner.pending_requests.saturating_sub(1);
            let status = inner.status;
            let subscribers: Vec<_> = inner
                .subscribers
                .iter()
                .filter(|(id, _)| **id != originator)
                .map(|(_, s)| s.clone())
                .collect();
            (status, subscribers)
        };
        for subscriber in subscribers {
            subscriber.on_status_changed(&self.identifier, status);
        }
    }

    pub fn pending_requests(&self) -> u64 {
        self.inner.lock().expect("peer lock poisoned").pending_requests
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("identifier", &self.identifier)
            .field("status", &self.status())
            .field("pending_requests", &self.pending_requests())
            .field("num_subscribers", &self.num_subscribers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingSubscriber {
        calls: AtomicUsize,
    }

    impl Subscriber for CountingSubscriber {
        fn on_status_changed(&self, _peer_id: &str, _status: ConnectionStatus) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn set_status_notifies_all_subscribers() {
        let peer = Peer::new("localhost:1234", Box::new(()));
        let sub = Arc::new(CountingSubscriber {
            calls: AtomicUsize::new(0),
        });
        peer.add_subscriber(sub.clone());
        peer.set_status(ConnectionStatus::Available);
        assert_eq!(sub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(peer.status(), ConnectionStatus::Available);
    }

    #[test]
    fn start_request_excludes_originator() {
        let peer = Peer::new("localhost:1234", Box::new(()));
        let originator = Arc::new(CountingSubscriber {
            calls: AtomicUsize::new(0),
        });
        let other = Arc::new(CountingSubscriber {
            calls: AtomicUsize::new(0),
        });
        let originator_id = peer.add_subscriber(originator.clone());
        peer.add_subscriber(other.clone());

        peer.start_request(originator_id);
        assert_eq!(originator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(other.calls.load(Ordering::SeqCst), 1);
        assert_eq!(peer.pending_requests(), 1);

        peer.end_request(originator_id);
        assert_eq!(originator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(other.calls.load(Ordering::SeqCst), 2);
        assert_eq!(peer.pending_requests(), 0);
    }

    #[test]
    fn remove_subscriber_errors_if_not_present() {
        let peer = Peer::new("localhost:1234", Box::new(()));
        assert!(peer.remove_subscriber(42).is_err());
    }

    #[test]
    fn payload_downcasts_to_transport_specific_type() {
        let peer = Peer::new("localhost:1234", Box::new(7u32));
        assert_eq!(peer.payload::<u32>(), Some(&7));
        assert_eq!(peer.payload::<u64>(), None);
    }
}
