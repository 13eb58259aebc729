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

//! The `RoundRobin` reference chooser: cycles through a candidate set, skipping any peer not
//! currently `Available` (spec §4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Chooser, OnFinish};
use crate::error::Error;
use crate::peer::transport::{Dialer, PeerTransport};
use crate::peer::{ConnectionStatus, Peer, Subscriber, SubscriberId};
use crate::request::Request;

struct Registration {
    peer: Arc<Peer>,
    subscriber_id: SubscriberId,
}

struct State {
    order: Vec<String>,
    registrations: HashMap<String, Registration>,
}

/// Cycles through its candidate addresses in insertion order, wrapping around, and never hands
/// back a peer observed `Unavailable` at selection time (spec §4.6, §8).
pub struct RoundRobinChooser {
    transport: Arc<PeerTransport>,
    dialer: Arc<dyn Dialer>,
    state: Mutex<State>,
    cursor: AtomicUsize,
    notify: Arc<Notify>,
    stopped: std::sync::atomic::AtomicBool,
}

impl RoundRobinChooser {
    pub fn new(transport: Arc<PeerTransport>, dialer: Arc<dyn Dialer>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            dialer,
            state: Mutex::new(State {
                order: Vec::new(),
                registrations: HashMap::new(),
            }),
            cursor: AtomicUsize::new(0),
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
impl Chooser for RoundRobinChooser {
    async fn start(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        let registrations: Vec<(String, Registration)> = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.order.clear();
            state.registrations.drain().collect()
        };
        for (address, registration) in registrations {
            self.transport.release_peer(&address, registration.subscriber_id).await?;
        }
        Ok(())
    }

    async fn update(&self, additions: Vec<String>, removals: Vec<String>) -> Result<(), Error> {
        for address in additions {
            let already_present = self.state.lock().expect("lock poisoned").registrations.contains_key(&address);
            if already_present {
                continue;
            }
            let subscriber: Arc<dyn Subscriber> = Arc::new(WakeOnStatusChange(self.notify.clone()));
            let (subscriber_id, peer) = self.transport.retain_peer(&address, &*self.dialer, subscriber).await?;
            let mut state = self.state.lock().expect("lock poisoned");
            state.order.push(address.clone());
            state.registrations.insert(address, Registration { peer, subscriber_id });
        }

        for address in removals {
            let registration = {
                let mut state = self.state.lock().expect("lock poisoned");
                state.order.retain(|a| a != &address);
                state.registrations.remove(&address)
            };
            if let Some(registration) = registration {
                self.transport.release_peer(&address, registration.subscriber_id).await?;
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn choose(&self, deadline: Option<Instant>, _request: &Request) -> Result<(Arc<Peer>, OnFinish), Error> {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(Error::unavailable("chooser has been stopped"));
            }
            let picked = {
                let state = self.state.lock().expect("lock poisoned");
                if state.order.is_empty() {
                    None
                } else {
                    let len = state.order.len();
                    let start = self.cursor.load(Ordering::SeqCst) % len;
                    (0..len).map(|offset| (start + offset) % len).find_map(|idx| {
                        let address = &state.order[idx];
                        let registration = state.registrations.get(address)?;
                        if registration.peer.status() == ConnectionStatus::Available {
                            Some((idx, registration.peer.clone(), registration.subscriber_id))
                        } else {
                            None
                        }
                    })
                }
            };

            if let Some((idx, peer, subscriber_id)) = picked {
                self.cursor.store(idx + 1, Ordering::SeqCst);
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

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::backoff::NullBackoff;
    use crate::peer::monitor::VendorConnectionState;
    use crate::peer::transport::{ConnectivityWatcher, DialedPeer};

    struct ImmediatelyReadyWatcher;

    #[async_trait]
    impl ConnectivityWatcher for ImmediatelyReadyWatcher {
        async fn next_state(&mut self) -> VendorConnectionState {
            std::future::pending().await
        }
    }

    struct StaticDialer {
        initial_state: VendorConnectionState,
    }

    #[async_trait]
    impl Dialer for StaticDialer {
        async fn dial(&self, _id: &str) -> Result<DialedPeer, Error> {
            Ok(DialedPeer {
                payload: Box::new(()),
                watcher: Box::new(ScriptedWatcher(vec![self.initial_state])),
            })
        }
    }

    struct ScriptedWatcher(Vec<VendorConnectionState>);

    #[async_trait]
    impl ConnectivityWatcher for ScriptedWatcher {
        async fn next_state(&mut self) -> VendorConnectionState {
            if self.0.is_empty() {
                std::future::pending().await
            } else {
                self.0.remove(0)
            }
        }
    }

    #[tokio::test]
    async fn cycles_through_available_peers_in_order() {
        let transport = PeerTransport::new(Arc::new(NullBackoff));
        let dialer = Arc::new(StaticDialer {
            initial_state: VendorConnectionState::Ready,
        });
        let chooser = RoundRobinChooser::new(transport, dialer);
        chooser.start().await.unwrap();
        chooser
            .update(vec!["a:1".into(), "a:2".into(), "a:3".into()], vec![])
            .await
            .unwrap();

        let req = Request::default();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (peer, on_finish) = chooser.choose(None, &req).await.unwrap();
            seen.push(peer.identifier().to_owned());
            on_finish.finish(None);
        }
        assert_eq!(seen, vec!["a:1", "a:2", "a:3"]);
    }

    #[tokio::test]
    async fn skips_unavailable_peers() {
        let transport = PeerTransport::new(Arc::new(NullBackoff));

        struct MixedDialer;
        #[async_trait]
        impl Dialer for MixedDialer {
            async fn dial(&self, id: &str) -> Result<DialedPeer, Error> {
                let state = if id == "a:2" {
                    VendorConnectionState::Idle
                } else {
                    VendorConnectionState::Ready
                };
                Ok(DialedPeer {
                    payload: Box::new(()),
                    watcher: Box::new(ScriptedWatcher(vec![state])),
                })
            }
        }

        let chooser = RoundRobinChooser::new(transport, Arc::new(MixedDialer));
        chooser.start().await.unwrap();
        chooser
            .update(vec!["a:1".into(), "a:2".into(), "a:3".into()], vec![])
            .await
            .unwrap();
        // Allow the monitors to observe their scripted states.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let req = Request::default();
        let mut seen = Vec::new();
        for _ in 0..2 {
            let (peer, on_finish) = chooser.choose(None, &req).await.unwrap();
            seen.push(peer.identifier().to_owned());
            on_finish.finish(None);
        }
        assert_eq!(seen, vec!["a:1", "a:3"]);
    }

    #[tokio::test]
    async fn choose_times_out_with_no_candidates() {
        let transport = PeerTransport::new(Arc::new(NullBackoff));
        let dialer = Arc::new(StaticDialer {
            initial_state: VendorConnectionState::Ready,
        });
        let chooser = RoundRobinChooser::new(transport, dialer);
        chooser.start().await.unwrap();

        let req = Request::default();
        let deadline = Instant::now() + std::time::Duration::from_millis(20);
        let err = chooser.choose(Some(deadline), &req).await.unwrap_err();
        assert_eq!(err.code, crate::error::Code::DeadlineExceeded);
    }
}
