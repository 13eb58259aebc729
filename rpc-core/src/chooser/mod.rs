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

//! The chooser plane (spec §4.6): a runtime-pluggable policy that selects a [`Peer`] for an
//! outgoing call.

pub mod round_robin;
pub mod single;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Error;
use crate::peer::{Peer, SubscriberId};
use crate::request::Request;

/// The callback a [`Chooser`] hands back from `choose`; invoked exactly once when the call
/// completes, used to track pending-request counts (spec §4.6).
pub struct OnFinish {
    peer: Arc<Peer>,
    subscriber_id: SubscriberId,
    called: AtomicBool,
}

impl OnFinish {
    pub fn new(peer: Arc<Peer>, subscriber_id: SubscriberId) -> Self {
        peer.start_request(subscriber_id);
        Self {
            peer,
            subscriber_id,
            called: AtomicBool::new(false),
        }
    }

    /// Invoked exactly once per call. Subsequent calls are ignored, since a finished call
    /// cannot un-finish.
    pub fn finish(&self, _err: Option<&Error>) {
        if !self.called.swap(true, Ordering::SeqCst) {
            self.peer.end_request(self.subscriber_id);
        }
    }
}

impl Drop for OnFinish {
    fn drop(&mut self) {
        // Guards against a caller that forgets to call finish explicitly.
        self.finish(None);
    }
}

#[async_trait]
pub trait Chooser: Send + Sync {
    async fn start(&self) -> Result<(), Error>;
    async fn stop(&self) -> Result<(), Error>;

    /// Adds/removes candidate peer identifiers (spec §4.6).
    async fn update(&self, additions: Vec<String>, removals: Vec<String>) -> Result<(), Error>;

    /// Selects a peer for `request`. Must never return a peer observed `Unavailable` at
    /// selection time (spec §4.6, §8). Returns `DeadlineExceeded` if no peer becomes
    /// available before `deadline`, or a terminal error if the chooser has been stopped.
    async fn choose(&self, deadline: Option<Instant>, request: &Request) -> Result<(Arc<Peer>, OnFinish), Error>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn on_finish_invokes_end_request_exactly_once() {
        let peer = Peer::new("a:1", Box::new(()));
        struct Counter(AtomicUsize);
        impl crate::peer::Subscriber for Counter {
            fn on_status_changed(&self, _peer_id: &str, _status: crate::peer::ConnectionStatus) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let sub_id = peer.add_subscriber(counter);
        let other_id = sub_id + 1; // the OnFinish "owns" sub_id as originator

        let on_finish = OnFinish::new(peer.clone(), other_id);
        assert_eq!(peer.pending_requests(), 1);
        on_finish.finish(None);
        on_finish.finish(None);
        assert_eq!(peer.pending_requests(), 0);
    }
}
