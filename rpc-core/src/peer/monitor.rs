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

//! For each newly dialed peer, a background task observes the underlying connection's state
//! and maps it onto [`ConnectionStatus`] (spec §4.5).

use std::sync::Arc;

use tokio::sync::oneshot;

use super::transport::ConnectivityWatcher;
use super::{ConnectionStatus, Peer};
use crate::backoff::Backoff;

/// The vendor-level connection states the monitor observes, before mapping (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorConnectionState {
    Ready,
    Connecting,
    Idle,
    TransientFailure,
    Shutdown,
}

/// Maps a vendor connection state to the yarpc-level [`ConnectionStatus`] (spec §4.5 table).
pub fn map_vendor_state(state: VendorConnectionState) -> ConnectionStatus {
    match state {
        VendorConnectionState::Ready => ConnectionStatus::Available,
        VendorConnectionState::Connecting => ConnectionStatus::Connecting,
        VendorConnectionState::Idle | VendorConnectionState::TransientFailure | VendorConnectionState::Shutdown => {
            ConnectionStatus::Unavailable
        },
    }
}

/// Drives one peer's connection monitor until `cancel` fires. On every state change it maps
/// the vendor state and calls `peer.set_status`, which notifies subscribers. On cancel, it
/// sets `Unavailable` and returns - this task does not retry the dial itself; the underlying
/// client library does, and `backoff` exists only so a future retry loop built on top of this
/// monitor has somewhere to read its delay from (spec §4.5: "the monitor does not retry
/// itself").
pub async fn run_monitor(
    peer: Arc<Peer>,
    mut watcher: Box<dyn ConnectivityWatcher>,
    mut backoff: Box<dyn Backoff>,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => {
                peer.set_status(ConnectionStatus::Unavailable);
                return;
            }
            state = watcher.next_state() => {
                let status = map_vendor_state(state);
                if status == ConnectionStatus::Available {
                    backoff.reset();
                }
                peer.set_status(status);
                if state == VendorConnectionState::Shutdown {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    #[test]
    fn mapping_table_matches_spec() {
        assert_eq!(map_vendor_state(VendorConnectionState::Ready), ConnectionStatus::Available);
        assert_eq!(map_vendor_state(VendorConnectionState::Connecting), ConnectionStatus::Connecting);
        assert_eq!(map_vendor_state(VendorConnectionState::Idle), ConnectionStatus::Unavailable);
        assert_eq!(
            map_vendor_state(VendorConnectionState::TransientFailure),
            ConnectionStatus::Unavailable
        );
        assert_eq!(map_vendor_state(VendorConnectionState::Shutdown), ConnectionStatus::Unavailable);
    }

    struct ScriptedWatcher {
        states: Vec<VendorConnectionState>,
    }

    #[async_trait]
    impl ConnectivityWatcher for ScriptedWatcher {
        async fn next_state(&mut self) -> VendorConnectionState {
            if self.states.is_empty() {
                std::future::pending().await
            } else {
                self.states.remove(0)
            }
        }
    }

    #[tokio::test]
    async fn monitor_sets_unavailable_on_cancel() {
        let peer = Peer::new("a:1", Box::new(()));
        let watcher = Box::new(ScriptedWatcher {
            states: vec![VendorConnectionState::Connecting, VendorConnectionState::Ready],
        });
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let backoff = Box::new(crate::backoff::NullBackoff);

        let handle = tokio::spawn(run_monitor(peer.clone(), watcher, backoff, cancel_rx));
        // Allow the scripted transitions to land.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(peer.status(), ConnectionStatus::Available);

        cancel_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(peer.status(), ConnectionStatus::Unavailable);
    }
}
