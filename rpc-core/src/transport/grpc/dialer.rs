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

//! The gRPC-specific [`Dialer`] and [`ConnectivityWatcher`] (spec §4.4, §4.5), built on
//! `tonic::transport::Channel`.
//!
//! `tonic` does not expose a `grpc-go`-style connectivity-state stream, so [`GrpcWatcher`]
//! resolves the state machine with a single connect probe: `Connecting` until the endpoint's
//! `connect()` resolves, then `Ready` for the remainder of the peer's life, relying on the
//! channel's own internal reconnection to stay transparent underneath. A probe failure reports
//! `TransientFailure` and the monitor's caller (the peer transport) re-dials on the next
//! `retain_peer` after the backoff interval.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};

use super::options::GrpcDialerOptions;
use crate::backoff::Backoff;
use crate::error::Error;
use crate::peer::monitor::VendorConnectionState;
use crate::peer::transport::{ConnectivityWatcher, DialedPeer, Dialer};

pub struct GrpcWatcher {
    endpoint: Endpoint,
    probed: bool,
}

#[async_trait]
impl ConnectivityWatcher for GrpcWatcher {
    async fn next_state(&mut self) -> VendorConnectionState {
        if self.probed {
            // The channel is transparent about reconnects past the first probe; park here so
            // the monitor loop idles until explicitly cancelled.
            std::future::pending().await
        } else {
            self.probed = true;
            match self.endpoint.connect().await {
                Ok(_channel) => VendorConnectionState::Ready,
                Err(_) => VendorConnectionState::TransientFailure,
            }
        }
    }
}

/// Dials gRPC addresses into a [`Channel`], carrying sticky per-use TLS/keepalive/compression
/// options (spec §4.4: "Dial options set on a peer at first retention are sticky").
pub struct GrpcDialer {
    options: GrpcDialerOptions,
}

impl GrpcDialer {
    pub fn new(options: GrpcDialerOptions) -> Self {
        Self { options }
    }

    fn build_endpoint(&self, id: &str) -> Result<Endpoint, Error> {
        let uri: http::Uri = format!("http://{id}")
            .parse()
            .map_err(|e| Error::invalid_argument(format!("invalid peer address {id}: {e}")))?;
        let mut endpoint = Channel::builder(uri)
            .keep_alive_while_idle(self.options.keepalive.permit_without_stream)
            .http2_keep_alive_interval(self.options.keepalive.time)
            .keep_alive_timeout(self.options.keepalive.timeout);

        if let Some(tls) = self.options.tls.clone() {
            endpoint = endpoint
                .tls_config(tls.into_tonic())
                .map_err(|e| Error::invalid_argument(format!("invalid TLS config for {id}: {e}")))?;
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl Dialer for GrpcDialer {
    async fn dial(&self, id: &str) -> Result<DialedPeer, Error> {
        let endpoint = self.build_endpoint(id)?;
        // `connect_lazy` never fails synchronously; actual connection failures surface
        // through the RPC call itself and through the watcher's own probe.
        let channel = endpoint.clone().connect_lazy();
        Ok(DialedPeer {
            payload: Box::new(channel),
            watcher: Box::new(GrpcWatcher { endpoint, probed: false }),
        })
    }
}

/// An exponential-backoff-with-full-jitter reconnect delay, exposed for a caller that wants to
/// pace re-dials of a peer the monitor reported `TransientFailure` on (spec §4.5).
pub async fn wait_for_backoff(backoff: &mut dyn Backoff) -> Duration {
    let delay = backoff.next_backoff();
    tokio::time::sleep(delay).await;
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialer_rejects_malformed_address() {
        let dialer = GrpcDialer::new(GrpcDialerOptions::default());
        assert!(dialer.build_endpoint("not a valid uri \u{0}").is_err());
    }
}
