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

//! TLS, compression and keepalive wiring for the gRPC binding (spec §4.11), grounded in
//! `minotari_node`'s `run_grpc` TLS setup and `tari_comms`'s keepalive constants.

use std::time::Duration;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::error::Error;

/// `(time, timeout, permitWithoutStream)` per outbound (spec §4.11). gRPC requires
/// `time >= 10s`; a shorter value is rejected at construction.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    pub time: Duration,
    pub timeout: Duration,
    pub permit_without_stream: bool,
}

impl KeepaliveConfig {
    pub const MIN_TIME: Duration = Duration::from_secs(10);

    pub fn new(time: Duration, timeout: Duration, permit_without_stream: bool) -> Result<Self, Error> {
        if time < Self::MIN_TIME {
            return Err(Error::invalid_argument(format!(
                "keepalive time must be >= {:?} per gRPC rules, got {:?}",
                Self::MIN_TIME,
                time
            )));
        }
        Ok(Self {
            time,
            timeout,
            permit_without_stream,
        })
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            time: Self::MIN_TIME,
            timeout: Duration::from_secs(20),
            permit_without_stream: false,
        }
    }
}

/// The compression algorithms this binding registers at startup (spec §4.11: "the framework
/// registers a pluggable compressor at startup and names it in the default call options").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Zstd,
}

impl Compression {
    pub fn to_tonic(self) -> tonic::codec::CompressionEncoding {
        match self {
            Compression::Gzip => tonic::codec::CompressionEncoding::Gzip,
            Compression::Zstd => tonic::codec::CompressionEncoding::Zstd,
        }
    }
}

/// Client-side TLS material (spec §1 Non-goals: "it composes an injected TLS credential",
/// it does not implement TLS itself).
#[derive(Debug, Clone, Default)]
pub struct ClientTlsMaterial {
    pub domain_name: Option<String>,
    pub ca_certificate: Option<Vec<u8>>,
    pub client_identity: Option<(Vec<u8>, Vec<u8>)>,
}

impl ClientTlsMaterial {
    pub fn into_tonic(self) -> ClientTlsConfig {
        let mut config = ClientTlsConfig::new();
        if let Some(domain) = self.domain_name {
            config = config.domain_name(domain);
        }
        if let Some(ca) = self.ca_certificate {
            config = config.ca_certificate(Certificate::from_pem(ca));
        }
        if let Some((cert, key)) = self.client_identity {
            config = config.identity(Identity::from_pem(cert, key));
        }
        config
    }
}

/// Server-side TLS material.
#[derive(Debug, Clone)]
pub struct ServerTlsMaterial {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    pub client_ca_certificate: Option<Vec<u8>>,
}

impl ServerTlsMaterial {
    pub fn into_tonic(self) -> ServerTlsConfig {
        let mut config = ServerTlsConfig::new().identity(Identity::from_pem(self.certificate, self.private_key));
        if let Some(ca) = self.client_ca_certificate {
            config = config.client_ca_root(Certificate::from_pem(ca));
        }
        config
    }
}

#[derive(Debug, Clone, Default)]
pub struct GrpcDialerOptions {
    pub tls: Option<ClientTlsMaterial>,
    pub keepalive: KeepaliveConfig,
    pub compression: Option<Compression>,
    /// Caps both directions of message size (spec §8 scenario 3: 4 MiB by default, raisable
    /// per transport). `None` defers to tonic's own built-in codec default.
    pub max_message_size: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct GrpcServerOptions {
    pub tls: Option<ServerTlsMaterial>,
    pub keepalive: KeepaliveConfig,
    pub compression: Option<Compression>,
    pub max_message_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_rejects_time_below_grpc_minimum() {
        let err = KeepaliveConfig::new(Duration::from_secs(5), Duration::from_secs(5), false).unwrap_err();
        assert_eq!(err.code, crate::error::Code::InvalidArgument);
    }

    #[test]
    fn keepalive_accepts_minimum_time() {
        assert!(KeepaliveConfig::new(Duration::from_secs(10), Duration::from_secs(5), true).is_ok());
    }

    #[test]
    fn default_keepalive_meets_grpc_minimum() {
        assert!(KeepaliveConfig::default().time >= KeepaliveConfig::MIN_TIME);
    }
}
