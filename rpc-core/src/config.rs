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

//! The neutral `TransportSpec`/`BuildKit` contract (spec §6) a host application uses to wire a
//! concrete transport binding without this crate parsing YAML itself.
//!
//! `GrpcTransportConfig` is the one concrete, serde-shaped config struct this crate ships,
//! in the manner of `tari_common`'s `GlobalConfig` field groups - a host's own config loader
//! deserializes its YAML/TOML into this struct and hands it to [`GrpcTransportSpec`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::backoff::{BackoffStrategy, ExponentialBackoffStrategy};
use crate::peer::transport::PeerTransport;
use crate::router::Router;
use crate::transport::grpc::{
    ClientTlsMaterial, Compression, GrpcDialer, GrpcDialerOptions, GrpcInbound, GrpcServerOptions, GrpcStreamOutbound,
    GrpcUnaryOutbound, KeepaliveConfig,
};
use crate::transport::{Inbound, StreamOutbound, UnaryOutbound};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(String),
    #[error("invalid config field {field}: {reason}")]
    InvalidField { field: String, reason: String },
    #[error(transparent)]
    Transport(#[from] crate::error::Error),
}

/// A registry of already-built shared resources (peer transports, TLS material, ...), plus
/// environment-variable interpolation for string config values (spec §6).
#[derive(Default)]
pub struct BuildKit {
    env: HashMap<String, String>,
    registry: HashMap<(TypeId, String), Arc<dyn Any + Send + Sync>>,
}

impl BuildKit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a kit that interpolates `${VAR}` placeholders from `env` rather than the
    /// process environment, for deterministic tests.
    pub fn with_env(env: HashMap<String, String>) -> Self {
        Self { env, registry: HashMap::new() }
    }

    /// Replaces every `${NAME}` occurrence in `s` with the matching environment value,
    /// leaving unknown placeholders untouched.
    pub fn interpolate(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.env.get(name).cloned().or_else(|| std::env::var(name).ok()) {
                        Some(value) => out.push_str(&value),
                        None => out.push_str(&format!("${{{name}}}")),
                    }
                    rest = &after[end + 1..];
                },
                None => {
                    out.push_str("${");
                    rest = after;
                },
            }
        }
        out.push_str(rest);
        out
    }

    /// Registers a shared resource under `name`, retrievable later via [`BuildKit::lookup`].
    pub fn register<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: Arc<T>) {
        self.registry.insert((TypeId::of::<T>(), name.into()), value);
    }

    /// Looks up a shared resource of type `T` registered under `name`.
    pub fn lookup<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.registry
            .get(&(TypeId::of::<T>(), name.to_owned()))
            .and_then(|v| v.clone().downcast::<T>().ok())
    }
}

/// Builds one transport binding's inbound/outbound/transport triple from a [`BuildKit`]
/// (spec §6). The only implementation this crate ships is [`GrpcTransportSpec`].
#[async_trait]
pub trait TransportSpec: Send + Sync {
    fn name(&self) -> &str;
    fn build_transport(&self, kit: &BuildKit) -> Result<Arc<PeerTransport>, ConfigError>;
    fn build_inbound(&self, kit: &BuildKit) -> Result<Box<dyn Inbound>, ConfigError>;
    fn build_unary_outbound(&self, kit: &BuildKit) -> Result<Box<dyn UnaryOutbound>, ConfigError>;
    fn build_stream_outbound(&self, kit: &BuildKit) -> Result<Box<dyn StreamOutbound>, ConfigError>;
}

fn default_true() -> bool {
    true
}

fn default_keepalive_time_secs() -> u64 {
    10
}

fn default_keepalive_timeout_secs() -> u64 {
    20
}

/// The serde-shaped config for the gRPC binding, in the manner of `tari_common::GlobalConfig`
/// field groups - this crate never parses the surrounding YAML/TOML document itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrpcTransportConfig {
    /// `host:port`, may contain `${VAR}` placeholders resolved by [`BuildKit::interpolate`].
    pub address: String,
    #[serde(default = "default_keepalive_time_secs")]
    pub keepalive_time_secs: u64,
    #[serde(default = "default_keepalive_timeout_secs")]
    pub keepalive_timeout_secs: u64,
    #[serde(default)]
    pub keepalive_permit_without_stream: bool,
    #[serde(default)]
    pub tls_domain_name: Option<String>,
    #[serde(default = "default_true")]
    pub single_peer: bool,
    /// Caps request/response message size in bytes (spec §8 scenario 3). `None` defers to
    /// tonic's own 4 MiB codec default.
    #[serde(default)]
    pub max_message_bytes: Option<usize>,
    /// The compressor this binding registers at startup (spec §4.11, §9's "process-wide
    /// compressor registry"). `None` sends and accepts only identity encoding.
    #[serde(default)]
    pub compression: Option<Compression>,
}

impl Default for GrpcTransportConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            keepalive_time_secs: default_keepalive_time_secs(),
            keepalive_timeout_secs: default_keepalive_timeout_secs(),
            keepalive_permit_without_stream: false,
            tls_domain_name: None,
            single_peer: true,
            max_message_bytes: None,
            compression: None,
        }
    }
}

impl GrpcTransportConfig {
    fn dialer_options(&self, kit: &BuildKit) -> Result<GrpcDialerOptions, ConfigError> {
        let keepalive = KeepaliveConfig::new(
            Duration::from_secs(self.keepalive_time_secs),
            Duration::from_secs(self.keepalive_timeout_secs),
            self.keepalive_permit_without_stream,
        )
        .map_err(ConfigError::Transport)?;

        let tls = self.tls_domain_name.as_ref().map(|domain| ClientTlsMaterial {
            domain_name: Some(kit.interpolate(domain)),
            ca_certificate: None,
            client_identity: None,
        });

        Ok(GrpcDialerOptions {
            tls,
            keepalive,
            compression: self.compression,
            max_message_size: self.max_message_bytes,
        })
    }

    fn server_options(&self) -> GrpcServerOptions {
        GrpcServerOptions {
            tls: None,
            keepalive: KeepaliveConfig::default(),
            compression: self.compression,
            max_message_size: self.max_message_bytes,
        }
    }
}

/// Builds the gRPC inbound/outbound triple described by a [`GrpcTransportConfig`].
pub struct GrpcTransportSpec {
    config: GrpcTransportConfig,
}

impl GrpcTransportSpec {
    pub fn new(config: GrpcTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportSpec for GrpcTransportSpec {
    fn name(&self) -> &str {
        "grpc"
    }

    fn build_transport(&self, _kit: &BuildKit) -> Result<Arc<PeerTransport>, ConfigError> {
        Ok(PeerTransport::new(Arc::new(ExponentialBackoffStrategy::default())))
    }

    fn build_inbound(&self, _kit: &BuildKit) -> Result<Box<dyn Inbound>, ConfigError> {
        Ok(Box::new(GrpcInbound::with_options(self.config.server_options())))
    }

    fn build_unary_outbound(&self, kit: &BuildKit) -> Result<Box<dyn UnaryOutbound>, ConfigError> {
        if self.config.address.is_empty() {
            return Err(ConfigError::MissingField("address".to_owned()));
        }
        let transport = self.build_transport(kit)?;
        let dialer = Arc::new(GrpcDialer::new(self.config.dialer_options(kit)?));
        let address = kit.interpolate(&self.config.address);
        let chooser: Arc<dyn crate::chooser::Chooser> = crate::chooser::single::SingleChooser::new(transport, dialer, address);
        Ok(Box::new(GrpcUnaryOutbound::with_options(
            chooser,
            self.config.max_message_bytes,
            self.config.compression,
        )))
    }

    fn build_stream_outbound(&self, kit: &BuildKit) -> Result<Box<dyn StreamOutbound>, ConfigError> {
        if self.config.address.is_empty() {
            return Err(ConfigError::MissingField("address".to_owned()));
        }
        let transport = self.build_transport(kit)?;
        let dialer = Arc::new(GrpcDialer::new(self.config.dialer_options(kit)?));
        let address = kit.interpolate(&self.config.address);
        let chooser: Arc<dyn crate::chooser::Chooser> = crate::chooser::single::SingleChooser::new(transport, dialer, address);
        Ok(Box::new(GrpcStreamOutbound::with_options(
            chooser,
            self.config.max_message_bytes,
            self.config.compression,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolate_substitutes_known_variables() {
        let mut env = HashMap::new();
        env.insert("HOST".to_owned(), "127.0.0.1:9000".to_owned());
        let kit = BuildKit::with_env(env);
        assert_eq!(kit.interpolate("addr=${HOST}"), "addr=127.0.0.1:9000");
    }

    #[test]
    fn interpolate_leaves_unknown_variables_untouched() {
        let kit = BuildKit::new();
        assert_eq!(kit.interpolate("addr=${NOT_SET_IN_THIS_TEST_ENV}"), "addr=${NOT_SET_IN_THIS_TEST_ENV}");
    }

    #[test]
    fn lookup_round_trips_a_registered_resource() {
        let mut kit = BuildKit::new();
        kit.register("shared", Arc::new(42u32));
        assert_eq!(kit.lookup::<u32>("shared"), Some(Arc::new(42u32)));
        assert_eq!(kit.lookup::<u64>("shared"), None);
    }

    #[test]
    fn grpc_transport_config_default_keepalive_meets_minimum() {
        let config = GrpcTransportConfig::default();
        let kit = BuildKit::new();
        assert!(config.dialer_options(&kit).is_ok());
    }

    #[test]
    fn max_message_bytes_propagates_into_dialer_and_server_options() {
        let config = GrpcTransportConfig {
            max_message_bytes: Some(32 * 1024 * 1024),
            ..GrpcTransportConfig::default()
        };
        let kit = BuildKit::new();
        assert_eq!(config.dialer_options(&kit).unwrap().max_message_size, Some(32 * 1024 * 1024));
        assert_eq!(config.server_options().max_message_size, Some(32 * 1024 * 1024));
    }

    #[test]
    fn compression_propagates_into_dialer_and_server_options() {
        let config = GrpcTransportConfig {
            compression: Some(Compression::Zstd),
            ..GrpcTransportConfig::default()
        };
        let kit = BuildKit::new();
        assert_eq!(config.dialer_options(&kit).unwrap().compression, Some(Compression::Zstd));
        assert_eq!(config.server_options().compression, Some(Compression::Zstd));
    }

    #[test]
    fn build_unary_outbound_requires_an_address() {
        let spec = GrpcTransportSpec::new(GrpcTransportConfig::default());
        let kit = BuildKit::new();
        assert!(matches!(spec.build_unary_outbound(&kit), Err(ConfigError::MissingField(_))));
    }
}
