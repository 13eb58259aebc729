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

//! Header <-> gRPC metadata mapping, procedure <-> path encoding, and the system header
//! names carried on the wire (spec §4.7, §4.8, §6).

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::Status;

use crate::error::Error;
use crate::headers::{self, Headers, ReservedPolicy};
use crate::request::RequestMeta;

pub const CALLER: &str = "rpc-caller";
pub const SERVICE: &str = "rpc-service";
pub const ENCODING: &str = "rpc-encoding";
pub const SHARD_KEY: &str = "rpc-shard-key";
pub const ROUTING_KEY: &str = "rpc-routing-key";
pub const ROUTING_DELEGATE: &str = "rpc-routing-delegate";
pub const CALLER_PROCEDURE: &str = "rpc-caller-procedure";
pub const ERROR_NAME: &str = "rpc-error-name";
pub const APPLICATION_ERROR: &str = "rpc-application-error";
pub const APPLICATION_ERROR_NAME: &str = "rpc-application-error-name";
pub const APPLICATION_ERROR_DETAILS: &str = "rpc-application-error-details";
pub const CONTENT_TYPE: &str = "content-type";

/// Reserved in the query-escape sense only; gRPC paths use the narrower RFC 3986 `pchar` set.
const PATH_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `/<urlEscape(service)>/<urlEscape(method)>`, unqualified procedures default to
/// `__default__` (spec §4.7 step 2, §6).
pub fn procedure_to_path(procedure: &str) -> String {
    let (service, method) = crate::request::split_procedure(procedure);
    format!(
        "/{}/{}",
        utf8_percent_encode(&service, PATH_ESCAPE),
        utf8_percent_encode(&method, PATH_ESCAPE)
    )
}

/// Reverses [`procedure_to_path`]. Rejects an empty method (spec §4.8: "Reject if method is
/// empty").
pub fn path_to_procedure(path: &str) -> Result<String, Error> {
    let trimmed = path.trim_start_matches('/');
    let (service, method) = trimmed
        .split_once('/')
        .ok_or_else(|| Error::invalid_argument(format!("malformed gRPC path {path}")))?;
    if method.is_empty() {
        return Err(Error::invalid_argument("empty procedure method"));
    }
    let service = percent_encoding::percent_decode_str(service)
        .decode_utf8()
        .map_err(|e| Error::invalid_argument(e.to_string()))?;
    let method = percent_encoding::percent_decode_str(method)
        .decode_utf8()
        .map_err(|e| Error::invalid_argument(e.to_string()))?;
    if service == "__default__" {
        Ok(method.into_owned())
    } else {
        Ok(format!("{service}::{method}"))
    }
}

fn insert(map: &mut MetadataMap, key: &'static str, value: &str) -> Result<(), Error> {
    let value: MetadataValue<_> = value
        .parse()
        .map_err(|_| Error::invalid_argument(format!("invalid value for {key}")))?;
    map.insert(key, value);
    Ok(())
}

/// Builds outbound request metadata from `meta` (spec §4.7 step 1). Rejects a reserved
/// application header before anything is sent (spec §4.1, §4.7 preconditions).
pub fn build_outbound_metadata(meta: &RequestMeta) -> Result<MetadataMap, Error> {
    meta.headers.validate_values()?;
    for (key, _) in meta.headers.iter() {
        if headers::is_reserved(key) {
            return Err(Error::invalid_argument(format!("reserved header {key} may not be set by application code")));
        }
    }

    let mut map = MetadataMap::new();
    insert(&mut map, CALLER, &meta.caller)?;
    insert(&mut map, SERVICE, &meta.service)?;
    insert(&mut map, ENCODING, &meta.encoding)?;
    if let Some(shard_key) = &meta.shard_key {
        insert(&mut map, SHARD_KEY, shard_key)?;
    }
    if let Some(routing_key) = &meta.routing_key {
        insert(&mut map, ROUTING_KEY, routing_key)?;
    }
    if let Some(routing_delegate) = &meta.routing_delegate {
        insert(&mut map, ROUTING_DELEGATE, routing_delegate)?;
    }
    if let Some(caller_procedure) = &meta.caller_procedure {
        insert(&mut map, CALLER_PROCEDURE, caller_procedure)?;
    }
    let content_type = format!("application/grpc+{}", meta.encoding);
    insert(&mut map, CONTENT_TYPE, &content_type)?;
    for (key, value) in meta.headers.iter() {
        insert_owned(&mut map, key, value)?;
    }
    Ok(map)
}

fn insert_owned(map: &mut MetadataMap, key: &str, value: &str) -> Result<(), Error> {
    let key: tonic::metadata::MetadataKey<_> = key
        .parse()
        .map_err(|_| Error::invalid_argument(format!("invalid header name {key}")))?;
    let value: MetadataValue<_> = value
        .parse()
        .map_err(|_| Error::invalid_argument(format!("invalid header value for {value}")))?;
    map.insert(key, value);
    Ok(())
}

fn get_str<'a>(map: &'a MetadataMap, key: &str) -> Option<&'a str> {
    map.get(key).and_then(|v| v.to_str().ok())
}

/// Extracts an inbound [`RequestMeta`] from `path` and `metadata` (spec §4.8). The encoding is
/// taken from `rpc-encoding` if set, else from the `content-type` subtype suffix.
pub fn extract_inbound_meta(path: &str, metadata: &MetadataMap) -> Result<RequestMeta, Error> {
    let procedure = path_to_procedure(path)?;

    let encoding = get_str(metadata, ENCODING)
        .map(str::to_owned)
        .or_else(|| {
            get_str(metadata, CONTENT_TYPE).and_then(|ct| ct.split_once('+').map(|(_, subtype)| subtype.to_owned()))
        })
        .unwrap_or_default();

    let mut raw_headers = Headers::new();
    let mut skip = vec![
        CALLER,
        SERVICE,
        ENCODING,
        SHARD_KEY,
        ROUTING_KEY,
        ROUTING_DELEGATE,
        CALLER_PROCEDURE,
        CONTENT_TYPE,
        "te",
        "grpc-timeout",
        "grpc-accept-encoding",
        "grpc-encoding",
    ];
    skip.sort_unstable();
    for key_value in metadata.iter() {
        if let tonic::metadata::KeyAndValueRef::Ascii(key, value) = key_value {
            let key_str = key.as_str();
            if skip.binary_search(&key_str).is_ok() {
                continue;
            }
            if let Ok(value_str) = value.to_str() {
                raw_headers.set_unchecked(headers::canonicalize(key_str), value_str.to_owned());
            }
        }
    }
    let (headers, report) = raw_headers.apply_inbound_policy(ReservedPolicy::FilterAndFlag)?;
    if !report.filtered.is_empty() {
        tracing::debug!(filtered = ?report.filtered, "dropped reserved headers from inbound application-header slot");
    }

    let meta = RequestMeta {
        caller: get_str(metadata, CALLER).unwrap_or_default().to_owned(),
        service: get_str(metadata, SERVICE).unwrap_or_default().to_owned(),
        shard_key: get_str(metadata, SHARD_KEY).map(str::to_owned),
        routing_key: get_str(metadata, ROUTING_KEY).map(str::to_owned),
        routing_delegate: get_str(metadata, ROUTING_DELEGATE).map(str::to_owned),
        encoding,
        procedure,
        caller_procedure: get_str(metadata, CALLER_PROCEDURE).map(str::to_owned),
        headers,
    };
    meta.validate()?;
    Ok(meta)
}

/// Builds outbound response metadata from `response` (spec §4.8 "Encode outgoing trailer
/// metadata"). `service` is the responding service name, echoed back for the requester's
/// cross-check (spec §4.7 step 5).
pub fn build_response_metadata(service: &str, response: &crate::request::Response) -> Result<MetadataMap, Error> {
    let mut map = MetadataMap::new();
    insert(&mut map, SERVICE, service)?;
    if response.application_error {
        insert(&mut map, APPLICATION_ERROR, "true")?;
        if let Some(meta) = &response.application_error_meta {
            if !meta.name.is_empty() {
                insert_owned(&mut map, APPLICATION_ERROR_NAME, &meta.name)?;
            }
            if !meta.details.is_empty() {
                insert_owned(&mut map, APPLICATION_ERROR_DETAILS, &meta.details)?;
            }
        }
    }
    for (key, _) in response.headers.iter() {
        if headers::is_reserved(key) {
            return Err(Error::invalid_argument(format!("reserved header {key} may not be set by a handler")));
        }
    }
    for (key, value) in response.headers.iter() {
        insert_owned(&mut map, key, value)?;
    }
    Ok(map)
}

/// Merges stream `headers` (spec §4.9 "Server stream"'s `SendHeaders`/`SetTrailers`) into a
/// terminal trailer `Status`'s metadata. Reserved keys and values that don't survive the round
/// trip through gRPC metadata encoding are dropped with a debug log rather than failing the
/// whole stream, since the handler has already finished by the time trailers are sent.
pub fn apply_trailer_headers(status: &mut Status, headers: &Headers) {
    for (key, value) in headers.iter() {
        if headers::is_reserved(key) {
            tracing::debug!(key, "dropped reserved header from stream trailers");
            continue;
        }
        if insert_owned(status.metadata_mut(), key, value).is_err() {
            tracing::debug!(key, "dropped invalid header from stream trailers");
        }
    }
}

/// Decodes response metadata into `(headers, application_error, application_error_meta)` and
/// cross-checks the responding service name (spec §4.7 steps 4-5).
pub fn decode_response_metadata(
    expected_service: &str,
    metadata: &MetadataMap,
) -> Result<(Headers, bool, Option<crate::request::ApplicationErrorMeta>), Error> {
    if let Some(service) = get_str(metadata, SERVICE) {
        if service != expected_service {
            return Err(Error::internal(format!(
                "response service mismatch: expected {expected_service}, got {service}"
            )));
        }
    }

    let application_error = get_str(metadata, APPLICATION_ERROR).is_some_and(|v| !v.is_empty());
    let application_error_meta = application_error.then(|| crate::request::ApplicationErrorMeta {
        name: get_str(metadata, APPLICATION_ERROR_NAME).unwrap_or_default().to_owned(),
        details: get_str(metadata, APPLICATION_ERROR_DETAILS).unwrap_or_default().to_owned(),
        code: None,
    });

    let mut raw_headers = Headers::new();
    let mut skip = vec![
        SERVICE,
        APPLICATION_ERROR,
        APPLICATION_ERROR_NAME,
        APPLICATION_ERROR_DETAILS,
        ERROR_NAME,
        CONTENT_TYPE,
        "grpc-status",
        "grpc-message",
        "grpc-encoding",
        "grpc-accept-encoding",
    ];
    skip.sort_unstable();
    for key_value in metadata.iter() {
        if let tonic::metadata::KeyAndValueRef::Ascii(key, value) = key_value {
            let key_str = key.as_str();
            if skip.binary_search(&key_str).is_ok() {
                continue;
            }
            if let Ok(value_str) = value.to_str() {
                raw_headers.set_unchecked(headers::canonicalize(key_str), value_str.to_owned());
            }
        }
    }
    let (headers, _report) = raw_headers.apply_inbound_policy(ReservedPolicy::FilterAndFlag)?;
    Ok((headers, application_error, application_error_meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedure_to_path_defaults_unqualified_to_default_service() {
        assert_eq!(procedure_to_path("KeyValue::GetValue"), "/KeyValue/GetValue");
        assert_eq!(procedure_to_path("GetValue"), "/__default__/GetValue");
    }

    #[test]
    fn path_to_procedure_round_trips() {
        assert_eq!(path_to_procedure("/KeyValue/GetValue").unwrap(), "KeyValue::GetValue");
        assert_eq!(path_to_procedure("/__default__/GetValue").unwrap(), "GetValue");
    }

    #[test]
    fn path_to_procedure_rejects_empty_method() {
        assert!(path_to_procedure("/KeyValue/").is_err());
    }

    #[test]
    fn build_outbound_metadata_rejects_reserved_header() {
        let mut meta = RequestMeta {
            caller: "caller".into(),
            service: "svc".into(),
            procedure: "svc::Method".into(),
            encoding: "raw".into(),
            ..Default::default()
        };
        meta.headers.set_unchecked("rpc-caller".into(), "x".into());
        let err = build_outbound_metadata(&meta).unwrap_err();
        assert_eq!(err.code, crate::error::Code::InvalidArgument);
        assert!(err.message.contains("rpc-caller"));
    }

    #[test]
    fn build_outbound_metadata_sets_system_headers() {
        let meta = RequestMeta {
            caller: "caller".into(),
            service: "svc".into(),
            procedure: "svc::Method".into(),
            encoding: "proto".into(),
            ..Default::default()
        };
        let map = build_outbound_metadata(&meta).unwrap();
        assert_eq!(get_str(&map, CALLER), Some("caller"));
        assert_eq!(get_str(&map, CONTENT_TYPE), Some("application/grpc+proto"));
    }
}
