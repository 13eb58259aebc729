// Copyright 2024. The Tari Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
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

//! Ordered, case-insensitive header multimap with the reserved-key policy from spec §4.1.

use crate::error::{Code, Error};

/// Returns the canonical (lowercased) form of a header key.
pub fn canonicalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

/// `rpc-load` is the one `rpc-*` key applications are allowed to set directly.
const ALLOWED_RESERVED_PREFIX_EXCEPTION: &str = "rpc-load";

/// True if `canonical_key` is reserved for transport use and may not be set through the
/// application-header API (spec §3 invariant, §4.1).
pub fn is_reserved(canonical_key: &str) -> bool {
    if canonical_key == ALLOWED_RESERVED_PREFIX_EXCEPTION {
        return false;
    }
    canonical_key.starts_with("rpc-") || is_escape_hatch(canonical_key)
}

/// `$rpc$-<*>` keys are a negotiated escape hatch: permitted, but observable in telemetry.
pub fn is_escape_hatch(canonical_key: &str) -> bool {
    canonical_key.starts_with("$rpc$-")
}

/// Bytes that may never appear in a header value (spec §4.1).
fn has_invalid_byte(value: &str) -> bool {
    value.bytes().any(|b| matches!(b, 0x00 | 0x0A | 0x0D))
}

/// An ordered, case-insensitive-keyed multimap of header values.
///
/// Keys are canonicalised to lowercase on insertion; iteration preserves insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

/// Whether reserved-key violations are rejected (outbound default) or merely filtered with
/// a telemetry flag (inbound default, unless strict mode is requested - spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedPolicy {
    Reject,
    FilterAndFlag,
    FilterStrict,
}

/// The outcome of applying a [`ReservedPolicy`] to an inbound header set.
#[derive(Debug, Default)]
pub struct FilterReport {
    pub filtered: Vec<String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets an application header. Rejects reserved keys and invalid byte content with
    /// `InvalidArgument`, per spec §4.1's outbound rule.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), Error> {
        let canonical = canonicalize(key);
        if is_reserved(&canonical) {
            return Err(Error::invalid_argument(format!(
                "header {canonical} is reserved and cannot be set by application code"
            )));
        }
        let value = value.into();
        if has_invalid_byte(&value) {
            return Err(Error::invalid_argument(format!(
                "header {canonical} contains an invalid byte"
            )));
        }
        self.set_unchecked(canonical, value);
        Ok(())
    }

    /// Inserts without the reserved-key check. Used internally by transports to emit
    /// system headers (`rpc-caller`, etc.) onto the wire.
    pub fn set_unchecked(&mut self, canonical_key: impl Into<String>, value: impl Into<String>) {
        let canonical_key = canonical_key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == canonical_key) {
            entry.1 = value;
        } else {
            self.entries.push((canonical_key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let canonical = canonicalize(key);
        self.entries
            .iter()
            .find(|(k, _)| *k == canonical)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let canonical = canonicalize(key);
        let idx = self.entries.iter().position(|(k, _)| *k == canonical)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Filters reserved/escape-hatch keys out of an inbound set according to `policy`,
    /// returning the surviving headers and a report of what was dropped (spec §4.1,
    /// §4.8's "reserved-key rejection applies" on the outgoing trailer path too).
    pub fn apply_inbound_policy(self, policy: ReservedPolicy) -> Result<(Self, FilterReport), Error> {
        let mut kept = Headers::new();
        let mut report = FilterReport::default();
        for (key, value) in self.entries {
            if is_reserved(&key) && !is_escape_hatch(&key) {
                match policy {
                    ReservedPolicy::Reject => {
                        return Err(Error::invalid_argument(format!(
                            "reserved header {key} present in application headers"
                        )));
                    },
                    ReservedPolicy::FilterStrict => {
                        return Err(Error::invalid_argument(format!(
                            "reserved header {key} present in application headers (strict mode)"
                        )));
                    },
                    ReservedPolicy::FilterAndFlag => {
                        report.filtered.push(key);
                        continue;
                    },
                }
            }
            kept.set_unchecked(key, value);
        }
        Ok((kept, report))
    }

    /// Validates every value for the forbidden-byte rule (spec §4.1), independent of the
    /// reserved-key check - used just before handing headers to a transport encoder.
    pub fn validate_values(&self) -> Result<(), Error> {
        for (key, value) in &self.entries {
            if has_invalid_byte(value) {
                return Err(Error::new(
                    Code::InvalidArgument,
                    format!("header {key} contains an invalid byte"),
                ));
            }
        }
        Ok(())
    }
}

impl IntoIterator for Headers {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set_unchecked(canonicalize(&k), v);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_canonicalised_on_storage() {
        let mut headers = Headers::new();
        headers.set("X-Custom", "v").unwrap();
        assert_eq!(headers.get("x-custom"), Some("v"));
        assert_eq!(headers.iter().next().unwrap().0, "x-custom");
    }

    #[test]
    fn reserved_keys_are_rejected_on_set_except_rpc_load() {
        let mut headers = Headers::new();
        let err = headers.set("rpc-caller", "x").unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(err.message.contains("rpc-caller"));

        headers.set("rpc-load", "0.5").unwrap();
        assert_eq!(headers.get("rpc-load"), Some("0.5"));
    }

    #[test]
    fn invalid_bytes_are_rejected() {
        let mut headers = Headers::new();
        let err = headers.set("x", "bad\0value").unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
    }

    #[test]
    fn inbound_filter_and_flag_drops_reserved_but_keeps_escape_hatch() {
        let mut raw = Headers::new();
        raw.set_unchecked("rpc-caller", "evil");
        raw.set_unchecked("$rpc$-trace", "abc");
        raw.set_unchecked("x-app", "v");

        let (kept, report) = raw.apply_inbound_policy(ReservedPolicy::FilterAndFlag).unwrap();
        assert_eq!(report.filtered, vec!["rpc-caller".to_string()]);
        assert!(kept.contains_key("$rpc$-trace"));
        assert!(kept.contains_key("x-app"));
        assert!(!kept.contains_key("rpc-caller"));
    }

    #[test]
    fn inbound_strict_policy_errors_on_reserved_key() {
        let mut raw = Headers::new();
        raw.set_unchecked("rpc-caller", "evil");
        let err = raw.apply_inbound_policy(ReservedPolicy::FilterStrict).unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
    }
}
