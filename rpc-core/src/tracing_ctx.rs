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

//! OpenTracing-style span propagation across a call boundary (spec §4.8, §9), built on
//! `tracing::Span` rather than a concrete OpenTracing/OpenTelemetry exporter - this crate emits
//! spans and events, it does not ship the excluded "concrete metrics/tracing adaptor".
//!
//! A span context crosses the wire as a handful of `rpc-tracing-*` headers, read and written
//! case-insensitively through the same [`Headers`] carrier every other metadata goes through.

use crate::error::Error;
use crate::headers::Headers;

const TRACE_ID: &str = "rpc-tracing-trace-id";
const SPAN_ID: &str = "rpc-tracing-span-id";
const SAMPLED: &str = "rpc-tracing-sampled";

/// The minimal OpenTracing-style span context carried across a call: a trace id, the calling
/// span's id (this call's span becomes its child), and a sampling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub sampled: bool,
}

impl SpanContext {
    pub fn new_root(trace_id: impl Into<String>, sampled: bool) -> Self {
        Self {
            trace_id: trace_id.into(),
            parent_span_id: None,
            sampled,
        }
    }

    /// Reads a span context out of inbound headers (spec §4.8: case-folded, via the same
    /// canonicalised carrier as every other header). Returns `None` when no trace id is
    /// present - the call starts its own root span.
    pub fn extract(headers: &Headers) -> Option<Self> {
        let trace_id = headers.get(TRACE_ID)?.to_owned();
        let parent_span_id = headers.get(SPAN_ID).map(str::to_owned);
        let sampled = headers.get(SAMPLED).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(true);
        Some(Self { trace_id, parent_span_id, sampled })
    }

    /// Writes this context into outbound headers for propagation to the next hop.
    pub fn inject(&self, headers: &mut Headers) {
        headers.set_unchecked(TRACE_ID.to_owned(), self.trace_id.clone());
        if let Some(span_id) = &self.parent_span_id {
            headers.set_unchecked(SPAN_ID.to_owned(), span_id.clone());
        }
        headers.set_unchecked(SAMPLED.to_owned(), if self.sampled { "1" } else { "0" }.to_owned());
    }
}

/// Opens a `tracing::Span` for one dispatch and guarantees it is closed (entered-then-exited)
/// on every exit path, including panics unwinding through the dispatch boundary (spec §9:
/// "scoped tracing spans with guaranteed finish via an RAII guard").
pub struct SpanGuard {
    span: tracing::Span,
}

impl SpanGuard {
    /// Opens a span named `procedure`, recording the inbound/outbound span context as fields.
    /// Use [`SpanGuard::in_scope`] to run dispatch code inside it - `tracing::Span::in_scope`
    /// already guarantees the span is exited on every return path, panics included, so there is
    /// no separate `finish()` to forget.
    pub fn open(procedure: &str, service: &str, context: Option<&SpanContext>) -> Self {
        let span = tracing::info_span!(
            "rpc.dispatch",
            procedure = %procedure,
            service = %service,
            trace_id = context.map(|c| c.trace_id.as_str()).unwrap_or(""),
        );
        Self { span }
    }

    /// Runs `f` with this span entered, matching `tracing::Span::in_scope`'s guarantee that the
    /// span is exited even if `f` panics.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.span.in_scope(f)
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Records a terminal error on this span before it closes (spec §4.9 close sequence:
    /// "update the tracing span with the terminal error").
    pub fn record_error(&self, err: &Error) {
        self.span
            .in_scope(|| tracing::error!(code = ?err.code, message = %err.message, "stream closed with error"));
    }

    /// Finishes the span. A `SpanGuard` closes its span on drop regardless, but calling this
    /// explicitly at a close sequence's "finish the span" step documents intent at the call site.
    pub fn finish(self) {}
}
