// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Strip trace-propagation metadata that telemetry agents fail to parse.
// Author: Lukas Bower

//! Tracing workaround for agents that abort streams carrying trace metadata.
//!
//! Some agent builds reset the HTTP/2 stream (surfacing as `UNAVAILABLE: EOF`) when a
//! request carries census or W3C trace-context headers. The client does not emit these on
//! its own, but layers stacked on the channel may. The filter is installed as a request
//! interceptor so the workaround stays in this one module.

use log::{debug, info};
use tonic::metadata::{AsciiMetadataKey, BinaryMetadataKey};
use tonic::service::Interceptor;
use tonic::{Request, Status};

use super::ConnectOptions;
use crate::ClientError;

/// Trace-propagation headers removed when tracing is disabled.
pub const DEFAULT_TRACING_HEADERS: [&str; 4] =
    ["grpc-trace-bin", "grpc-tags-bin", "traceparent", "tracestate"];

#[derive(Debug, Clone)]
enum TraceHeader {
    Ascii(AsciiMetadataKey),
    Binary(BinaryMetadataKey),
}

impl TraceHeader {
    fn parse(name: &str) -> Result<Self, ClientError> {
        let normalized = name.trim().to_ascii_lowercase();
        let parsed = if normalized.ends_with("-bin") {
            BinaryMetadataKey::from_bytes(normalized.as_bytes()).map(Self::Binary)
        } else {
            AsciiMetadataKey::from_bytes(normalized.as_bytes()).map(Self::Ascii)
        };
        parsed.map_err(|err| {
            ClientError::configuration(format!("invalid tracing header '{name}': {err}"))
        })
    }

    fn as_str(&self) -> &str {
        match self {
            Self::Ascii(key) => key.as_str(),
            Self::Binary(key) => key.as_str(),
        }
    }
}

/// Request interceptor removing the configured trace headers.
#[derive(Debug, Clone, Default)]
pub struct TraceHeaderFilter {
    headers: Vec<TraceHeader>,
}

impl TraceHeaderFilter {
    /// Return `true` when the filter leaves requests untouched.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.headers.is_empty()
    }

    /// Names of the headers removed from each request.
    #[must_use]
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(TraceHeader::as_str).collect()
    }
}

impl Interceptor for TraceHeaderFilter {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let metadata = request.metadata_mut();
        for header in &self.headers {
            let removed = match header {
                TraceHeader::Ascii(key) => metadata.remove(key).is_some(),
                TraceHeader::Binary(key) => metadata.remove_bin(key).is_some(),
            };
            if removed {
                debug!("stripped tracing header {}", header.as_str());
            }
        }
        Ok(request)
    }
}

/// Resolve the tracing workaround for the supplied options.
///
/// Fails with [`ClientError::Configuration`] when tracing is disabled but the header list
/// is empty or names something that is not a valid gRPC metadata key.
pub fn apply_tracing_workaround(options: &ConnectOptions) -> Result<TraceHeaderFilter, ClientError> {
    if !options.disable_tracing {
        debug!("tracing workaround not requested; requests pass through unchanged");
        return Ok(TraceHeaderFilter::default());
    }
    if options.tracing_headers.is_empty() {
        return Err(ClientError::configuration(
            "tracing is disabled but no tracing headers are configured",
        ));
    }
    let headers = options
        .tracing_headers
        .iter()
        .map(|name| TraceHeader::parse(name))
        .collect::<Result<Vec<_>, _>>()?;
    let filter = TraceHeaderFilter { headers };
    info!(
        "tracing disabled: stripping [{}] from outgoing requests",
        filter.header_names().join(", ")
    );
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    fn options(headers: &[&str]) -> ConnectOptions {
        ConnectOptions {
            tracing_headers: headers.iter().map(|h| (*h).to_owned()).collect(),
            ..ConnectOptions::default()
        }
    }

    #[test]
    fn default_headers_resolve() {
        let filter = apply_tracing_workaround(&ConnectOptions::default()).unwrap();
        assert_eq!(filter.header_names(), DEFAULT_TRACING_HEADERS.to_vec());
    }

    #[test]
    fn interceptor_strips_trace_metadata_only() {
        let mut filter = apply_tracing_workaround(&options(&["grpc-trace-bin", "traceparent"])).unwrap();
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert_bin("grpc-trace-bin", MetadataValue::from_bytes(b"\x00\x01"));
        request
            .metadata_mut()
            .insert("traceparent", MetadataValue::from_static("00-abc-def-01"));
        request
            .metadata_mut()
            .insert("x-device", MetadataValue::from_static("ge-0/0/0"));

        let request = filter.call(request).unwrap();
        let metadata = request.metadata();
        assert!(metadata.get_bin("grpc-trace-bin").is_none());
        assert!(metadata.get("traceparent").is_none());
        assert!(metadata.get("x-device").is_some());
    }

    #[test]
    fn empty_header_list_is_rejected() {
        let err = apply_tracing_workaround(&options(&[])).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let err = apply_tracing_workaround(&options(&["trace parent"])).unwrap_err();
        assert!(err.to_string().contains("trace parent"));
    }

    #[test]
    fn tracing_enabled_installs_passthrough() {
        let opts = ConnectOptions {
            disable_tracing: false,
            tracing_headers: Vec::new(),
            ..ConnectOptions::default()
        };
        assert!(apply_tracing_workaround(&opts).unwrap().is_passthrough());
    }
}
