// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the error taxonomy shared by the telemetry client.
// Author: Lukas Bower

use std::time::Duration;

use thiserror::Error;
use tonic::{Code, Status};

use crate::channel::ConnectivityState;

/// Errors surfaced by the connection manager, the prober and the stream consumer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The channel could not be configured (tracing workaround or endpoint).
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The channel was shut down or terminated before any work began.
    #[error("channel is not usable (state {state})")]
    Connectivity {
        /// Connectivity state observed when the channel was rejected.
        state: ConnectivityState,
    },
    /// Transport or agent failure reported for a call or a stream read.
    #[error("rpc failed with {code:?}: {message}")]
    Rpc {
        /// gRPC status code.
        code: Code,
        /// Status message supplied by the transport or the agent.
        message: String,
    },
    /// The caller's cancellation token fired while a call was blocked.
    #[error("operation cancelled")]
    Cancelled,
    /// The private runtime backing the blocking calls could not be created.
    #[error("failed to start channel runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ClientError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn deadline(limit: Duration) -> Self {
        Self::Rpc {
            code: Code::DeadlineExceeded,
            message: format!("no response within {} ms", limit.as_millis()),
        }
    }

    /// Return the gRPC status code for RPC failures.
    #[must_use]
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        Self::Rpc {
            code: status.code(),
            message: status.message().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_rpc_error() {
        let err = ClientError::from(Status::unavailable("EOF"));
        assert_eq!(err.code(), Some(Code::Unavailable));
        assert!(err.to_string().contains("EOF"));
    }

    #[test]
    fn deadline_reports_limit() {
        let err = ClientError::deadline(Duration::from_millis(250));
        assert_eq!(err.code(), Some(Code::DeadlineExceeded));
        assert!(err.to_string().contains("250 ms"));
    }
}
