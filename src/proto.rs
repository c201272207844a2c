// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Generated protobuf messages and gRPC bindings for the telemetry agent.
// Author: Lukas Bower

//! Subset of the `telemetry.OpenConfigTelemetry` agent contract, generated from
//! `proto/agent.proto`.

/// Generated gRPC bindings for the telemetry agent service.
#[allow(clippy::all, missing_docs)]
pub mod generated {
    tonic::include_proto!("telemetry");
}

pub use generated::open_config_telemetry_client::OpenConfigTelemetryClient;
pub use generated::open_config_telemetry_server::{
    OpenConfigTelemetry, OpenConfigTelemetryServer,
};
pub use generated::*;
