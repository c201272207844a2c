// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Query the agent's operational state as a connectivity check.
// Author: Lukas Bower

use log::info;

use crate::channel::{AgentChannel, CallOptions};
use crate::proto::{GetOperationalStateReply, GetOperationalStateRequest, VerbosityLevel};
use crate::ClientError;

/// Subscription identifier selecting every subscription plus agent-level statistics.
pub const ALL_SUBSCRIPTIONS: u32 = 0xFFFF_FFFF;

/// Build an operational-state request for `scope` at `verbosity`.
#[must_use]
pub fn operational_state_request(scope: u32, verbosity: VerbosityLevel) -> GetOperationalStateRequest {
    GetOperationalStateRequest {
        subscription_id: scope,
        verbosity: verbosity as i32,
    }
}

/// Issue one blocking operational-state query and log the reply.
///
/// No retries: any failure is returned to the caller as-is.
pub fn get_operational_state<C: AgentChannel>(
    channel: &mut C,
    scope: u32,
    verbosity: VerbosityLevel,
    options: &CallOptions,
) -> Result<GetOperationalStateReply, ClientError> {
    let request = operational_state_request(scope, verbosity);
    let reply = channel.get_operational_state(request, options)?;
    info!("{reply:?}");
    Ok(reply)
}
