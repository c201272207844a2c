// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Build, observe and release the gRPC channel to the telemetry agent.
// Author: Lukas Bower

//! Connection manager for the telemetry agent channel.
//!
//! [`ManagedChannel`] wraps a lazily-connecting plaintext tonic channel together with a
//! private current-thread runtime so every operation blocks the caller. The channel keeps
//! its own connectivity state machine because tonic does not expose one.

mod trace_filter;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tonic::codegen::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

pub use trace_filter::{apply_tracing_workaround, TraceHeaderFilter, DEFAULT_TRACING_HEADERS};

use crate::proto::{
    GetOperationalStateReply, GetOperationalStateRequest, OpenConfigData,
    OpenConfigTelemetryClient, SubscriptionRequest,
};
use crate::stream::TelemetryStream;
use crate::ClientError;

/// Lifecycle phase of the transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// Built but no connection attempted yet.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and able to carry calls.
    Ready,
    /// The last attempt or call failed at the transport level.
    TransientFailure,
    /// Released; no further calls are permitted.
    Shutdown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(label)
    }
}

/// Address of the remote telemetry agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// Hostname or IP address.
    pub host: String,
    /// gRPC port.
    pub port: u16,
}

impl DeviceEndpoint {
    /// Construct an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Plaintext URI understood by the transport.
    #[must_use]
    pub fn uri(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Channel construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Strip trace-propagation metadata from every request.
    pub disable_tracing: bool,
    /// Metadata keys removed when `disable_tracing` is set.
    pub tracing_headers: Vec<String>,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Option<Duration>,
    /// HTTP/2 keepalive ping interval.
    pub keepalive_interval: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            disable_tracing: true,
            tracing_headers: DEFAULT_TRACING_HEADERS
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
            connect_timeout: Some(Duration::from_secs(10)),
            keepalive_interval: None,
        }
    }
}

/// Per-call controls for blocking operations.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Maximum time a single call (or a single stream read) may block.
    pub deadline: Option<Duration>,
    /// Token that aborts the blocked call with [`ClientError::Cancelled`].
    pub cancel: CancellationToken,
}

impl CallOptions {
    /// Options bound to the supplied cancellation token, without a deadline.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    /// Attach a per-call deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Operations the run driver needs from a channel to the telemetry agent.
pub trait AgentChannel {
    /// Stream handle returned by [`AgentChannel::subscribe`]; it borrows the channel.
    type Updates<'a>: Iterator<Item = Result<OpenConfigData, ClientError>>
    where
        Self: 'a;

    /// Current connectivity state; an idle channel attempts to connect when asked to.
    fn get_state(&mut self, try_to_connect: bool) -> ConnectivityState;

    /// Whether shutdown has been initiated.
    fn is_shutdown(&self) -> bool;

    /// Whether shutdown has completed and the transport is released.
    fn is_terminated(&self) -> bool;

    /// Whether new calls may be issued.
    fn is_usable(&self) -> bool {
        !self.is_shutdown() && !self.is_terminated()
    }

    /// Issue the unary operational-state query.
    fn get_operational_state(
        &mut self,
        request: GetOperationalStateRequest,
        options: &CallOptions,
    ) -> Result<GetOperationalStateReply, ClientError>;

    /// Open a subscription and return its single stream handle.
    fn subscribe(
        &mut self,
        request: SubscriptionRequest,
        options: &CallOptions,
    ) -> Result<Self::Updates<'_>, ClientError>;

    /// Release the channel. Later calls are no-ops.
    fn shutdown(&mut self);
}

type AgentClient = OpenConfigTelemetryClient<InterceptedService<Channel, TraceHeaderFilter>>;

/// Blocking channel to one telemetry agent.
pub struct ManagedChannel {
    device: DeviceEndpoint,
    endpoint: Endpoint,
    filter: TraceHeaderFilter,
    client: Option<AgentClient>,
    state: ConnectivityState,
    cancel: CancellationToken,
    runtime: Runtime,
}

impl fmt::Debug for ManagedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedChannel")
            .field("device", &self.device)
            .field("state", &self.state)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl ManagedChannel {
    /// Build a lazily-connecting plaintext channel to `device`.
    ///
    /// The tracing workaround is resolved first; nothing touches the network here.
    pub fn connect(device: &DeviceEndpoint, options: &ConnectOptions) -> Result<Self, ClientError> {
        let filter = apply_tracing_workaround(options)?;
        let uri = device.uri();
        let mut endpoint = Endpoint::from_shared(uri.clone()).map_err(|err| {
            ClientError::configuration(format!("invalid agent endpoint {uri}: {err}"))
        })?;
        if let Some(timeout) = options.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(interval) = options.keepalive_interval {
            endpoint = endpoint
                .http2_keep_alive_interval(interval)
                .keep_alive_while_idle(true);
        }
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let channel = {
            let _guard = runtime.enter();
            endpoint.connect_lazy()
        };
        info!("built plaintext channel to {device}");
        let client = OpenConfigTelemetryClient::new(InterceptedService::new(channel, filter.clone()));
        Ok(Self {
            device: device.clone(),
            endpoint,
            filter,
            client: Some(client),
            state: ConnectivityState::Idle,
            cancel: CancellationToken::new(),
            runtime,
        })
    }

    /// Abandon in-flight connection attempts when `token` fires.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Agent address this channel targets.
    #[must_use]
    pub fn device(&self) -> &DeviceEndpoint {
        &self.device
    }

    /// Cancel `token` when the process receives Ctrl-C.
    ///
    /// The watcher runs on the channel runtime, so it is serviced while a call is blocked.
    pub fn cancel_on_interrupt(&self, token: CancellationToken) {
        self.runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling active call");
                token.cancel();
            }
        });
    }

    fn usable_client(&self) -> Result<AgentClient, ClientError> {
        if !self.is_usable() {
            return Err(ClientError::Connectivity { state: self.state });
        }
        self.client
            .clone()
            .ok_or(ClientError::Connectivity { state: self.state })
    }
}

impl AgentChannel for ManagedChannel {
    type Updates<'a> = TelemetryStream<'a>;

    fn get_state(&mut self, try_to_connect: bool) -> ConnectivityState {
        if try_to_connect && self.state == ConnectivityState::Idle {
            transition(&mut self.state, ConnectivityState::Connecting);
            let options = CallOptions::new(self.cancel.clone());
            let endpoint = &self.endpoint;
            let attempt = self.runtime.block_on(guarded(&options, async {
                endpoint.connect().await.map_err(|err| ClientError::Rpc {
                    code: Code::Unavailable,
                    message: format!("{err:?}"),
                })
            }));
            match attempt {
                Ok(channel) => {
                    self.client = Some(OpenConfigTelemetryClient::new(InterceptedService::new(
                        channel,
                        self.filter.clone(),
                    )));
                    transition(&mut self.state, ConnectivityState::Ready);
                }
                Err(ClientError::Cancelled) => {
                    warn!("connection attempt to {} cancelled", self.device);
                    transition(&mut self.state, ConnectivityState::Idle);
                }
                Err(err) => {
                    warn!("connection attempt to {} failed: {err}", self.device);
                    transition(&mut self.state, ConnectivityState::TransientFailure);
                }
            }
        }
        self.state
    }

    fn is_shutdown(&self) -> bool {
        self.state == ConnectivityState::Shutdown
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.client.is_none()
    }

    fn get_operational_state(
        &mut self,
        request: GetOperationalStateRequest,
        options: &CallOptions,
    ) -> Result<GetOperationalStateReply, ClientError> {
        let mut client = self.usable_client()?;
        let outcome = self.runtime.block_on(guarded(options, async move {
            client
                .get_telemetry_operational_state(request)
                .await
                .map(tonic::Response::into_inner)
                .map_err(ClientError::from)
        }));
        observe(&mut self.state, &outcome);
        outcome
    }

    fn subscribe(
        &mut self,
        request: SubscriptionRequest,
        options: &CallOptions,
    ) -> Result<Self::Updates<'_>, ClientError> {
        let mut client = self.usable_client()?;
        let paths = request.path_list.len();
        let outcome = self.runtime.block_on(guarded(options, async move {
            client
                .telemetry_subscribe(request)
                .await
                .map(tonic::Response::into_inner)
                .map_err(ClientError::from)
        }));
        observe(&mut self.state, &outcome);
        let updates = outcome?;
        info!("subscribed to {paths} sensor path(s) on {}", self.device);
        Ok(TelemetryStream::new(
            &self.runtime,
            &mut self.state,
            updates,
            options.clone(),
        ))
    }

    fn shutdown(&mut self) {
        if self.state == ConnectivityState::Shutdown {
            debug!("channel to {} already shut down", self.device);
            return;
        }
        self.client = None;
        transition(&mut self.state, ConnectivityState::Shutdown);
        info!("channel to {} shut down", self.device);
    }
}

fn transition(state: &mut ConnectivityState, next: ConnectivityState) {
    if *state != next {
        info!("connectivity state {state} -> {next}");
        *state = next;
    }
}

/// Fold a call or stream-read outcome into the observed connectivity state.
pub(crate) fn observe<T>(state: &mut ConnectivityState, outcome: &Result<T, ClientError>) {
    if *state == ConnectivityState::Shutdown {
        return;
    }
    match outcome {
        Ok(_) => transition(state, ConnectivityState::Ready),
        Err(ClientError::Rpc {
            code: Code::Unavailable,
            ..
        }) => transition(state, ConnectivityState::TransientFailure),
        Err(_) => {}
    }
}

/// Bound `call` by the deadline and cancellation token in `options`.
pub(crate) async fn guarded<T, F>(options: &CallOptions, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    let bounded = async {
        match options.deadline {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(ClientError::deadline(limit))),
            None => call.await,
        }
    };
    tokio::select! {
        biased;
        _ = options.cancel.cancelled() => Err(ClientError::Cancelled),
        result = bounded => result,
    }
}
