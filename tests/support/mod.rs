// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: In-process telemetry agent used by the integration tests.
// Author: Lukas Bower

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use oc_telemetry::proto::key_value::Value;
use oc_telemetry::proto::{
    GetOperationalStateReply, GetOperationalStateRequest, KeyValue, OpenConfigData,
    OpenConfigTelemetry, OpenConfigTelemetryServer, SubscriptionRequest,
};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::{Stream, StreamExt};
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};

type UpdateStream = Pin<Box<dyn Stream<Item = Result<OpenConfigData, Status>> + Send>>;

/// Gap between items of a stream that ends in an error, so the updates reach the client first.
const FAILING_STREAM_PACE: Duration = Duration::from_millis(20);

/// How the scripted subscription stream ends.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// Close the stream cleanly.
    Close,
    /// Terminate the stream with a status.
    Fail(Code, String),
    /// Keep the stream open without sending anything more.
    Hang,
}

/// Behaviour of the fake agent.
#[derive(Debug, Clone)]
pub struct AgentScript {
    pub reply: GetOperationalStateReply,
    pub updates: Vec<OpenConfigData>,
    pub end: StreamEnd,
}

impl AgentScript {
    pub fn streaming(count: u64, end: StreamEnd) -> Self {
        Self {
            reply: operational_reply(),
            updates: (1..=count).map(update).collect(),
            end,
        }
    }
}

/// Calls observed by the fake agent.
#[derive(Debug, Default)]
pub struct AgentRecord {
    pub subscribe_calls: AtomicUsize,
    pub state_queries: Mutex<Vec<GetOperationalStateRequest>>,
    pub subscriptions: Mutex<Vec<SubscriptionRequest>>,
}

impl AgentRecord {
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

pub fn operational_reply() -> GetOperationalStateReply {
    GetOperationalStateReply {
        kv: vec![
            kv("subscription_id", Value::UintValue(1)),
            kv("state", Value::StrValue("active".to_owned())),
            kv("total_packets", Value::UintValue(42)),
        ],
    }
}

pub fn update(seq: u64) -> OpenConfigData {
    OpenConfigData {
        system_id: "mx960".to_owned(),
        component_id: 1,
        path: "/interfaces/interface[name='ge-0/0/0']/state/".to_owned(),
        sequence_number: seq,
        timestamp: 1_554_200_000_000 + seq,
        kv: vec![kv("oper-status", Value::StrValue("UP".to_owned()))],
        ..OpenConfigData::default()
    }
}

fn kv(key: &str, value: Value) -> KeyValue {
    KeyValue {
        key: key.to_owned(),
        value: Some(value),
    }
}

#[derive(Clone)]
struct AgentService {
    script: Arc<AgentScript>,
    record: Arc<AgentRecord>,
}

#[tonic::async_trait]
impl OpenConfigTelemetry for AgentService {
    type telemetrySubscribeStream = UpdateStream;

    async fn telemetry_subscribe(
        &self,
        request: Request<SubscriptionRequest>,
    ) -> Result<Response<Self::telemetrySubscribeStream>, Status> {
        self.record.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.record
            .subscriptions
            .lock()
            .expect("subscription record lock")
            .push(request.into_inner());
        let updates = self.script.updates.clone();
        let head = tokio_stream::iter(updates.into_iter().map(Ok::<_, Status>));
        let stream: UpdateStream = match &self.script.end {
            StreamEnd::Close => Box::pin(head),
            StreamEnd::Fail(code, message) => Box::pin(
                head.chain(tokio_stream::once(Err(Status::new(*code, message.clone()))))
                    .throttle(FAILING_STREAM_PACE),
            ),
            StreamEnd::Hang => Box::pin(head.chain(tokio_stream::pending())),
        };
        Ok(Response::new(stream))
    }

    async fn get_telemetry_operational_state(
        &self,
        request: Request<GetOperationalStateRequest>,
    ) -> Result<Response<GetOperationalStateReply>, Status> {
        self.record
            .state_queries
            .lock()
            .expect("state query record lock")
            .push(request.into_inner());
        Ok(Response::new(self.script.reply.clone()))
    }
}

/// Fake agent served on an ephemeral loopback port.
pub struct FakeAgent {
    pub addr: SocketAddr,
    pub record: Arc<AgentRecord>,
    shutdown: Option<oneshot::Sender<()>>,
    runtime: Option<Runtime>,
}

impl FakeAgent {
    pub fn start(script: AgentScript) -> Self {
        let runtime = Runtime::new().expect("agent runtime");
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind agent listener");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("agent address");
        let incoming = {
            let _guard = runtime.enter();
            TcpListenerStream::new(
                tokio::net::TcpListener::from_std(listener).expect("tokio listener"),
            )
        };
        let record = Arc::new(AgentRecord::default());
        let service = AgentService {
            script: Arc::new(script),
            record: Arc::clone(&record),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        runtime.spawn(
            Server::builder()
                .add_service(OpenConfigTelemetryServer::new(service))
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                }),
        );
        Self {
            addr,
            record,
            shutdown: Some(shutdown_tx),
            runtime: Some(runtime),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Port on loopback with nothing listening.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind scratch listener");
    let port = listener.local_addr().expect("scratch address").port();
    drop(listener);
    port
}
