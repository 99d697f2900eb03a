//! Shared fixtures for app integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use tally_app::{RuntimeConfig, SessionRuntime};
use tally_core::Snapshot;
use tally_gateway::{BackendRequest, GatewayError, GatewayTransport, TransportResponse};

/// Transport that replays a scripted response queue and records request URLs.
#[allow(dead_code)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, GatewayError>>>,
    requests: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queues one successful response.
    pub fn push_ok(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .expect("response queue lock should work")
            .push_back(Ok(TransportResponse {
                status,
                body: body.as_bytes().to_vec(),
            }));
    }

    /// Queues one network-level failure.
    pub fn push_unreachable(&self, reason: &str) {
        self.responses
            .lock()
            .expect("response queue lock should work")
            .push_back(Err(GatewayError::NetworkUnreachable(reason.to_string())));
    }

    /// Returns every request URL seen so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("request log lock should work")
            .clone()
    }
}

impl GatewayTransport for ScriptedTransport {
    fn execute(&self, request: &BackendRequest) -> Result<TransportResponse, GatewayError> {
        self.requests
            .lock()
            .expect("request log lock should work")
            .push(request.url.clone());
        self.responses
            .lock()
            .expect("response queue lock should work")
            .pop_front()
            .unwrap_or_else(|| {
                Err(GatewayError::NetworkUnreachable(
                    "scripted responses exhausted".to_string(),
                ))
            })
    }
}

/// Builds a runtime over the scripted transport with reference defaults.
#[allow(dead_code)]
pub fn runtime_with(transport: Arc<ScriptedTransport>) -> SessionRuntime {
    SessionRuntime::new(&RuntimeConfig::new("http://127.0.0.1:5000"), transport)
        .expect("runtime should build")
}

/// Builds a snapshot fixture from class/quantity pairs.
#[allow(dead_code)]
pub fn snapshot(count: u64, pairs: &[(&str, u64)]) -> Snapshot {
    let mut summary = BTreeMap::new();
    for (name, quantity) in pairs {
        summary.insert((*name).to_string(), *quantity);
    }
    Snapshot::new(count, summary).expect("snapshot fixture should build")
}
