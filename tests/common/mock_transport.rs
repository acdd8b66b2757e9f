//! Scripted transport for engine tests
//!
//! Responses are taken from a script in order. Once the script is empty the
//! transport either fails every call (`fail_always`) or acknowledges every
//! update it was sent. A gate can hold requests in flight until released.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use watchsync::shared::{ProgressRecord, SyncRequest, SyncResponse, TransportError};
use watchsync::sync::SyncTransport;

/// Server clock reported by acknowledging responses
pub const SERVER_TIME_BASE: i64 = 50_000;

#[derive(Debug)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<SyncResponse, TransportError>>>,
    failure: Mutex<Option<TransportError>>,
    requests: Mutex<Vec<SyncRequest>>,
    items: Mutex<HashMap<String, ProgressRecord>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    calls: watch::Sender<usize>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            items: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            calls: watch::channel(0).0,
        })
    }

    /// Queue a response for the next unscripted call
    pub fn push_response(&self, response: Result<SyncResponse, TransportError>) {
        self.script.lock().unwrap().push_back(response);
    }

    /// Fail every call once the script is used up
    pub fn fail_always(&self, error: TransportError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Go back to acknowledging everything
    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Server copy returned by `fetch_item`
    pub fn put_item(&self, record: ProgressRecord) {
        self.items
            .lock()
            .unwrap()
            .insert(record.item_id.clone(), record);
    }

    /// Hold every following sync request until `release` is called
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held requests through
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Number of sync calls received so far
    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    /// Wait until at least `n` sync calls have arrived
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        rx.wait_for(|calls| *calls >= n).await.unwrap();
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Item ids of request `index`
    pub fn sent_items(&self, index: usize) -> Vec<String> {
        self.requests.lock().unwrap()[index]
            .updates
            .iter()
            .map(|r| r.item_id.clone())
            .collect()
    }

    fn next_response(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(ack_all(request, SERVER_TIME_BASE + self.calls() as i64))
    }
}

/// Response acknowledging every update in `request`
pub fn ack_all(request: &SyncRequest, server_timestamp: i64) -> SyncResponse {
    SyncResponse::success(
        request.updates.iter().map(|r| r.item_id.clone()).collect(),
        server_timestamp,
    )
}

impl SyncTransport for MockTransport {
    fn sync<'a>(
        &'a self,
        request: &'a SyncRequest,
    ) -> BoxFuture<'a, Result<SyncResponse, TransportError>> {
        async move {
            self.requests.lock().unwrap().push(request.clone());
            self.calls.send_modify(|calls| *calls += 1);

            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            self.next_response(request)
        }
        .boxed()
    }

    fn fetch_item<'a>(
        &'a self,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<ProgressRecord, TransportError>> {
        async move {
            self.items
                .lock()
                .unwrap()
                .get(item_id)
                .cloned()
                .ok_or(TransportError::Http {
                    status: 404,
                    body: format!("no progress for {}", item_id),
                })
        }
        .boxed()
    }
}
