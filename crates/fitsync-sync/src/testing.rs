// ABOUTME: In-memory stand-in for the REST backend, for tests of the facade, drainer, and monitor.
// ABOUTME: Records every call in order, assigns server ids on create, and can inject scripted failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use fitsync_core::HttpMethod;
use serde_json::{Value, json};

use crate::remote::{RemoteApi, RemoteError};

/// One request seen by the fake backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub method: String,
    pub endpoint: String,
    pub payload: Option<Value>,
}

#[derive(Default)]
struct FakeState {
    collections: HashMap<String, Vec<Value>>,
    calls: Vec<RemoteCall>,
    scripted: VecDeque<RemoteError>,
    failing: Vec<(String, RemoteError)>,
    unreachable: bool,
    next_id: u64,
}

/// A tiny REST server held in memory. Collections live at endpoints such as
/// `/workouts`; individual records at `/workouts/{id}`. Server ids are
/// integers starting at 1000.
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 1000,
                ..FakeState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the records served at `endpoint`.
    pub fn seed(&self, endpoint: &str, records: Vec<Value>) {
        self.lock().collections.insert(endpoint.to_string(), records);
    }

    /// Current server-side records at `endpoint`.
    pub fn records(&self, endpoint: &str) -> Vec<Value> {
        self.lock()
            .collections
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Fail the next call, whatever it is, with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().scripted.push_back(error);
    }

    /// Fail every call whose endpoint starts with `prefix` until cleared.
    pub fn fail_endpoint(&self, prefix: &str, error: RemoteError) {
        self.lock().failing.push((prefix.to_string(), error));
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.scripted.clear();
        state.failing.clear();
    }

    /// Refuse every call with a connection error, as if the network is gone.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    fn handle(
        &self,
        method: &str,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            payload: payload.cloned(),
        });

        if state.unreachable {
            return Err(RemoteError::Connection("network unreachable".to_string()));
        }
        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }
        if let Some((_, error)) = state
            .failing
            .iter()
            .find(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
        {
            return Err(error.clone());
        }

        match method {
            "GET" => state.get(endpoint),
            "POST" => Ok(state.create(endpoint, payload)),
            "PUT" => state.update(endpoint, payload),
            "DELETE" => state.delete(endpoint),
            other => Err(RemoteError::Client {
                status: 405,
                body: format!("{} not allowed", other),
            }),
        }
    }
}

impl FakeState {
    fn get(&self, endpoint: &str) -> Result<Value, RemoteError> {
        if let Some(records) = self.collections.get(endpoint) {
            return Ok(Value::Array(records.clone()));
        }
        match split(endpoint) {
            Some((base, id)) if self.collections.contains_key(base) => self
                .collections
                .get(base)
                .and_then(|records| records.iter().find(|r| id_of(r).as_deref() == Some(id)))
                .cloned()
                .ok_or_else(|| not_found(endpoint)),
            _ => Ok(json!([])),
        }
    }

    fn create(&mut self, endpoint: &str, payload: Option<&Value>) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        let mut record = payload.cloned().unwrap_or_else(|| json!({}));
        if let Value::Object(object) = &mut record {
            object.insert("id".to_string(), json!(id));
        }
        self.collections
            .entry(endpoint.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    fn update(&mut self, endpoint: &str, payload: Option<&Value>) -> Result<Value, RemoteError> {
        let (base, id) = split(endpoint).ok_or_else(|| not_found(endpoint))?;
        let record = self
            .collections
            .get_mut(base)
            .and_then(|records| records.iter_mut().find(|r| id_of(r).as_deref() == Some(id)))
            .ok_or_else(|| not_found(endpoint))?;
        if let (Value::Object(object), Some(Value::Object(patch))) = (&mut *record, payload) {
            for (k, v) in patch {
                if k != "id" {
                    object.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(record.clone())
    }

    fn delete(&mut self, endpoint: &str) -> Result<Value, RemoteError> {
        let (base, id) = split(endpoint).ok_or_else(|| not_found(endpoint))?;
        let records = self
            .collections
            .get_mut(base)
            .ok_or_else(|| not_found(endpoint))?;
        let before = records.len();
        records.retain(|r| id_of(r).as_deref() != Some(id));
        if records.len() == before {
            return Err(not_found(endpoint));
        }
        Ok(Value::Null)
    }
}

fn split(endpoint: &str) -> Option<(&str, &str)> {
    let (base, id) = endpoint.rsplit_once('/')?;
    if base.is_empty() || id.is_empty() {
        None
    } else {
        Some((base, id))
    }
}

fn id_of(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn not_found(endpoint: &str) -> RemoteError {
    RemoteError::Client {
        status: 404,
        body: format!("{} not found", endpoint),
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn get(&self, endpoint: &str) -> Result<Value, RemoteError> {
        self.handle("GET", endpoint, None)
    }

    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        self.handle(method.as_str(), endpoint, payload)
    }
}
