#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenancy_sdk::{
    ConnectivityProbe, CredentialSource, DbPassword, ProbeOutcome, TenancyConfig, TenancyError, TenantDbConfig,
    TenantDescriptor, TenantKey,
};

/// Configuration from defaults plus `pairs`.
pub fn config(pairs: &[(&str, &str)]) -> TenancyConfig {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    TenancyConfig::from_lookup(|name| vars.get(name).cloned()).expect("config")
}

pub fn descriptor(alias: &str, db_name: &str, password: DbPassword) -> TenantDescriptor {
    TenantDescriptor {
        alias: alias.to_string(),
        db_name: db_name.to_string(),
        db_user: format!("{db_name}_user"),
        db_host: "db.internal".to_string(),
        db_port: "5432".to_string(),
        password,
        user_id: None,
    }
}

/// In-memory accounts service that counts fetches.
#[derive(Default)]
pub struct FakeSource {
    tenants: Mutex<HashMap<TenantKey, TenantDescriptor>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    pub fetches: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, key: TenantKey, descriptor: TenantDescriptor) {
        self.tenants.lock().unwrap().insert(key, descriptor);
    }

    /// Answer every fetch with an HTTP 500 while set.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn slow(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for FakeSource {
    async fn fetch(&self, key: &TenantKey) -> Result<TenantDescriptor, TenancyError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TenancyError::UpstreamError {
                status: 500,
                body: "internal error".into(),
            });
        }
        self.tenants
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| TenancyError::UpstreamError {
                status: 404,
                body: format!("no tenant for {key}"),
            })
    }
}

/// Probe that never dials; records every target it was asked about.
pub struct FakeProbe {
    reachable: AtomicBool,
    delays: Mutex<HashMap<String, Duration>>,
    pub seen: Mutex<Vec<TenantDbConfig>>,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeProbe {
            reachable: AtomicBool::new(true),
            delays: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Delay every probe of `database`.
    pub fn slow_for(&self, database: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(database.to_string(), delay);
    }

    pub fn reachable(&self, ok: bool) {
        self.reachable.store(ok, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectivityProbe for FakeProbe {
    async fn probe(&self, target: &TenantDbConfig) -> ProbeOutcome {
        self.seen.lock().unwrap().push(target.clone());
        let delay = self.delays.lock().unwrap().get(&target.database).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            ProbeOutcome::success()
        } else {
            ProbeOutcome::failure("connection refused")
        }
    }
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}
