//! Recording fakes for the outbound ports

use crate::dependency::{DependencyAgent, DependencyRequest};
use crate::error::UpstreamError;
use crate::plm::PlmClient;
use crate::recalc::DateRecalculator;
use crate::store::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct RecordingAgent {
    requests: Mutex<Vec<DependencyRequest>>,
    fail: bool,
}

impl RecordingAgent {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<DependencyRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DependencyAgent for RecordingAgent {
    async fn request(&self, request: &DependencyRequest) -> Result<(), UpstreamError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(UpstreamError::Status {
                service: "dependency agent",
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePlm {
    plans: HashMap<String, Value>,
    folders: Vec<Value>,
    masterdata: HashMap<String, Value>,
    plan_failures: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl FakePlm {
    pub fn with_plan(mut self, plan_id: &str, plan: Value) -> Self {
        self.plans.insert(plan_id.to_string(), plan);
        self
    }

    pub fn with_folder(mut self, folder: Value) -> Self {
        self.folders.push(folder);
        self
    }

    pub fn with_masterdata(mut self, field_id: &str, body: Value) -> Self {
        self.masterdata.insert(field_id.to_string(), body);
        self
    }

    /// The next `n` plan fetches fail
    pub fn fail_plan_fetches(self, n: usize) -> Self {
        self.plan_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn not_found(what: &str) -> UpstreamError {
        UpstreamError::Status {
            service: "PLM API",
            status: 404,
            body: format!("{what} not found"),
        }
    }
}

#[async_trait]
impl PlmClient for FakePlm {
    async fn fetch_plan(&self, plan_id: &str) -> Result<Value, UpstreamError> {
        self.calls.lock().unwrap().push(format!("plan:{plan_id}"));
        let pending = self.plan_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.plan_failures.store(pending - 1, Ordering::SeqCst);
            return Err(UpstreamError::Unexpected("connection reset".into()));
        }
        self.plans.get(plan_id).cloned().ok_or_else(|| Self::not_found(plan_id))
    }

    async fn list_tracking_folders(&self) -> Result<Vec<Value>, UpstreamError> {
        self.calls.lock().unwrap().push("folders".to_string());
        Ok(self.folders.clone())
    }

    async fn fetch_masterdata(&self, field_id: &str) -> Result<Value, UpstreamError> {
        self.calls.lock().unwrap().push(format!("masterdata:{field_id}"));
        self.masterdata.get(field_id).cloned().ok_or_else(|| Self::not_found(field_id))
    }
}

#[derive(Default)]
pub struct FakeRecalculator {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeRecalculator {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DateRecalculator for FakeRecalculator {
    async fn recalculate_start_dates(&self, plan_id: &str) -> Result<u64, StoreError> {
        self.calls.lock().unwrap().push(plan_id.to_string());
        if self.fail {
            return Err(StoreError::Unexpected("function ops.calculate_timeline_start_dates failed".into()));
        }
        Ok(3)
    }
}
