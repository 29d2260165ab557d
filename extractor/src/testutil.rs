//! Mock collaborators shared by the fetcher and coordinator tests.

use crate::auth::TokenProvider;
use crate::cursor::CursorStore;
use crate::fhir::FhirSearchClient;
use crate::model::{Cursor, ResourcePage};
use crate::sink::BronzeSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use extractor_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

pub fn observation(id: &str, last_updated: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "meta": { "versionId": "1", "lastUpdated": last_updated },
        "status": "final"
    })
}

pub fn observation_page(entries: &[(&str, &str)], next: Option<&str>) -> ResourcePage {
    ResourcePage {
        resources: entries
            .iter()
            .map(|(id, ts)| observation(id, ts))
            .collect(),
        next: next.map(str::to_string),
        total: None,
    }
}

/// FHIR client that replays a scripted sequence of pages per resource type.
#[derive(Default)]
pub struct ScriptedFhirClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<ResourcePage>>>>,
    since_seen: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
    pub calls: AtomicU32,
}

impl ScriptedFhirClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, resource_type: &str, pages: Vec<Result<ResourcePage>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(resource_type.to_string(), pages.into());
        self
    }

    /// Watermark filter of the most recent fresh search for a resource type.
    pub fn last_since(&self, resource_type: &str) -> Option<DateTime<Utc>> {
        self.since_seen
            .lock()
            .unwrap()
            .get(resource_type)
            .copied()
            .flatten()
    }
}

#[async_trait]
impl FhirSearchClient for ScriptedFhirClient {
    async fn search_page(
        &self,
        resource_type: &str,
        since: Option<DateTime<Utc>>,
        _page_size: u32,
        next_url: Option<&str>,
        _bearer_token: &str,
    ) -> Result<ResourcePage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if next_url.is_none() {
            self.since_seen
                .lock()
                .unwrap()
                .insert(resource_type.to_string(), since);
        }

        self.scripts
            .lock()
            .unwrap()
            .get_mut(resource_type)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(Error::Internal(format!(
                    "no scripted page left for {resource_type}"
                )))
            })
    }
}

/// Token provider handing out stable tokens and counting forced refreshes.
#[derive(Default)]
pub struct StaticTokenProvider {
    pub refreshes: AtomicU32,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        Ok(format!("token-{}", self.refreshes.load(Ordering::SeqCst)))
    }

    async fn refresh(&self) -> Result<String> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{n}"))
    }
}

#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<String, Cursor>>,
    fail_reads: AtomicBool,
    transient_read_failures: AtomicU32,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, cursor: Cursor) {
        self.cursors
            .lock()
            .unwrap()
            .insert(cursor.resource_type.clone(), cursor);
    }

    pub fn get(&self, resource_type: &str) -> Option<Cursor> {
        self.cursors.lock().unwrap().get(resource_type).cloned()
    }

    /// Every read fails with a fatal storage error.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// The next `n` reads fail with a retryable database error.
    pub fn fail_reads_transiently(&self, n: u32) {
        self.transient_read_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(&self, resource_type: &str) -> Result<Option<Cursor>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage("cursor backend unavailable".into()));
        }
        if self
            .transient_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.get(resource_type))
    }

    async fn write(&self, cursor: &Cursor) -> Result<()> {
        self.put(cursor.clone());
        Ok(())
    }
}

/// Bronze sink that records page sizes and can fail on a chosen page.
#[derive(Default)]
pub struct MemoryBronzeSink {
    pages: Mutex<HashMap<String, Vec<usize>>>,
    fail_on: Mutex<HashMap<String, u64>>,
}

impl MemoryBronzeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page sizes written for a resource type, in arrival order.
    pub fn pages(&self, resource_type: &str) -> Vec<usize> {
        self.pages
            .lock()
            .unwrap()
            .get(resource_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the Nth written page (1-based) for a resource type.
    pub fn fail_on(&self, resource_type: &str, page: u64) {
        self.fail_on
            .lock()
            .unwrap()
            .insert(resource_type.to_string(), page);
    }
}

#[async_trait]
impl BronzeSink for MemoryBronzeSink {
    async fn write_page(&self, resource_type: &str, resources: &[Value]) -> Result<usize> {
        let page_no = {
            let pages = self.pages.lock().unwrap();
            pages.get(resource_type).map_or(0, Vec::len) as u64 + 1
        };

        if self.fail_on.lock().unwrap().get(resource_type) == Some(&page_no) {
            return Err(Error::Storage(format!(
                "bronze write failed on page {page_no} of {resource_type}"
            )));
        }

        self.pages
            .lock()
            .unwrap()
            .entry(resource_type.to_string())
            .or_default()
            .push(resources.len());

        Ok(resources.len())
    }
}
