use chrono::{DateTime, Utc};
use extractor_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted extraction progress for one resource type.
///
/// `last_updated` is the watermark: the maximum `meta.lastUpdated` of any
/// resource durably written in or before the run that produced this cursor.
/// `None` means no prior extraction (next run fetches full history).
/// `record_count` is the count for that run alone, not cumulative.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Cursor {
    pub resource_type: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub extracted_at: DateTime<Utc>,
    pub record_count: i64,
}

/// FHIR searchset bundle, parsed only as deep as paging requires.
/// Resources stay as raw JSON; bronze receives them unmodified.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchBundle {
    #[serde(rename = "resourceType")]
    pub resource_type: Option<String>,
    pub total: Option<u64>,
    #[serde(default)]
    pub link: Vec<BundleLink>,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleEntry {
    pub resource: Option<Value>,
}

impl SearchBundle {
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next")
            .map(|l| l.url.as_str())
    }
}

/// One server page of a search result set.
#[derive(Debug, Clone)]
pub struct ResourcePage {
    pub resources: Vec<Value>,
    /// Opaque next link; `None` ends the sequence.
    pub next: Option<String>,
    /// Server-advertised total, advisory only (Epic may revise it downward).
    pub total: Option<u64>,
}

impl ResourcePage {
    pub fn from_bundle(bundle: SearchBundle) -> Result<Self> {
        match bundle.resource_type.as_deref() {
            Some("Bundle") => {}
            other => {
                return Err(Error::Validation(format!(
                    "expected a Bundle, got resourceType {other:?}"
                )))
            }
        }

        let next = bundle.next_link().map(str::to_string);
        let resources = bundle
            .entry
            .into_iter()
            .filter_map(|e| e.resource)
            .collect();

        Ok(Self {
            resources,
            next,
            total: bundle.total,
        })
    }

    /// Maximum `meta.lastUpdated` across the page's resources.
    pub fn max_last_updated(&self) -> Option<DateTime<Utc>> {
        self.resources.iter().filter_map(resource_last_updated).max()
    }
}

pub fn resource_id(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(Value::as_str)
}

pub fn resource_version(resource: &Value) -> Option<&str> {
    resource
        .get("meta")
        .and_then(|m| m.get("versionId"))
        .and_then(Value::as_str)
}

pub fn resource_last_updated(resource: &Value) -> Option<DateTime<Utc>> {
    resource
        .get("meta")
        .and_then(|m| m.get("lastUpdated"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Totals for one resource type's successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub pages: u64,
    pub records: u64,
    pub watermark: Option<DateTime<Utc>>,
}

/// Outcome for one resource type within a job. Failures are isolated here
/// rather than propagated, so sibling resource types keep running.
#[derive(Debug)]
pub struct ResourceOutcome {
    pub resource_type: String,
    pub outcome: Result<RunStats>,
}

#[derive(Debug)]
pub struct ExtractionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ResourceOutcome>,
}

impl ExtractionReport {
    pub fn failed(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes.iter().filter(|o| o.outcome.is_err())
    }

    pub fn total_records(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.outcome.as_ref().ok())
            .map(|s| s.records)
            .sum()
    }
}
