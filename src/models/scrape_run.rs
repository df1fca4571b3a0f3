use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{StoreId, generate_id};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerReason {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreOutcome {
    Success,
    /// Fetched, but some listings or category pages were lost along the way.
    Partial,
    Failed,
    /// Another run already had the store; nothing was fetched.
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Timeout,
    /// HTTP 401/403/429 or an anti-bot page.
    Blocked,
    ParseError,
    Unreachable,
    /// HTTP 5xx.
    ServerError,
    Cancelled,
}

impl FailureClass {
    /// Transient failures are worth another attempt within the same run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureClass::Timeout | FailureClass::Unreachable | FailureClass::ServerError
        )
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureClass::Timeout => "timeout",
            FailureClass::Blocked => "blocked",
            FailureClass::ParseError => "parse_error",
            FailureClass::Unreachable => "unreachable",
            FailureClass::ServerError => "server_error",
            FailureClass::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Typed failure crossing the adapter boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchFailure {
    pub store_id: StoreId,
    pub class: FailureClass,
    pub message: String,
}

impl FetchFailure {
    pub fn new(store_id: StoreId, class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            store_id,
            class,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store {} {}: {}", self.store_id, self.class, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemCounts {
    pub listings: usize,
    pub skipped: usize,
    pub unmatched: usize,
    pub duplicates: usize,
    pub records_written: usize,
    pub records_ignored: usize,
    pub events: usize,
}

impl ItemCounts {
    pub fn add(&mut self, other: &ItemCounts) {
        self.listings += other.listings;
        self.skipped += other.skipped;
        self.unmatched += other.unmatched;
        self.duplicates += other.duplicates;
        self.records_written += other.records_written;
        self.records_ignored += other.records_ignored;
        self.events += other.events;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreRunResult {
    pub store_id: StoreId,
    pub store_name: String,
    pub outcome: StoreOutcome,
    pub attempts: u32,
    pub counts: ItemCounts,
    pub failure: Option<FetchFailure>,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StoreRunResult {
    pub fn new(store_id: StoreId, store_name: &str, outcome: StoreOutcome) -> Self {
        let now = Utc::now();
        Self {
            store_id,
            store_name: store_name.to_string(),
            outcome,
            attempts: 0,
            counts: ItemCounts::default(),
            failure: None,
            detail: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn skipped(store_id: StoreId, store_name: &str, detail: &str) -> Self {
        let mut result = Self::new(store_id, store_name, StoreOutcome::Skipped);
        result.detail = Some(detail.to_string());
        result
    }
}

/// One orchestrator execution across some or all stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeRun {
    pub id: String,
    pub trigger: TriggerReason,
    pub store_filter: Option<Vec<StoreId>>,
    pub status: RunStatus,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stores: Vec<StoreRunResult>,
}

impl ScrapeRun {
    pub fn new(trigger: TriggerReason, store_filter: Option<Vec<StoreId>>) -> Self {
        Self {
            id: generate_id(),
            trigger,
            store_filter,
            status: RunStatus::Running,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
            stores: Vec::new(),
        }
    }

    pub fn record(&mut self, result: StoreRunResult) {
        self.stores.push(result);
    }

    pub fn store(&self, store_id: StoreId) -> Option<&StoreRunResult> {
        self.stores.iter().find(|s| s.store_id == store_id)
    }

    pub fn totals(&self) -> ItemCounts {
        let mut totals = ItemCounts::default();
        for store in &self.stores {
            totals.add(&store.counts);
        }
        totals
    }

    /// `failed` only when every attempted store failed; `completed` when every one succeeded.
    pub fn finalize(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());

        let attempted: Vec<StoreOutcome> = self
            .stores
            .iter()
            .map(|s| s.outcome)
            .filter(|o| *o != StoreOutcome::Skipped)
            .collect();

        self.status = if attempted.is_empty() {
            if cancelled { RunStatus::Partial } else { RunStatus::Completed }
        } else if attempted.iter().all(|o| *o == StoreOutcome::Failed) {
            RunStatus::Failed
        } else if !cancelled && attempted.iter().all(|o| *o == StoreOutcome::Success) {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        };
    }
}
