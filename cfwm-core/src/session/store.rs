//! Session data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a user within a multi-turn input flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Idle, no input expected
    #[default]
    None,
    InputName,
    WaitingApproval,
    InputApiToken,
    InputAccountId,
    InputZoneId,
    InputKvNamespaceId,
    InputWorkerName,
    InputWorkerCode,
    InputKvNamespace,
    InputKvKey,
}

impl Step {
    /// Wire name of the step
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::None => "none",
            Step::InputName => "input_name",
            Step::WaitingApproval => "waiting_approval",
            Step::InputApiToken => "input_api_token",
            Step::InputAccountId => "input_account_id",
            Step::InputZoneId => "input_zone_id",
            Step::InputKvNamespaceId => "input_kv_namespace_id",
            Step::InputWorkerName => "input_worker_name",
            Step::InputWorkerCode => "input_worker_code",
            Step::InputKvNamespace => "input_kv_namespace",
            Step::InputKvKey => "input_kv_key",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloudflare account data collected from the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudflareCredentials {
    pub api_token: Option<String>,
    pub account_id: Option<String>,
    pub zone_id: Option<String>,
    pub kv_namespace_id: Option<String>,
    pub kv_namespace: Option<String>,
    pub kv_key: Option<String>,
}

impl CloudflareCredentials {
    /// True once API token, account ID, zone ID and KV namespace ID are all non-empty.
    ///
    /// `kv_namespace` and `kv_key` are optional extras and do not count.
    pub fn is_configured(&self) -> bool {
        [
            &self.api_token,
            &self.account_id,
            &self.zone_id,
            &self.kv_namespace_id,
        ]
        .iter()
        .all(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

/// A worker recorded by the deploy flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Worker name
    pub name: String,
    /// Submitted script source
    pub code: String,
    /// Time the worker was recorded
    pub created_at: DateTime<Utc>,
}

impl WorkerRecord {
    /// Create a new worker record stamped with the current time
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            created_at: Utc::now(),
        }
    }
}

/// Conversation state of one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// User identifier (session key)
    pub user_id: String,
    /// Current step
    pub step: Step,
    /// Set only by admin approval
    pub approved: bool,
    /// Name given at registration
    pub name: Option<String>,
    /// Cloudflare data
    pub cloudflare: CloudflareCredentials,
    /// Recorded workers, append-only
    workers: Vec<WorkerRecord>,
    /// Worker name waiting for its code
    pub pending_worker_name: Option<String>,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an idle, unapproved session
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            step: Step::None,
            approved: false,
            name: None,
            cloudflare: CloudflareCredentials::default(),
            workers: Vec::new(),
            pending_worker_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the Cloudflare setup is complete
    pub fn is_configured(&self) -> bool {
        self.cloudflare.is_configured()
    }

    /// Approved and configured: the guard for every menu feature
    pub fn can_use_menu(&self) -> bool {
        self.approved && self.is_configured()
    }

    /// Move to `step`.
    ///
    /// The pending worker name only survives a move into `InputWorkerCode`;
    /// entering any other step abandons the deploy flow.
    pub fn enter(&mut self, step: Step) {
        if step != Step::InputWorkerCode {
            self.pending_worker_name = None;
        }
        self.step = step;
        self.touch();
    }

    /// Start registration over: unapproved, no workers, no Cloudflare data
    pub fn reset_for_registration(&mut self) {
        self.approved = false;
        self.workers.clear();
        self.cloudflare = CloudflareCredentials::default();
        self.enter(Step::InputName);
    }

    /// Mark approved and reset the account data to a fresh state
    pub fn approve(&mut self) {
        self.approved = true;
        self.workers.clear();
        self.cloudflare = CloudflareCredentials::default();
        self.enter(Step::None);
    }

    /// Append a worker record
    pub fn push_worker(&mut self, worker: WorkerRecord) {
        self.workers.push(worker);
        self.touch();
    }

    /// Recorded workers in insertion order
    pub fn workers(&self) -> &[WorkerRecord] {
        &self.workers
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
