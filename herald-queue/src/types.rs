use std::{
    cmp::Ordering,
    fmt,
    str::FromStr,
    sync::{LazyLock, Mutex, PoisonError},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueueError;

static GENERATOR: LazyLock<Mutex<ulid::Generator>> =
    LazyLock::new(|| Mutex::new(ulid::Generator::new()));

/// Identifier for a queue record
///
/// A ULID drawn from a process-wide monotonic generator: ids sort by creation
/// time, and ids created within the same millisecond still sort in creation
/// order. The id doubles as the file stem of file-backed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    id: ulid::Ulid,
}

impl RecordId {
    /// Generate a new unique record ID
    #[must_use]
    pub fn generate() -> Self {
        let id = GENERATOR
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new());

        Self { id }
    }

    /// Create a record ID from an existing ULID
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Parse a record ID from a filename like `01ARYZ6S41TSV4RRFFQ69G5FAV.json`
    ///
    /// Rejects path separators, `..` and anything that is not a valid ULID so
    /// a directory listing can never be tricked into reading outside the store.
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".json")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch encoded in this id
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for RecordId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self::new)
    }
}

impl Serialize for RecordId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Delivery priority; `High` is dispatched before `Medium` before `Low`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

/// Raised when an integer outside `1..=3` is used as a priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Priority must be 1 (high), 2 (medium) or 3 (low), got {0}")]
pub struct InvalidPriority(pub u8);

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::High),
            2 => Ok(Self::Medium),
            3 => Ok(Self::Low),
            other => Err(InvalidPriority(other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as Self
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Lifecycle state of a queue record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for a dispatcher to claim it
    Pending,
    /// Claimed by exactly one dispatch cycle
    Processing,
    /// Delivered; never changes again
    Success,
    /// Gave up, either after exhausting retries or on a permanent failure
    Failed,
}

impl QueueStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Processing, Self::Success, Self::Failed];

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown queue status '{s}'"))
    }
}

/// Persisted delivery lifecycle of one notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: RecordId,
    pub to: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    pub template_name: String,
    #[serde(default)]
    pub template_data: Map<String, Value>,
    #[serde(default)]
    pub priority: Priority,
    /// Not eligible for dispatch before this instant
    pub scheduled_for: Option<SystemTime>,
    pub status: QueueStatus,
    /// Mirrors `status == Success`
    pub is_send: bool,
    pub error_message: Option<String>,
    /// Actor that requested the notification (audit only)
    pub created_by: String,
    pub created_at: SystemTime,
    /// Set every time a dispatcher claims the record
    pub send_at: Option<SystemTime>,
    pub retry_count: u32,
    pub last_retry_at: Option<SystemTime>,
}

impl QueueRecord {
    /// The instant from which the record may be dispatched
    #[must_use]
    pub fn due_at(&self) -> SystemTime {
        self.scheduled_for.unwrap_or(self.created_at)
    }

    /// Whether a dispatcher may select this record at `now`
    #[must_use]
    pub fn is_due(&self, now: SystemTime) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_for.is_none_or(|at| at <= now)
    }

    /// Dispatch order: priority first, then due time, then enqueue order
    #[must_use]
    pub fn dispatch_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.due_at().cmp(&other.due_at()))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Conditional `pending -> processing` transition.
    ///
    /// Returns `false` without touching the record when it is not pending.
    pub fn try_claim(&mut self, now: SystemTime) -> bool {
        if self.status != QueueStatus::Pending {
            return false;
        }

        self.status = QueueStatus::Processing;
        self.send_at = Some(now);
        true
    }

    /// Put a record whose claim is older than `cutoff` back to `pending`.
    pub fn release_if_stale(&mut self, cutoff: SystemTime) -> bool {
        if self.status != QueueStatus::Processing || self.send_at.is_some_and(|at| at >= cutoff) {
            return false;
        }

        self.status = QueueStatus::Pending;
        true
    }
}

/// Field changes applied to a stored record
///
/// `None` leaves a field untouched. `is_send` always follows `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: Option<QueueStatus>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub last_retry_at: Option<SystemTime>,
    pub scheduled_for: Option<Option<SystemTime>>,
}

impl RecordUpdate {
    /// Successful delivery
    #[must_use]
    pub fn delivered() -> Self {
        Self {
            status: Some(QueueStatus::Success),
            error_message: Some(None),
            ..Self::default()
        }
    }

    /// Failed attempt that will be tried again at `next_attempt`
    #[must_use]
    pub fn retry(
        retry_count: u32,
        now: SystemTime,
        next_attempt: SystemTime,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: Some(QueueStatus::Pending),
            error_message: Some(Some(error.into())),
            retry_count: Some(retry_count),
            last_retry_at: Some(now),
            scheduled_for: Some(Some(next_attempt)),
        }
    }

    /// Terminal failure
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(QueueStatus::Failed),
            error_message: Some(Some(error.into())),
            ..Self::default()
        }
    }

    /// Operator-requested fresh start of a failed record
    #[must_use]
    pub fn requeue() -> Self {
        Self {
            status: Some(QueueStatus::Pending),
            retry_count: Some(0),
            scheduled_for: Some(None),
            ..Self::default()
        }
    }

    /// Apply this update to `record`.
    ///
    /// # Errors
    /// [`QueueError::Terminal`] if the record was already delivered.
    pub fn apply(&self, record: &mut QueueRecord) -> Result<(), QueueError> {
        if record.status == QueueStatus::Success {
            return Err(QueueError::Terminal(record.id));
        }

        if let Some(status) = self.status {
            record.status = status;
            record.is_send = status == QueueStatus::Success;
        }
        if let Some(error_message) = &self.error_message {
            record.error_message.clone_from(error_message);
        }
        if let Some(retry_count) = self.retry_count {
            record.retry_count = retry_count;
        }
        if let Some(last_retry_at) = self.last_retry_at {
            record.last_retry_at = Some(last_retry_at);
        }
        if let Some(scheduled_for) = self.scheduled_for {
            record.scheduled_for = scheduled_for;
        }

        Ok(())
    }
}
