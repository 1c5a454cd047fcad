//! Shared value types for the hooksync domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (a delivery payload is immutable once
//! received, a hook kind is derived from the hook's name) and participate in
//! domain computations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifiers::{CallbackUrl, CredentialRef, DeliveryId, HookId, RepositoryIdentity, TargetName};
use crate::signature::SignatureAlgorithm;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A category of upstream activity, as named in the `X-GitHub-Event` header.
///
/// The enumeration is closed for the events this system knows how to route;
/// anything else is carried verbatim in [`EventType::Unknown`] so that hooks
/// listing foreign events survive a merge, but unknown events are never
/// dispatched to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    /// Sent once when a hook is created.
    Ping,
    /// Commits pushed to a branch or tag.
    Push,
    /// Pull request opened, synchronised, closed, ...
    PullRequest,
    /// Review submitted on a pull request.
    PullRequestReview,
    /// Comment on a pull request diff.
    PullRequestReviewComment,
    /// Issue opened, edited, closed, ...
    Issues,
    /// Comment on an issue or pull request.
    IssueComment,
    /// Branch or tag created.
    Create,
    /// Branch or tag deleted.
    Delete,
    /// Release published or edited.
    Release,
    /// Repository created, renamed, archived, ...
    Repository,
    /// Commit status changed.
    Status,
    /// Check run created or completed.
    CheckRun,
    /// Check suite requested or completed.
    CheckSuite,
    /// Any event name this system does not route.
    Unknown(String),
}

impl EventType {
    const KNOWN: &'static [(&'static str, EventType)] = &[
        ("ping", EventType::Ping),
        ("push", EventType::Push),
        ("pull_request", EventType::PullRequest),
        ("pull_request_review", EventType::PullRequestReview),
        ("pull_request_review_comment", EventType::PullRequestReviewComment),
        ("issues", EventType::Issues),
        ("issue_comment", EventType::IssueComment),
        ("create", EventType::Create),
        ("delete", EventType::Delete),
        ("release", EventType::Release),
        ("repository", EventType::Repository),
        ("status", EventType::Status),
        ("check_run", EventType::CheckRun),
        ("check_suite", EventType::CheckSuite),
    ];

    /// Matches a wire name case-insensitively. Never fails: unrecognised
    /// names become [`EventType::Unknown`].
    pub fn from_wire(name: &str) -> Self {
        let name = name.trim();
        Self::KNOWN
            .iter()
            .find(|(wire, _)| wire.eq_ignore_ascii_case(name))
            .map(|(_, event)| event.clone())
            .unwrap_or_else(|| Self::Unknown(name.to_string()))
    }

    /// The name GitHub uses for this event.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unknown(name) => name,
            known => Self::KNOWN
                .iter()
                .find(|(_, event)| event == known)
                .map(|(wire, _)| *wire)
                .unwrap_or_default(),
        }
    }

    /// Returns `true` for events a subscriber may receive.
    pub fn is_routable(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_wire(s))
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&name))
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Returns this timestamp moved forward by `duration`.
    pub fn after(self, duration: Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is later.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Inbound deliveries
// ---------------------------------------------------------------------------

/// One inbound webhook call, carrying one event and its payload.
///
/// The raw body is shared behind an [`Arc`] so that dispatching to many
/// subscribers never copies it, and it cannot be mutated after receipt.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    /// Event category from the event-type header.
    pub event_type: EventType,
    /// The JSON payload text (already extracted from a form body if needed).
    pub payload: Arc<str>,
    /// Delivery identifier; `None` disables duplicate tracking.
    pub delivery_id: Option<DeliveryId>,
    /// When the endpoint received the request.
    pub received_at: Timestamp,
    /// Free-form description of where the request came from.
    pub origin: String,
    /// Signature header value(s) as received, for subscribers that re-verify.
    pub signature: Option<String>,
}

impl DeliveryEvent {
    /// Creates a delivery received now with no origin or signature.
    pub fn new(event_type: EventType, payload: impl Into<Arc<str>>) -> Self {
        Self {
            event_type,
            payload: payload.into(),
            delivery_id: None,
            received_at: Timestamp::now(),
            origin: String::new(),
            signature: None,
        }
    }

    /// Attach the delivery identifier.
    pub fn with_delivery_id(mut self, id: Option<DeliveryId>) -> Self {
        self.delivery_id = id;
        self
    }

    /// Attach the origin tag.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Attach the received signature header value.
    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    /// Override the receipt time.
    pub fn received_at(mut self, at: Timestamp) -> Self {
        self.received_at = at;
        self
    }

    /// Parses the payload as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Repository identities mentioned in the payload's `repository` object.
    ///
    /// Looks at every URL field GitHub populates; unparsable URLs are skipped.
    pub fn repositories(&self) -> Vec<RepositoryIdentity> {
        let Ok(value) = self.json() else {
            return Vec::new();
        };
        let Some(repository) = value.get("repository") else {
            return Vec::new();
        };

        let mut found: Vec<RepositoryIdentity> = Vec::new();
        for field in ["html_url", "clone_url", "ssh_url", "git_url", "url"] {
            let parsed = repository
                .get(field)
                .and_then(|v| v.as_str())
                .and_then(RepositoryIdentity::parse);
            if let Some(id) = parsed {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        found
    }
}

// ---------------------------------------------------------------------------
// Remote hooks
// ---------------------------------------------------------------------------

/// Hook name GitHub uses for ordinary webhooks.
pub const MANAGED_WEBHOOK_NAME: &str = "web";

/// Name of the retired GitHub service integration this system once installed.
pub const LEGACY_SERVICE_HOOK_NAME: &str = "jenkins";

/// Config field holding the callback URL of a legacy service hook.
pub const LEGACY_SERVICE_URL_FIELD: &str = "jenkins_hook_url";

/// Config field holding the callback URL of a webhook.
pub const WEBHOOK_URL_FIELD: &str = "url";

/// The two historical hook flavours, plus everything owned by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    /// Modern webhook (`name = "web"`, callback in `config.url`).
    ManagedWebhook,
    /// Legacy service hook (fixed name, callback in a service-specific field).
    LegacyServiceHook,
    /// Any other integration; never touched.
    Foreign,
}

/// A hook object as the remote API reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteHook {
    /// Remote id, used for deletion.
    pub id: HookId,
    /// Hook name; decides the [`HookKind`].
    pub name: String,
    /// Configuration map (`url`, `content_type`, ...). Values are left as JSON.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// Events the hook is subscribed to.
    #[serde(default)]
    pub events: BTreeSet<EventType>,
    /// Whether GitHub currently delivers to this hook.
    #[serde(default)]
    pub active: bool,
}

impl RemoteHook {
    /// Classifies the hook by name.
    pub fn kind(&self) -> HookKind {
        match self.name.as_str() {
            MANAGED_WEBHOOK_NAME => HookKind::ManagedWebhook,
            LEGACY_SERVICE_HOOK_NAME => HookKind::LegacyServiceHook,
            _ => HookKind::Foreign,
        }
    }

    /// The callback URL this hook delivers to, read from the field matching its kind.
    pub fn callback_url(&self) -> Option<&str> {
        let field = match self.kind() {
            HookKind::ManagedWebhook => WEBHOOK_URL_FIELD,
            HookKind::LegacyServiceHook => LEGACY_SERVICE_URL_FIELD,
            HookKind::Foreign => return None,
        };
        self.config.get(field).and_then(|v| v.as_str())
    }

    /// Returns `true` if this hook is of `kind` and delivers to `url`.
    pub fn is(&self, kind: HookKind, url: &CallbackUrl) -> bool {
        self.kind() == kind && self.callback_url() == Some(url.as_str())
    }
}

/// Body of a hook-creation call.
#[derive(Clone, PartialEq, Serialize)]
pub struct CreateHookRequest {
    /// Always [`MANAGED_WEBHOOK_NAME`] for hooks this system creates.
    pub name: String,
    /// `url`, `content_type` and optionally `secret`.
    pub config: BTreeMap<String, String>,
    /// Events the new hook subscribes to.
    pub events: BTreeSet<EventType>,
    /// Whether the hook starts delivering immediately.
    pub active: bool,
}

impl CreateHookRequest {
    /// A JSON webhook delivering `events` to `url`, signed with `secret` if given.
    pub fn webhook(url: &CallbackUrl, events: BTreeSet<EventType>, secret: Option<&str>) -> Self {
        let mut config = BTreeMap::new();
        config.insert(WEBHOOK_URL_FIELD.to_string(), url.as_str().to_string());
        config.insert("content_type".to_string(), "json".to_string());
        if let Some(secret) = secret {
            config.insert("secret".to_string(), secret.to_string());
        }
        Self {
            name: MANAGED_WEBHOOK_NAME.to_string(),
            config,
            events,
            active: true,
        }
    }
}

impl fmt::Debug for CreateHookRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config: BTreeMap<&str, &str> = self
            .config
            .iter()
            .map(|(k, v)| {
                let shown = if k == "secret" { "<REDACTED>" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("CreateHookRequest")
            .field("name", &self.name)
            .field("config", &config)
            .field("events", &self.events)
            .field("active", &self.active)
            .finish()
    }
}

/// A repository as seen through one server's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    /// The repository.
    pub identity: RepositoryIdentity,
    /// Whether the acting credential has admin rights (required to manage hooks).
    pub admin: bool,
}

// ---------------------------------------------------------------------------
// Configuration-derived values
// ---------------------------------------------------------------------------

/// A shared secret usable for signing outgoing hooks and verifying incoming ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSecretConfig {
    /// Where the secret value lives.
    pub credential: CredentialRef,
    /// Signature algorithm deliveries are verified with.
    #[serde(default)]
    pub algorithm: SignatureAlgorithm,
}

/// A consumer-owning unit and the repositories it is associated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Unique name.
    pub name: TargetName,
    /// Repositories whose events this target may need.
    pub repositories: Vec<RepositoryIdentity>,
    /// Per-target secret overriding the global one.
    pub secret: Option<HookSecretConfig>,
}

impl Target {
    /// Creates a target without a secret override.
    pub fn new(name: TargetName, repositories: Vec<RepositoryIdentity>) -> Self {
        Self {
            name,
            repositories,
            secret: None,
        }
    }

    /// Returns `true` if this target is associated with `repo`.
    pub fn references(&self, repo: &RepositoryIdentity) -> bool {
        self.repositories.contains(repo)
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
