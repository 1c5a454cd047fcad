//! Core domain for hooksync.
//!
//! This crate contains every domain concept used to keep GitHub webhook
//! registrations in line with what local subscribers need, and to authenticate
//! and route the deliveries those hooks produce. Infrastructure crates
//! implement the port traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no network or
//! file I/O. It defines *what* is needed; infrastructure crates define *how*
//! to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers and [`RepositoryIdentity`] URL parsing |
//! | [`types`] | Shared value types (`EventType`, `DeliveryEvent`, `RemoteHook`, `Target`, ...) |
//! | [`signature`] | HMAC signing, verification, and secret selection |
//! | [`subscribers`] | [`EventSubscriber`] trait, [`SubscriberRegistry`], built-in subscribers |
//! | [`duplicates`] | [`DuplicateDetector`] for redelivered delivery ids |
//! | [`problems`] | [`ProblemMonitor`] and the operator ignore list |
//! | [`ports`] | Traits implemented by infrastructure crates |
//! | [`errors`] | Error types shared across crates |

pub mod duplicates;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod problems;
pub mod signature;
pub mod subscribers;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use duplicates::{DuplicateDetector, DEFAULT_DUPLICATE_TTL};
pub use errors::{HookApiError, PersistenceError, SubscriberError};
pub use identifiers::{CallbackUrl, CredentialRef, DeliveryId, HookId, RepositoryIdentity, TargetName};
pub use ports::{HookApi, IgnoreListStore, SecretSource, TargetSource};
pub use problems::{InMemoryIgnoreStore, ProblemMonitor, ProblemRecord};
pub use signature::{
    select_secret, sign, verify, SignatureAlgorithm, SignatureError, SignatureVerifier,
    Verification,
};
pub use subscribers::{
    DispatchReport, DuplicateEventsSubscriber, EventSubscriber, PingSubscriber,
    SubscriberRegistry,
};
pub use types::{
    CreateHookRequest, DeliveryEvent, EventType, HookKind, HookSecretConfig, RemoteHook,
    RemoteRepository, Target, Timestamp, LEGACY_SERVICE_HOOK_NAME, LEGACY_SERVICE_URL_FIELD,
    MANAGED_WEBHOOK_NAME, WEBHOOK_URL_FIELD,
};
