//! Webhook registration orchestration for hooksync.
//!
//! This crate turns the domain rules of the `webhooks` crate into scheduled
//! work against a remote [`webhooks::HookApi`]:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`reconciler`] | [`WebhookManager`]: register and cleanup paths for one callback URL |
//! | [`queue`] | [`SerialQueue`]: single-worker FIFO for remote mutations |
//! | [`service`] | [`HookRegistrationService`]: target diffing, sweep, re-register-all |
//! | [`persistence`] | [`JsonFileIgnoreStore`]: the ignore list on disk |

pub mod persistence;
pub mod queue;
pub mod reconciler;
pub mod service;

#[cfg(test)]
mod test_support;

pub use persistence::{JsonFileIgnoreStore, IGNORE_LIST_FILE};
pub use queue::{QueueError, SerialQueue, TaskHandle, DEFAULT_QUEUE_CAPACITY};
pub use reconciler::{
    CleanupOutcome, CleanupReport, ManagedServer, ReconcileReport, RegisterOutcome,
    WebhookManager,
};
pub use service::{AppliedChanges, HookRegistrationService};
