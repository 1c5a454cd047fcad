//! hooksync inbound delivery endpoint.
//!
//! Exposes the callback URL GitHub delivers to. Every request goes through:
//!
//! 1. the self-test short-circuit (`X-Hooksync-Hook-Check`), answered with
//!    this instance's identity and nothing else,
//! 2. header checks (`X-GitHub-Event` is required),
//! 3. signature verification against the effective secret (a target's own
//!    secret on `/github-webhook/{target}`, else the global secret),
//! 4. payload extraction (JSON body, or form-encoded `payload` field), and
//! 5. dispatch to the [`webhooks::SubscriberRegistry`].
//!
//! No remote API calls happen on this path.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP framing lives here; routing rules live in the
//! `webhooks` crate.

pub mod errors;
pub mod receiver;
pub mod sweeper;

pub use errors::ReceiveError;
pub use receiver::{
    router, serve, WebhookReceiver, DELIVERY_HEADER, EVENT_HEADER, INSTANCE_IDENTITY_HEADER,
    MAX_BODY_BYTES, SELF_TEST_HEADER, WEBHOOK_PATH,
};
pub use sweeper::spawn_duplicate_sweeper;
