//! hooksync GitHub infrastructure adapter.
//!
//! Implements the [`webhooks::HookApi`] port against the GitHub REST v3 hooks
//! API (github.com or GitHub Enterprise Server) using `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules.
//! All GitHub API details (authentication, pagination, rate-limit responses)
//! are handled here; the `webhooks` and `manager` crates never see them.

pub mod client;

pub use client::{web_host, GithubHookClient, DEFAULT_API_URL};
