//! buildserver - a webhook-triggered build orchestrator.
//!
//! Push notifications arrive over HTTP, are authorized by a shared-secret
//! substring check, and are coalesced by a single-slot notifier so that a
//! burst of webhooks causes at most one pending build. A per-step trigger
//! task drives the clone/configure/build/test pipeline on a worker thread
//! and publishes results to an in-memory registry rendered by the status
//! page. All shared state lives on a single reactor thread.

pub mod config;
pub mod http;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod status;
pub mod trigger;
