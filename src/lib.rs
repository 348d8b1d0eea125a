//! # review-automation
//!
//! Rule engine for review events. Tenants define automations pairing a
//! trigger (rating below a threshold, negative sentiment, a keyword, no reply
//! after 24 hours, ...) with an action (email, Slack or Teams message, signed
//! webhook, tag, assignment).
//!
//! Events flow through a pgmq queue into the control plane, which matches
//! them against each tenant's active automations and dispatches actions at
//! most once per (automation, occurrence), recorded in a Postgres delivery
//! ledger. A scanner synthesizes time-based events and a retry sweep
//! re-publishes events whose deliveries failed.

pub mod action;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod repo;
pub mod telemetry;
