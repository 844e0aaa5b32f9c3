//! Enrollment lifecycle and auto-trigger engine for candidate outreach sequences.
//!
//! The engine owns the authoritative state behind the recruitment platform's
//! sequence-enrollment API: enrollment records, their status transitions,
//! per-sequence auto-enrollment rules, and the evaluation of pipeline
//! stage-change events against those rules. Message composition and delivery
//! belong to an external send-scheduler that consumes `next_execution_at`.

pub mod config;
pub mod error;
pub mod sequences;
pub mod telemetry;
