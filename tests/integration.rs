//! Integration tests entry point
//!
//! Wires the in-memory stores, the policy chain and the workers together:
//! - Per-host pacing and due-queue replay
//! - Backlog scheduling, crawling and orphan recovery

mod common;
mod integration_tests;
