#![allow(dead_code)]
//! Sluice Testing Utilities.

/// In-memory transactional broker for testing the sink writer without Kafka.
pub mod simplebroker;
