//! Integration test modules for lime-collector.
//!
//! This module organizes all integration tests that verify
//! end-to-end behaviour through the public API.
