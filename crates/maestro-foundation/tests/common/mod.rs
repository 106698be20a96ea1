//! Common test utilities shared across all `maestro-foundation` integration tests.
//!
//! This module is **not** a standalone test binary. It is declared with
//! `mod common;` inside each integration test file that needs it.

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_adapter;
pub mod mock_admin;
pub mod mock_transport;
