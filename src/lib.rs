//! WINGO — fixed-interval number draw rounds with exactly-once settlement.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod game;
pub mod engine;
pub mod storage;
pub mod notify;
pub mod deposit;
pub mod dashboard;
pub mod service;
