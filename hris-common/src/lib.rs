//! # HRIS Common Library
//!
//! Shared code for the HRIS back office services including:
//! - Error and result types
//! - Configuration loading (TOML + environment)
//! - SQLite initialization for the tables the real-time core writes
//! - Notification types pushed to live clients

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
