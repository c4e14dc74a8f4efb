// src/api/mod.rs

//! # API Module
//!
//! Shared state and the HTTP handlers that operate on it.

pub mod groups;
pub mod state;
pub mod stats;
