// src/services/mod.rs

//! # Services Module
//!
//! Connection registry, routing, the cross-instance bridge and the interfaces
//! to external collaborators.

// Registry of live connections and their mailboxes
pub mod connection_manager;
// Command-based routing of chat payloads
pub mod dispatcher;
// UDP broadcast bridge between instances
pub mod bridge;
// Per-connection send/receive pumps
pub mod session;
// Chat-history persistence interface
pub mod history_service;
// Authentication and group-membership interfaces
pub mod identity_service;
