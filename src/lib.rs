// src/lib.rs

//! # chat-relay
//!
//! Keeps a WebSocket per logged-in user, routes chat messages to single users
//! and to groups, and bridges every message to the other instances on the
//! local network segment over UDP broadcast.

pub mod api;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
