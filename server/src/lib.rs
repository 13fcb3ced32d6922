//! Chorus Server - Authenticated WebSocket broadcast hub.
//!
//! This crate provides the Chorus server, responsible for:
//! - Issuing signed access tokens for user identities
//! - Admitting WebSocket clients that present a valid token
//! - Relaying every inbound message to all connected clients
//!
//! # Architecture
//!
//! A single [`hub`] coordinator task owns the registry of connected clients.
//! Each admitted connection runs a reader and a writer worker ([`pump`]) that
//! talk to the coordinator over channels. Messages are relayed in real time
//! without persistent storage.

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod pump;
pub mod routes;
pub mod types;
