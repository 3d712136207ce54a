//! API handlers.
//!
//! `auth` holds every security decision; `health` reports build metadata and
//! datastore reachability.

pub mod auth;
pub mod health;
