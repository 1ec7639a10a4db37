//! Scribe Chat - streaming AI assistant core for the Scribe notes dashboard
//!
//! Resolves which provider/model serves a turn, builds the outbound request,
//! streams the reply into an ordered conversation log and derives statistics,
//! timelines and exports from it. A small axum surface exposes the session to
//! the dashboard.

pub mod api;
pub mod config;
pub mod conversation;
pub mod core;
pub mod providers;
pub mod routes;
