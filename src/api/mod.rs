//! HTTP surface: the client-facing chat-completions API and the read-mostly
//! admin API, served on separate ports from [`crate::main`].

pub mod admin;
pub mod admin_auth;
pub mod client;
pub mod client_auth;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod request_id;
pub mod status;
