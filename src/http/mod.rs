//! HTTP surface: the rate limiting middleware and the server that mounts it.

pub mod middleware;
pub mod server;

pub use middleware::{rate_limit, AuthContext};
pub use server::{AppLimiters, HttpServer};
