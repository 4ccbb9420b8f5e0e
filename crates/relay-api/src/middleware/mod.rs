//! HTTP middleware for the relay API.

pub mod request_log;

pub use request_log::log_requests;
