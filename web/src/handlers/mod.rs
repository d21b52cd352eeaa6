//! HTTP request handlers.

pub mod health;
pub mod waitlist;

pub use health::{health_check, readiness};
