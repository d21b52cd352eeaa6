//! Deployable waitlist server: configuration, wiring and lifecycle.

pub mod config;
pub mod lifecycle;
pub mod notifications;

pub use config::Config;
pub use lifecycle::Application;
pub use notifications::TracingNotificationGateway;
