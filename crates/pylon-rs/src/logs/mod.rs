//! Logging: subscriber configuration and structured event emission.

pub mod events;
pub mod logger;
