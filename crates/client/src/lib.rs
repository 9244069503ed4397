//! WebSocket and HTTP client for the proxy cache monitor.
//!
//! Provides the session controller that owns the single active monitoring
//! connection, the inbound frame processing loop, the monitor events
//! broadcast to render sinks, the cached-content HTTP wrapper, and
//! environment-based configuration.

pub mod api;
pub mod client;
pub mod config;
pub mod events;
pub mod processor;
pub mod session;

pub use api::{CacheApiError, CacheContentApi};
pub use config::{ConfigError, MonitorConfig};
pub use events::MonitorEvent;
pub use session::{ConnectionId, SessionController, SessionError, SessionState};
