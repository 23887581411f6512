//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Client::new → pipeline assembled, transport created lazily on first send
//! Client::spawn_health_monitor → background task subscribed to Shutdown
//! Client::close → Shutdown triggered → monitors exit → transport closed
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
