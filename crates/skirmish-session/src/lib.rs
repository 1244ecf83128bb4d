//! Session management for Skirmish.
//!
//! Each combat session runs as an isolated Tokio task (actor model) that
//! owns its lobby and combat state machine. Commands from any number of
//! clients funnel into the actor's queue and run one at a time.
//!
//! # Key types
//!
//! - [`SessionCoordinator`]: creates/closes sessions, routes commands
//! - [`SessionHandle`]: send commands to a running session actor
//! - [`SessionUpdate`]: what subscribers receive after each command
//! - [`SessionConfig`]: channel size plus lobby and combat rules

mod authorize;
mod config;
mod coordinator;
mod error;
mod session;

pub use authorize::authorize;
pub use config::{DEFAULT_CHANNEL_SIZE, SessionConfig, SessionStatus};
pub use coordinator::SessionCoordinator;
pub use error::SessionError;
pub use session::{CommandReceipt, SessionHandle, SessionSnapshot, SessionUpdate, UpdateSender};
