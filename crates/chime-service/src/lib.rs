//! Chime reminder service - durable, partitioned reminders for a cluster.
//!
//! Each cluster member runs a [`ReminderPartitionService`] that owns the
//! reminders hashed into its slice of the ring:
//!
//! - **Partition ownership**: follows ring range changes, dropping timers
//!   for lost ranges and loading rows for gained ones
//! - **Firing**: ticks land on the `start_at + k * period` grid and are
//!   delivered to a [`ReminderSink`] at least once
//! - **Routing**: [`ReminderRegistry`] validates requests and forwards them
//!   to the member owning the target
//! - **Operations**: [`ReminderManagement`] and the HTTP [`api`] expose
//!   cluster-wide queries and storage migration controls
//!
//! # Example
//!
//! ```ignore
//! use chime_service::{ReminderRegistry, INFINITE};
//! use chrono::TimeDelta;
//!
//! let reminders = registry.for_target("order/42");
//! let handle = reminders
//!     .register_or_update("expire", TimeDelta::minutes(30), INFINITE)
//!     .await?;
//! reminders.unregister(&handle).await?;
//! ```

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod management;
pub mod partition;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod sink;

mod timers;

// Re-export main types
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use config::{ApiConfig, ChimeConfig, ConfigError, RingConfig, ServiceConfig};
pub use error::{DeliveryError, ReminderError, Result};
pub use management::{ReminderManagement, ReminderPage, ReminderView};
pub use partition::{ReminderPartitionService, ServiceStatus};
pub use registry::{ReminderRegistry, TargetReminders, INFINITE};
pub use schedule::TickStatus;
pub use service::{ReminderHandle, ReminderService};
pub use sink::{LoggingSink, ReminderSink};
