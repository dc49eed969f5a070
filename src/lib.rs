//! # Nagare: Component Runtime for ETL Pipelines
//!
//! Nagare hosts data-processing systems assembled from uniformly managed
//! components. A component is anything with an identity; capabilities such
//! as start/stop lifecycle, initialization-time wiring, and
//! request/response execution are opted into per type.
//!
//! ## Architecture
//!
//! The runtime is organized around a handful of collaborating managers:
//! - Component model and capability traits ([`component`])
//! - Thread-safe factory and instance catalog ([`registry`])
//! - Root composition and bulk lifecycle ([`system`])
//! - Out-of-process plugin hosting and discovery ([`plugin`])
//! - ETL process groups and scheduling ([`process`])
//!
//! ## Event-Based Observation
//!
//! Lifecycle changes are announced on a broadcast [`event_bus`], keeping
//! observers decoupled from the managers that produce the events. Errors
//! travel on a dedicated channel so monitoring is unaffected by regular
//! traffic.
//!
//! ## Lifecycle
//!
//! Boot is two-phase: every declared component is constructed and
//! initialized before any of them becomes visible in the registry, so a
//! half-booted system is never observable. Bulk start and stop visit every
//! participant and report aggregated failures instead of stopping at the
//! first one.
//!
//! ```text
//! SystemConfig → System::initialize → System::start → execute/schedule → System::stop
//! ```

pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod plugin;
pub mod process;
pub mod registry;
pub mod system;

// Re-exports
pub use component::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use event_bus::*;
pub use registry::*;
pub use system::*;
