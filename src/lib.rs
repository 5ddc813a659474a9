//! reapr - Container lifecycle reaper for a CI control plane
//!
//! Build containers are kept alive with an infinite TTL so retried builds can
//! reuse their cache. reapr decides which of those containers still have a
//! future and releases the rest to a finite TTL.

pub mod domain;
pub mod error;
pub mod reaper;
pub mod store;

pub use error::{ReaprError, Result};
pub use reaper::{ContainerReaper, ReaperConfig};
