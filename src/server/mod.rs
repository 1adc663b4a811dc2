//! The dev server: static files over HTTP, and a reload signal for open
//! browser tabs.

#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod reload;

#[cfg(feature = "server")]
pub use http::serve;
#[cfg(feature = "live")]
pub use reload::{ReloadHub, reserve_port};

/// Tells every connected viewer to refresh.
pub trait Reload: Send + Sync {
    fn reload(&self);
}
