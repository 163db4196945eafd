//! Lokstra — the application-facing facade crate.
//!
//! Re-exports the router engine, handler adapter, service registry, and
//! proxy/auto-router bridge from `lokstra-core`, plus the `#[derive(Bind)]`
//! macro from `lokstra-macros`, through a single dependency. Import
//! everything a handler module needs with:
//!
//! ```ignore
//! use lokstra::prelude::*;
//! ```

pub use lokstra_core::*;
pub use lokstra_macros::Bind;

/// Unified prelude — import everything with `use lokstra::prelude::*`.
pub mod prelude {
    pub use lokstra_core::prelude::*;
}
