//! Top-level facade crate for wspoll.
//!
//! Re-exports the protocol core and the polling engine so users can depend on a single crate.

pub mod core {
    pub use wspoll_core::*;
}

pub mod engine {
    pub use wspoll_engine::*;
}
