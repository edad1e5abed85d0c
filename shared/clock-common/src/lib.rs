//! Shared libclock contracts.
//!
//! This crate is the Rust source of truth for everything that crosses the
//! callback boundary of libclock:
//! - the three-way status code (`RET_OK`, `RET_ERR`, `RET_MISSING_CALLBACK`)
//! - alarm identity
//! - the length-prefixed binary framing of alarm records and snapshots

pub mod record;
pub mod status;

pub use record::*;
pub use status::*;
