//! # festreg-id
//!
//! Typed identifiers for festreg resources.
//!
//! Every resource id is a ULID with a short resource prefix:
//!
//! - `usr_01HV4Z2WQXKJNM8GPQY6VBKC3D` (user)
//! - `spot_01HV4Z3MXNKPQR9HSTZ7WCLD4E` (spot type)
//! - `shf_01HV4Z4NYPLTRS0JTUA8XDME5F` (shift)
//!
//! The prefix keeps a shift id from ever being accepted where a user id is
//! expected, both in Rust and on the wire. ULIDs sort by creation time, which
//! gives list endpoints a stable default order.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
