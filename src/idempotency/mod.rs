//! Idempotency module
//!
//! Prevents duplicate processing of retried requests keyed by the caller's
//! external reference.

mod resolver;

pub use resolver::{IdempotencyResolver, MAX_REFERENCE_LEN};
