//! Delivery of artifacts to destinations with bounded retry.
//!
//! ```text
//! Dispatcher::dispatch(artifact)
//!   ├── push_with_retry(A)  ──► Outcome { A, Ok(receipt) }
//!   └── push_with_retry(B)  ──► Outcome { B, Err(Exhausted) }
//! ```
//!
//! Each destination gets its own task and its own retry loop. Outcomes are
//! collected in registration order.

mod backoff;
mod dispatcher;
mod error;

pub use backoff::{RetryPolicy, sleep_or_cancel};
pub use dispatcher::{Dispatcher, Outcome, push_with_retry};
pub use error::{DeliveryError, DispatchError};
