//! Error types for the ringkit library.
//!
//! ## Key Components
//!
//! - [`SelectError`]: Returned by every fallible selector, fleet, and
//!   rebuild operation. Each variant corresponds to one failure class of
//!   the selection engine; success is the `Ok` arm of `Result`.
//!
//! ## Example Usage
//!
//! ```
//! use ringkit::builder::{Distribution, SelectorBuilder};
//! use ringkit::error::SelectError;
//!
//! let selector = SelectorBuilder::new()
//!     .distribution(Distribution::ConsistentKetama)
//!     .build()
//!     .unwrap();
//!
//! // UDP transports were retired; the call reports it instead of panicking.
//! let err = selector.server_add_udp("10.0.1.1", 11211).unwrap_err();
//! assert_eq!(err, SelectError::Deprecated);
//! ```

use std::fmt;

/// Error returned by selector, fleet, and continuum operations.
///
/// Failed operations leave the selector structurally intact: either the new
/// state is fully installed or the previous state is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    /// An internal buffer or table could not be produced. Also raised when a
    /// generated ring label would overflow its bounded buffer, which only
    /// happens for pathological hostnames.
    MemoryAllocation(String),
    /// A caller-supplied parameter failed validation.
    InvalidArguments(String),
    /// The named server is not part of the fleet.
    NotFound,
    /// The operation would leave the fleet in an unusable state, such as
    /// removing more servers than exist.
    SomeErrors,
    /// The requested transport or operation has been retired.
    Deprecated,
    /// An internal operation failed without a more specific classification.
    Failure(String),
    /// The wall clock could not be read.
    Clock(String),
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectError::MemoryAllocation(msg) => write!(f, "allocation failure: {}", msg),
            SelectError::InvalidArguments(msg) => write!(f, "invalid arguments: {}", msg),
            SelectError::NotFound => f.write_str("server not found"),
            SelectError::SomeErrors => f.write_str("operation partially failed"),
            SelectError::Deprecated => f.write_str("operation is deprecated"),
            SelectError::Failure(msg) => write!(f, "failure: {}", msg),
            SelectError::Clock(msg) => write!(f, "wall clock read failed: {}", msg),
        }
    }
}

impl std::error::Error for SelectError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
