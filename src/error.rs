//! Physics Error Types
//!
//! Unified error type for the kinetic2d engine. Fallible operations
//! (construction requests, capacity-bounded queues, structural mutation)
//! return `Result<T, PhysicsError>` instead of panicking; a hard-realtime
//! step loop never uses unwinding as control flow.

use thiserror::Error;

/// Unified error type for physics operations.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PhysicsError {
    /// A handle refers to a slot that has been freed or reused.
    #[error("stale handle (index {index}, generation {generation})")]
    StaleHandle { index: u32, generation: u32 },

    /// A construction request carried invalid data and was rejected.
    #[error("invalid construction request: {reason}")]
    InvalidRequest { reason: &'static str },

    /// A capacity limit was exceeded (world pool, ray-cast queue, overlap cache).
    #[error("{resource} capacity exceeded (limit={limit})")]
    CapacityExceeded { resource: &'static str, limit: usize },

    /// Structural mutation was attempted while the world was stepping.
    #[error("world is locked (mutation attempted during step)")]
    WorldLocked,

    /// Invalid configuration parameter.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: &'static str },

    /// A zero-length direction was provided where a segment is required.
    #[error("zero-length vector in {context}")]
    ZeroLengthVector { context: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = PhysicsError::CapacityExceeded {
            resource: "ray-cast queue",
            limit: 64,
        };
        let s = format!("{}", e);
        assert!(s.contains("ray-cast queue"));
        assert!(s.contains("64"));
    }

    #[test]
    fn test_error_variants_distinct() {
        let e1 = PhysicsError::WorldLocked;
        let e2 = PhysicsError::InvalidRequest {
            reason: "dynamic body with zero mass",
        };
        assert_ne!(e1, e2);
    }
}
