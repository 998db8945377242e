//! Physics Error Types
//!
//! Unified error type for the engine. Construction of shapes, bodies and
//! constraints, world mutation and configuration validation return
//! `PhysicsResult<T>`. The per-step numerics never fail: GJK, EPA and the
//! continuous sweeps fall back to "no result" or their best estimate.

use thiserror::Error;

use crate::rigid_body::BodyHandle;
use crate::joint::ConstraintHandle;

/// Unified error type for physics operations.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PhysicsError {
    /// Geometric shape parameters are invalid.
    #[error("invalid shape: {reason}")]
    InvalidShape {
        /// Human-readable description of the problem
        reason: &'static str,
    },
    /// A dynamic body was given a non-positive or non-finite mass.
    #[error("invalid mass {mass} for a dynamic body")]
    InvalidMass {
        /// The rejected mass
        mass: f32,
    },
    /// The handle does not refer to a body in this world.
    #[error("body {handle:?} not found")]
    BodyNotFound {
        /// The stale or foreign handle
        handle: BodyHandle,
    },
    /// The handle does not refer to a constraint in this world.
    #[error("constraint {handle:?} not found")]
    ConstraintNotFound {
        /// The stale or foreign handle
        handle: ConstraintHandle,
    },
    /// A constraint is malformed.
    #[error("invalid constraint: {reason}")]
    InvalidConstraint {
        /// Human-readable description of the problem
        reason: &'static str,
    },
    /// Invalid configuration parameter.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the invalid configuration
        reason: &'static str,
    },
    /// The transform of an active dynamic body cannot be overwritten.
    #[error("body {handle:?} is simulated; its transform can only be set while asleep or outside a world")]
    BodyInWorld {
        /// The body that rejected the write
        handle: BodyHandle,
    },
    /// Static bodies never move, so they take no velocity.
    #[error("body {handle:?} is static and cannot be given a velocity")]
    StaticBody {
        /// The body that rejected the write
        handle: BodyHandle,
    },
}

/// Result alias used throughout the crate.
pub type PhysicsResult<T> = Result<T, PhysicsError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = PhysicsError::InvalidShape {
            reason: "convex hull needs at least 3 vertices",
        };
        let s = e.to_string();
        assert!(s.contains("invalid shape"));
        assert!(s.contains("3 vertices"));
    }

    #[test]
    fn test_error_mass_display() {
        let s = PhysicsError::InvalidMass { mass: -1.0 }.to_string();
        assert!(s.contains("-1"), "should contain the rejected mass: {s}");
    }

    #[test]
    fn test_error_variants_differ() {
        let e1 = PhysicsError::InvalidConstraint {
            reason: "body A == body B",
        };
        let e2 = PhysicsError::InvalidConfiguration {
            reason: "fixed_time_step must be positive",
        };
        assert_ne!(e1, e2);
    }

    #[test]
    fn test_error_is_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        assert_error(&PhysicsError::InvalidShape { reason: "x" });
    }
}
