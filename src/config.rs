//! Engine Configuration
//!
//! Two layers of configuration:
//!
//! - [`PhysicsConfig`]: numeric thresholds used by the narrow phase, the
//!   contact manager, the solver, the sleep manager and the continuous
//!   collision subsystem. The defaults are tuned for meter-scale objects.
//! - [`WorldConfig`]: gravity, timestep splitting and iteration counts, with
//!   an embedded [`PhysicsConfig`].
//!
//! Both serialize with the `serde` feature.

use glam::Vec3;

use crate::error::{PhysicsError, PhysicsResult};

/// Numeric thresholds shared by every pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PhysicsConfig {
    // --- narrow phase ---
    /// GJK iteration cap
    pub gjk_max_iterations: u32,
    /// Squared core distance below which GJK reports touching
    pub gjk_touching_sq: f32,
    /// Relative improvement of the separating axis below which GJK stops
    pub gjk_fractional_threshold: f32,
    /// Separation beyond which pairs are reported as separated without contact
    pub contact_distance: f32,
    /// EPA iteration cap
    pub epa_max_iterations: u32,
    /// EPA convergence tolerance along the face normal
    pub epa_tolerance: f32,

    // --- contact manager ---
    /// Squared anchor distance under which a new point replaces an old one exactly
    pub contact_equal_sq: f32,
    /// Squared anchor distance under which a new point seeds from the nearest cached impulse
    pub contact_inherit_sq: f32,
    /// Separation along the normal beyond which a persisted point is dropped
    pub contact_max_y_separation: f32,
    /// Squared lateral drift beyond which a persisted point is dropped
    pub contact_max_lateral_sq: f32,
    /// Cosine below which convex-pair points with a diverging normal are culled
    pub contact_normal_cos: f32,

    // --- solver ---
    /// Positional bias factor for dynamic-dynamic contacts
    pub contact_baumgarte: f32,
    /// Positional bias factor when either body is static
    pub contact_static_baumgarte: f32,
    /// Penetration tolerated without positional correction
    pub contact_slop: f32,
    /// Squared approach speed under which restitution is ignored
    pub restitution_velocity_sq: f32,

    // --- sleeping ---
    /// Squared linear rest threshold, scaled by the squared body radius
    pub sleep_linear_sq: f32,
    /// Squared angular rest threshold
    pub sleep_angular_sq: f32,
    /// Consecutive rest steps before an island falls asleep
    pub sleep_delay_steps: u32,

    // --- continuous collision ---
    /// Squared per-step displacement, relative to radius squared, that makes a bullet
    pub continuous_linear_sq: f32,
    /// Squared per-step rotation angle that makes a bullet
    pub continuous_angular_sq: f32,
    /// Separation at which a sweep reports impact
    pub continuous_slop: f32,
    /// Conservative advancement iteration cap
    pub continuous_max_iterations: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gjk_max_iterations: 100,
            gjk_touching_sq: 1e-8,
            gjk_fractional_threshold: 1e-4,
            contact_distance: 0.04,
            epa_max_iterations: 100,
            epa_tolerance: 1e-4,

            contact_equal_sq: 0.02 * 0.02,
            contact_inherit_sq: 0.1 * 0.1,
            contact_max_y_separation: 0.05,
            contact_max_lateral_sq: 0.05 * 0.05,
            contact_normal_cos: 0.9,

            contact_baumgarte: 0.2,
            contact_static_baumgarte: 0.3,
            contact_slop: 0.015,
            restitution_velocity_sq: 0.25,

            sleep_linear_sq: 0.01,
            sleep_angular_sq: 0.01,
            sleep_delay_steps: 60,

            continuous_linear_sq: 0.25,
            continuous_angular_sq: 0.25,
            continuous_slop: 0.01,
            continuous_max_iterations: 32,
        }
    }
}

/// World-level simulation parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WorldConfig {
    /// Gravity acceleration
    pub gravity: Vec3,
    /// Maximum substeps per `update`
    pub max_sub_steps: u32,
    /// Substep length in fixed mode
    pub fixed_time_step: f32,
    /// Derive the substep length from elapsed time instead of using `fixed_time_step`
    pub variable_time_steps: bool,
    /// Longest substep the stepper accepts before dropping the backlog
    pub max_give_up_time_step: f32,
    /// Shortest substep in variable mode
    pub minimum_time_step: f32,
    /// Longest substep in variable mode before splitting
    pub maximum_time_step: f32,
    /// Velocity iterations per substep
    pub velocity_iterations: u32,
    /// Bias (split-impulse) passes per substep
    pub position_iterations: u32,
    /// Thresholds
    pub physics: PhysicsConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -10.0, 0.0),
            max_sub_steps: 10,
            fixed_time_step: 1.0 / 60.0,
            variable_time_steps: false,
            max_give_up_time_step: 1.0 / 20.0,
            minimum_time_step: 1.0 / 70.0,
            maximum_time_step: 1.0 / 50.0,
            velocity_iterations: 10,
            position_iterations: 3,
            physics: PhysicsConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Check every parameter the stepper divides by or loops on.
    pub fn validate(&self) -> PhysicsResult<()> {
        if !self.gravity.is_finite() {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "gravity must be finite",
            });
        }
        if self.max_sub_steps == 0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "max_sub_steps must be at least 1",
            });
        }
        let steps = [
            self.fixed_time_step,
            self.max_give_up_time_step,
            self.minimum_time_step,
            self.maximum_time_step,
        ];
        if steps.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "timesteps must be positive and finite",
            });
        }
        if self.minimum_time_step > self.maximum_time_step {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "minimum_time_step exceeds maximum_time_step",
            });
        }
        if self.velocity_iterations == 0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "velocity_iterations must be at least 1",
            });
        }
        let p = &self.physics;
        if p.gjk_max_iterations == 0 || p.epa_max_iterations == 0 || p.continuous_max_iterations == 0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "iteration caps must be at least 1",
            });
        }
        if p.contact_slop < 0.0 || p.contact_distance < 0.0 || p.continuous_slop <= 0.0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "contact tolerances must be non-negative",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(WorldConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_caps() {
        let c = PhysicsConfig::default();
        assert_eq!(c.gjk_max_iterations, 100);
        assert_eq!(c.epa_max_iterations, 100);
        assert!(c.contact_equal_sq < c.contact_inherit_sq);
        assert!(c.contact_static_baumgarte > c.contact_baumgarte);
    }

    #[test]
    fn test_reject_zero_substeps() {
        let cfg = WorldConfig {
            max_sub_steps: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PhysicsError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_reject_negative_timestep() {
        let cfg = WorldConfig {
            fixed_time_step: -0.01,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_reject_inverted_variable_range() {
        let cfg = WorldConfig {
            minimum_time_step: 0.1,
            maximum_time_step: 0.01,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
