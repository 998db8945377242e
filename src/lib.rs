//! # impulse3d
//!
//! **Real-Time Rigid-Body Physics**
//!
//! A 3D rigid-body engine for games and interactive simulation: convex and
//! mesh collision through GJK/EPA, persistent contact manifolds, a
//! sequential-impulse solver with split-impulse penetration recovery,
//! island sleeping and conservative-advancement continuous collision.
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **Shapes** | Sphere, box, capsule, cylinder, cone, convex hull, plane, triangle mesh |
//! | **Narrow phase** | GJK distance, EPA penetration depth, per-triangle mesh expansion |
//! | **Contact manifolds** | Up to four persistent points per shape pair, warm-started |
//! | **Solver** | Sequential impulses with friction, restitution and split-impulse bias |
//! | **Constraints** | Point-to-point (ball socket) between bodies or to the world |
//! | **Sleeping** | Union-find islands, delayed sleep, wake on contact or write |
//! | **Continuous collision** | Time-of-impact sweeps for fast and kinematic bodies |
//! | **Broad phase** | Pluggable [`SpatialIndex`], dynamic AABB tree by default |
//! | **Queries** | Ray test and convex sweep test |
//! | **Events** | Pre-solve, added, processed and removed contact callbacks |
//!
//! ## Conventions
//!
//! - Right-handed, Y up, SI units; gravity defaults to `(0, -10, 0)`
//! - Contact normals point from body A toward body B
//! - Signed distances are negative while shapes overlap
//!
//! ## Quick Start
//!
//! ```rust
//! use impulse3d::prelude::*;
//! use std::sync::Arc;
//!
//! let mut world: PhysicsWorld = PhysicsWorld::new(WorldConfig::default()).unwrap();
//!
//! let ground = Arc::new(Shape::plane(Vec3::Y, 0.0).unwrap());
//! world.add_body(RigidBody::new_static(ground));
//!
//! let ball = Arc::new(Shape::sphere(0.5).unwrap());
//! let handle = world.add_body(
//!     RigidBody::new_dynamic(ball, 1.0)
//!         .unwrap()
//!         .with_position(Vec3::new(0.0, 3.0, 0.0)),
//! );
//!
//! for _ in 0..120 {
//!     world.update(1.0 / 60.0);
//! }
//!
//! let y = world.body(handle).unwrap().position().y;
//! assert!(y > 0.4 && y < 0.6);
//! ```
//!
//! ## Queries
//!
//! ```rust
//! use impulse3d::prelude::*;
//! use std::sync::Arc;
//!
//! let mut world: PhysicsWorld = PhysicsWorld::default();
//! let wall = Arc::new(Shape::cuboid(Vec3::new(0.5, 2.0, 2.0), 0.04).unwrap());
//! let target = world.add_body(RigidBody::new_static(wall).with_position(Vec3::new(5.0, 0.0, 0.0)));
//!
//! let hit = world
//!     .ray_test(&RayTestParams::new(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)))
//!     .unwrap();
//! assert_eq!(hit.body, target);
//! assert!((hit.factor - 0.45).abs() < 1e-3);
//! ```

pub mod box_collider;
pub mod bvh;
pub mod ccd;
pub mod collider;
pub mod cone;
pub mod config;
pub mod contact_cache;
pub mod convex_mesh_builder;
pub mod cylinder;
pub mod dynamic_bvh;
pub mod error;
pub mod event;
pub mod filter;
pub mod gjk;
pub mod joint;
pub mod math;
pub mod narrow_phase;
pub mod plane_collider;
pub mod pool;
pub mod profiling;
pub mod query;
pub mod raycast;
pub mod rigid_body;
pub mod sleeping;
pub mod solver;
pub mod spatial;
pub mod trimesh;
pub mod world;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::collider::{Shape, ShapeId, ShapeKind, Support, AABB, DEFAULT_MARGIN};
    pub use crate::config::{PhysicsConfig, WorldConfig};
    pub use crate::contact_cache::{Arbiter, ArbiterKey, ContactPoint};
    pub use crate::dynamic_bvh::DynamicAabbTree;
    pub use crate::error::{PhysicsError, PhysicsResult};
    pub use crate::event::{ContactCallbacks, ContactEvent, ContactEventType};
    pub use crate::filter::{groups, CollisionFilter};
    pub use crate::joint::{ConstraintHandle, Point2PointConstraint};
    pub use crate::math::Transform;
    pub use crate::profiling::{PerformanceData, ProfileEntry, Stage, StepStats};
    pub use crate::query::{ConvexSweepParams, RayHit, RayTestParams, SweepHit};
    pub use crate::raycast::{Ray, ShapeRayHit};
    pub use crate::rigid_body::{BodyHandle, BodyKind, RigidBody};
    pub use crate::spatial::SpatialIndex;
    pub use crate::trimesh::TriangleArray;
    pub use crate::world::PhysicsWorld;
    pub use glam::{Mat3, Quat, Vec3};
}

// Re-export main types at crate root
pub use prelude::*;

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::sync::Arc;

    fn stack(world: &mut PhysicsWorld, height: usize) -> Vec<BodyHandle> {
        let cube = Arc::new(Shape::cuboid(Vec3::splat(0.5), 0.04).unwrap());
        (0..height)
            .map(|i| {
                world.add_body(
                    RigidBody::new_dynamic(cube.clone(), 1.0)
                        .unwrap()
                        .with_position(Vec3::new(0.0, 0.5 + i as f32 * 1.01, 0.0)),
                )
            })
            .collect()
    }

    #[test]
    fn test_stack_stays_upright() {
        let mut world: PhysicsWorld = PhysicsWorld::default();
        world.add_body(RigidBody::new_static(Arc::new(Shape::plane(Vec3::Y, 0.0).unwrap())));
        let boxes = stack(&mut world, 4);
        for _ in 0..240 {
            world.update(1.0 / 60.0);
        }
        for (i, &h) in boxes.iter().enumerate() {
            let p = world.body(h).unwrap().position();
            assert!(p.x.abs() < 0.1 && p.z.abs() < 0.1, "box {i} slid to {p}");
            assert!((p.y - (0.5 + i as f32)).abs() < 0.15, "box {i} at height {}", p.y);
        }
    }

    #[test]
    fn test_sleeping_pile_is_free_in_broadphase() {
        let mut world: PhysicsWorld = PhysicsWorld::default();
        world.add_body(RigidBody::new_static(Arc::new(Shape::plane(Vec3::Y, 0.0).unwrap())));
        let boxes = stack(&mut world, 2);
        for _ in 0..400 {
            world.update(1.0 / 60.0);
        }
        assert!(boxes.iter().all(|&h| world.body(h).unwrap().is_sleeping()));
        assert_eq!(world.performance_data().stats.broadphase_pairs, 0);
    }

    #[test]
    fn test_shape_reuse_across_bodies() {
        let ball = Arc::new(Shape::sphere(0.25).unwrap());
        let mut world: PhysicsWorld = PhysicsWorld::default();
        for i in 0..8 {
            world.add_body(
                RigidBody::new_dynamic(ball.clone(), 1.0)
                    .unwrap()
                    .with_position(Vec3::new(i as f32, 1.0, 0.0)),
            );
        }
        assert_eq!(Arc::strong_count(&ball), 9);
        assert_eq!(world.body_count(), 8);
    }
}
