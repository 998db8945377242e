//! Basic 3D Physics Example
//!
//! Demonstrates creating a physics world, adding bodies and a joint,
//! listening to contact events and stepping the simulation.
//!
//! ```bash
//! RUST_LOG=impulse3d=debug cargo run --example basic_physics
//! ```

use std::sync::Arc;

use impulse3d::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Configure the physics world
    let config = WorldConfig {
        gravity: Vec3::new(0.0, -9.81, 0.0),
        velocity_iterations: 12,
        ..WorldConfig::default()
    };
    let mut world: PhysicsWorld = PhysicsWorld::new(config)?;

    // Static floor at y=0
    world.add_body(RigidBody::new_static(Arc::new(Shape::plane(Vec3::Y, 0.0)?)));

    // A box dropped from y=5 that reports its landing
    let cube = Arc::new(Shape::cuboid(Vec3::splat(0.5), DEFAULT_MARGIN)?);
    let callbacks = ContactCallbacks::new(groups::ALL).with_added(|e| {
        println!("  contact added: {:?} hit {:?} at {:.2}", e.body, e.other, e.point);
    });
    let crate_box = world.add_body(
        RigidBody::new_dynamic(cube, 2.0)?
            .with_position(Vec3::new(0.0, 5.0, 0.0))
            .with_callbacks(callbacks),
    );

    // A pendulum hanging from a world pivot
    let bob = world.add_body(
        RigidBody::new_dynamic(Arc::new(Shape::sphere(0.3)?), 1.0)?
            .with_position(Vec3::new(3.0, 4.0, 0.0))
            .with_linear_velocity(Vec3::new(0.0, 0.0, 2.0)),
    );
    world.add_constraint(Point2PointConstraint::new_world_anchor(
        bob,
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(3.0, 5.0, 0.0),
    ))?;

    println!("Simulating 3 seconds at 60 Hz...");
    for frame in 0..180 {
        world.update(1.0 / 60.0);
        if frame % 30 == 29 {
            let b = world.body(crate_box)?;
            let p = world.body(bob)?;
            println!(
                "t={:.1}s box y={:.3} sleeping={} bob={:.2}",
                (frame + 1) as f32 / 60.0,
                b.position().y,
                b.is_sleeping(),
                p.position(),
            );
        }
    }

    // Look down from above the box
    let hit = world.ray_test(&RayTestParams::new(Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, -1.0, 0.0)));
    if let Some(hit) = hit {
        println!("ray hit {:?} at {:.3}", hit.body, hit.point);
    }

    let perf = world.performance_data();
    for (name, last, average, peak) in perf.summary() {
        println!("{name:>20}: last {last:?} avg {average:?} peak {peak:?}");
    }
    println!("{:?}", perf.stats);
    Ok(())
}
