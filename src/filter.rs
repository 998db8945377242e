//! Collision Filtering (Group/Mask System)
//!
//! 16-bit bitmask filtering for controlling which objects can interact.
//!
//! # Usage
//!
//! ```
//! use impulse3d::filter::{groups, CollisionFilter};
//!
//! let debris = CollisionFilter::new(groups::DEBRIS, groups::ALL & !groups::DEBRIS);
//! let crate_body = CollisionFilter::new(groups::DYNAMIC, groups::ALL);
//! let other_debris = debris;
//!
//! assert!(CollisionFilter::can_collide(&debris, &crate_body));
//! assert!(!CollisionFilter::can_collide(&debris, &other_debris));
//! ```

use crate::rigid_body::BodyKind;

/// Predefined collision groups
pub mod groups {
    /// Dynamic rigid bodies
    pub const DYNAMIC: u16 = 1;
    /// Static collision objects
    pub const STATIC: u16 = 2;
    /// Kinematic collision objects
    pub const KINEMATIC: u16 = 4;
    /// Debris
    pub const DEBRIS: u16 = 8;
    /// Trigger volumes (no collision response)
    pub const TRIGGER: u16 = 16;
    /// Characters
    pub const CHARACTER: u16 = 32;
    /// Projectiles
    pub const PROJECTILE: u16 = 64;
    /// First group bit free for applications
    pub const USER_MIN: u16 = 128;
    /// Last group bit free for applications
    pub const USER_MAX: u16 = 0x8000;
    /// Every group
    pub const ALL: u16 = 0xffff;
}

/// Collision filter using group/mask bitmasks.
///
/// Two objects can collide iff:
///   `(a.group & b.mask) != 0 && (b.group & a.mask) != 0`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollisionFilter {
    /// Group bits this object belongs to
    pub group: u16,
    /// Group bits this object collides with
    pub mask: u16,
}

impl CollisionFilter {
    /// Dynamic body default: collides with everything
    pub const DYNAMIC: Self = Self {
        group: groups::DYNAMIC,
        mask: groups::ALL,
    };

    /// Static object default: ignores other static and kinematic objects
    pub const STATIC: Self = Self {
        group: groups::STATIC,
        mask: groups::ALL & !(groups::STATIC | groups::KINEMATIC),
    };

    /// Kinematic object default: ignores static and kinematic objects
    pub const KINEMATIC: Self = Self {
        group: groups::KINEMATIC,
        mask: groups::ALL & !(groups::STATIC | groups::KINEMATIC),
    };

    /// Filter that collides with nothing
    pub const NONE: Self = Self { group: 0, mask: 0 };

    /// Create a new collision filter
    #[inline]
    pub const fn new(group: u16, mask: u16) -> Self {
        Self { group, mask }
    }

    /// Default filter for a body kind
    #[inline]
    pub const fn for_kind(kind: BodyKind) -> Self {
        match kind {
            BodyKind::Dynamic => Self::DYNAMIC,
            BodyKind::Static => Self::STATIC,
            BodyKind::Kinematic => Self::KINEMATIC,
        }
    }

    /// Check if two filters allow collision
    #[inline]
    pub fn can_collide(a: &Self, b: &Self) -> bool {
        (a.group & b.mask) != 0 && (b.group & a.mask) != 0
    }

    /// Whether a query with `group`/`mask` may see an object with this filter
    #[inline]
    pub fn accepts_query(&self, group: u16, mask: u16) -> bool {
        (self.group & mask) != 0 && (group & self.mask) != 0
    }

    /// Whether the object is in the trigger group
    #[inline]
    pub fn is_trigger(&self) -> bool {
        self.group & groups::TRIGGER != 0
    }
}

impl Default for CollisionFilter {
    #[inline]
    fn default() -> Self {
        Self::DYNAMIC
    }
}
