//! Contact Event System
//!
//! Arbiter lifecycle events (pre-solve/added/processed/removed) are queued
//! while a substep runs and dispatched once it completes, so a callback
//! never observes a half-updated world. The queued events of the last
//! `update` stay readable through [`EventCollector::contact_events`].
//!
//! Per-body [`ContactCallbacks`] filter events by the partner's collision
//! group.

use std::fmt;

use glam::Vec3;

use crate::rigid_body::BodyHandle;

/// Type of contact event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContactEventType {
    /// Touching arbiter about to enter constraint preStep
    PreSolve,
    /// Arbiter gained a new contact point
    Added,
    /// Touching arbiter went through the solver this substep
    Processed,
    /// Arbiter retired
    Removed,
}

/// A contact event between two bodies
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactEvent {
    /// Body the event is reported to
    pub body: BodyHandle,
    /// The partner body
    pub other: BodyHandle,
    /// Event type
    pub event_type: ContactEventType,
    /// Contact normal, from `body` toward `other`
    pub normal: Vec3,
    /// Deepest contact point on `body` (world space)
    pub point: Vec3,
    /// Signed separation of the deepest point (negative = penetration)
    pub distance: f32,
    /// Points in the manifold when the event was queued
    pub contact_count: usize,
    /// Collision group of `other`
    pub other_group: u16,
    /// Collision group of `body`
    pub body_group: u16,
}

impl ContactEvent {
    /// The same event seen from the partner
    #[must_use]
    pub fn flipped(&self, point_on_other: Vec3) -> Self {
        Self {
            body: self.other,
            other: self.body,
            normal: -self.normal,
            point: point_on_other,
            other_group: self.body_group,
            body_group: self.other_group,
            ..*self
        }
    }
}

/// Boxed contact callback
pub type ContactCallback = Box<dyn FnMut(&ContactEvent) + Send>;

/// Per-body contact callbacks
///
/// A callback fires only when `mask & partner.group != 0`.
pub struct ContactCallbacks {
    /// Partner groups this body wants to hear about
    pub mask: u16,
    /// Before constraint preStep
    pub on_pre_solve: Option<ContactCallback>,
    /// New contact point
    pub on_added: Option<ContactCallback>,
    /// After the solver processed a touching arbiter
    pub on_processed: Option<ContactCallback>,
    /// Arbiter retired
    pub on_removed: Option<ContactCallback>,
}

impl ContactCallbacks {
    /// Empty callback set listening to `mask`
    pub fn new(mask: u16) -> Self {
        Self {
            mask,
            on_pre_solve: None,
            on_added: None,
            on_processed: None,
            on_removed: None,
        }
    }

    /// Set the pre-solve callback
    pub fn with_pre_solve(mut self, f: impl FnMut(&ContactEvent) + Send + 'static) -> Self {
        self.on_pre_solve = Some(Box::new(f));
        self
    }

    /// Set the added callback
    pub fn with_added(mut self, f: impl FnMut(&ContactEvent) + Send + 'static) -> Self {
        self.on_added = Some(Box::new(f));
        self
    }

    /// Set the processed callback
    pub fn with_processed(mut self, f: impl FnMut(&ContactEvent) + Send + 'static) -> Self {
        self.on_processed = Some(Box::new(f));
        self
    }

    /// Set the removed callback
    pub fn with_removed(mut self, f: impl FnMut(&ContactEvent) + Send + 'static) -> Self {
        self.on_removed = Some(Box::new(f));
        self
    }

    /// Whether an event of `ty` against a partner in `other_group` is wanted
    #[inline]
    pub fn wants(&self, ty: ContactEventType, other_group: u16) -> bool {
        self.mask & other_group != 0 && self.slot_ref(ty).is_some()
    }

    fn slot_ref(&self, ty: ContactEventType) -> Option<&ContactCallback> {
        match ty {
            ContactEventType::PreSolve => self.on_pre_solve.as_ref(),
            ContactEventType::Added => self.on_added.as_ref(),
            ContactEventType::Processed => self.on_processed.as_ref(),
            ContactEventType::Removed => self.on_removed.as_ref(),
        }
    }

    /// Invoke the matching callback if the mask allows it
    pub fn dispatch(&mut self, event: &ContactEvent) {
        if self.mask & event.other_group == 0 {
            return;
        }
        let slot = match event.event_type {
            ContactEventType::PreSolve => self.on_pre_solve.as_mut(),
            ContactEventType::Added => self.on_added.as_mut(),
            ContactEventType::Processed => self.on_processed.as_mut(),
            ContactEventType::Removed => self.on_removed.as_mut(),
        };
        if let Some(f) = slot {
            f(event);
        }
    }
}

impl fmt::Debug for ContactCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactCallbacks")
            .field("mask", &self.mask)
            .field("on_pre_solve", &self.on_pre_solve.is_some())
            .field("on_added", &self.on_added.is_some())
            .field("on_processed", &self.on_processed.is_some())
            .field("on_removed", &self.on_removed.is_some())
            .finish()
    }
}

/// Event queued for dispatch, with the partner's witness point
#[derive(Clone, Copy, Debug)]
pub(crate) struct PendingEvent {
    pub event: ContactEvent,
    pub point_on_other: Vec3,
}

/// Collects contact events for one `update`
#[derive(Debug, Default)]
pub struct EventCollector {
    /// Events of the current `update`, oriented A -> B
    contact_events: Vec<ContactEvent>,
    /// Events of the running substep, awaiting dispatch
    pending: Vec<PendingEvent>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new `update`: forget the previous events
    ///
    /// Undispatched events, such as those raised by removing a body between
    /// updates, stay queued for the next dispatch.
    pub fn begin_frame(&mut self) {
        self.contact_events.clear();
    }

    /// Queue an event oriented from A to B
    pub(crate) fn report(&mut self, event: ContactEvent, point_on_other: Vec3) {
        self.contact_events.push(event);
        self.pending.push(PendingEvent {
            event,
            point_on_other,
        });
    }

    /// Hand over the events awaiting dispatch
    pub(crate) fn take_pending(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Give the drained buffer back for reuse
    pub(crate) fn recycle(&mut self, mut buffer: Vec<PendingEvent>) {
        if self.pending.is_empty() {
            buffer.clear();
            self.pending = buffer;
        }
    }

    /// All contact events of the last `update`
    #[inline]
    pub fn contact_events(&self) -> &[ContactEvent] {
        &self.contact_events
    }

    /// Events of one type
    pub fn events_of(&self, ty: ContactEventType) -> impl Iterator<Item = &ContactEvent> + '_ {
        self.contact_events.iter().filter(move |e| e.event_type == ty)
    }

    /// Check if there are any events this frame
    #[inline]
    pub fn has_events(&self) -> bool {
        !self.contact_events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(ty: ContactEventType, other_group: u16) -> ContactEvent {
        ContactEvent {
            body: BodyHandle::new(0, 0),
            other: BodyHandle::new(1, 0),
            event_type: ty,
            normal: Vec3::Y,
            point: Vec3::ZERO,
            distance: -0.01,
            contact_count: 1,
            other_group,
            body_group: 1,
        }
    }

    #[test]
    fn test_callbacks_respect_mask() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let mut cb = ContactCallbacks::new(0b10).with_added(move |_| {
            h.fetch_add(1, Ordering::Relaxed);
        });
        cb.dispatch(&event(ContactEventType::Added, 0b01));
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        cb.dispatch(&event(ContactEventType::Added, 0b10));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        // no removed callback registered
        cb.dispatch(&event(ContactEventType::Removed, 0b10));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(cb.wants(ContactEventType::Added, 0b10));
        assert!(!cb.wants(ContactEventType::Removed, 0b10));
    }

    #[test]
    fn test_flipped_event() {
        let e = event(ContactEventType::Processed, 4);
        let f = e.flipped(Vec3::new(0.0, 0.1, 0.0));
        assert_eq!(f.body, e.other);
        assert_eq!(f.other, e.body);
        assert_eq!(f.normal, -Vec3::Y);
        assert_eq!(f.other_group, 1);
        assert_eq!(f.body_group, 4);
    }

    #[test]
    fn test_collector_frame() {
        let mut events = EventCollector::new();
        events.report(event(ContactEventType::Added, 1), Vec3::ZERO);
        events.report(event(ContactEventType::Processed, 1), Vec3::ZERO);
        assert!(events.has_events());
        assert_eq!(events.events_of(ContactEventType::Added).count(), 1);
        let pending = events.take_pending();
        assert_eq!(pending.len(), 2);
        events.recycle(pending);
        assert_eq!(events.contact_events().len(), 2);

        events.begin_frame();
        assert!(!events.has_events());
    }
}
