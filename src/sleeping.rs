//! Sleeping and Island Management
//!
//! Every step the awake dynamic bodies are grouped into islands: connected
//! components of the graph whose edges are touching arbiters and
//! constraints. Static and kinematic objects never join an island, so a
//! shared floor does not weld unrelated piles together.
//!
//! # Rest test
//!
//! A body rests while `|v|² < sleep_linear_sq * r²` and
//! `|ω|² < sleep_angular_sq`, `r` being its shape radius. Each body keeps
//! the step at which it last failed the test. An island's stamp is the
//! latest of its members' stamps and is copied back to all of them, so
//! resting next to a moving neighbour does not count toward sleep.
//!
//! An island falls asleep once every member rests, sleeping is permitted
//! for all of them, and `sleep_delay_steps` steps have passed since the
//! island stamp.
//!
//! Union-find runs on dense indices assigned per step (union by rank, path
//! halving); islands come from a [`Pool`] and are recycled every step.

use crate::pool::{Pool, Reset};

/// One body taking part in this step's island computation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IslandMember {
    /// Body slot index in the world
    pub body: u32,
    /// Passed the rest test this step
    pub at_rest: bool,
    /// Body allows sleeping
    pub permit_sleep: bool,
    /// Step at which the body last moved; rewritten with the island stamp
    pub wake_time_stamp: u64,
    /// Decision: the body goes to sleep
    pub sleep: bool,
}

/// Connected group of bodies
#[derive(Clone, Debug, Default)]
pub struct Island {
    /// Dense member indices
    pub members: Vec<u32>,
    /// Latest wake stamp of any member
    pub wake_time_stamp: u64,
    /// All members rest and permit sleeping
    pub at_rest: bool,
}

impl Reset for Island {
    fn reset(&mut self) {
        self.members.clear();
        self.wake_time_stamp = 0;
        self.at_rest = false;
    }
}

/// Island builder and sleep decider
#[derive(Debug, Default)]
pub struct IslandManager {
    parent: Vec<u32>,
    rank: Vec<u8>,
    island_of_root: Vec<u32>,
    islands: Pool<Island>,
    sleeping_islands: usize,
}

impl IslandManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new computation over `n` dense nodes
    pub fn reset(&mut self, n: usize) {
        self.parent.clear();
        self.parent.extend(0..n as u32);
        self.rank.clear();
        self.rank.resize(n, 0);
    }

    /// Root of `x`, halving the path on the way
    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grand = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grand;
            x = grand;
        }
        x
    }

    /// Merge the sets of `a` and `b`
    pub fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (ra_i, rb_i) = (ra as usize, rb as usize);
        match self.rank[ra_i].cmp(&self.rank[rb_i]) {
            std::cmp::Ordering::Less => self.parent[ra_i] = rb,
            std::cmp::Ordering::Greater => self.parent[rb_i] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb_i] = ra;
                self.rank[ra_i] = self.rank[ra_i].saturating_add(1);
            }
        }
    }

    /// Build islands and decide which members fall asleep
    ///
    /// `edges` index into `members`. Every member's `wake_time_stamp` is
    /// replaced with its island's stamp and `sleep` is set for members of
    /// islands that fall asleep. Returns the number of islands built.
    pub fn compute(&mut self, members: &mut [IslandMember], edges: &[(u32, u32)], step: u64, delay_steps: u32) -> usize {
        self.reset(members.len());
        for &(a, b) in edges {
            if (a as usize) < members.len() && (b as usize) < members.len() {
                self.union(a, b);
            }
        }

        self.islands.release_all();
        self.island_of_root.clear();
        self.island_of_root.resize(members.len(), u32::MAX);

        for i in 0..members.len() as u32 {
            let root = self.find(i) as usize;
            let island_id = match self.island_of_root[root] {
                u32::MAX => {
                    let id = self.islands.acquire();
                    if let Some(island) = self.islands.get_mut(id) {
                        island.at_rest = true;
                    }
                    self.island_of_root[root] = id;
                    id
                }
                id => id,
            };
            let m = &members[i as usize];
            if let Some(island) = self.islands.get_mut(island_id) {
                island.members.push(i);
                island.wake_time_stamp = island.wake_time_stamp.max(m.wake_time_stamp);
                island.at_rest &= m.at_rest && m.permit_sleep;
            }
        }

        let mut built = 0;
        let mut asleep = 0;
        let ids: Vec<u32> = self.islands.live_ids().collect();
        for id in ids {
            let Some(island) = self.islands.get_mut(id) else { continue };
            built += 1;
            if !island.at_rest {
                // a restless member restarts the whole island's delay
                island.wake_time_stamp = island.wake_time_stamp.max(step);
            }
            let sleep = island.at_rest && step.saturating_sub(island.wake_time_stamp) >= u64::from(delay_steps);
            if sleep {
                asleep += 1;
            }
            for &m in &island.members {
                let member = &mut members[m as usize];
                member.wake_time_stamp = island.wake_time_stamp;
                member.sleep = sleep;
            }
        }
        self.sleeping_islands = asleep;
        built
    }

    /// Islands of the last computation
    pub fn islands(&self) -> impl Iterator<Item = &Island> + '_ {
        self.islands.live_ids().filter_map(|id| self.islands.get(id))
    }

    /// Islands put to sleep by the last computation
    #[inline]
    pub fn sleeping_islands(&self) -> usize {
        self.sleeping_islands
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn resting(body: u32, stamp: u64) -> IslandMember {
        IslandMember {
            body,
            at_rest: true,
            permit_sleep: true,
            wake_time_stamp: stamp,
            sleep: false,
        }
    }

    #[test]
    fn test_union_find() {
        let mut mgr = IslandManager::new();
        mgr.reset(5);
        mgr.union(0, 1);
        mgr.union(2, 3);
        mgr.union(1, 0);
        assert_eq!(mgr.find(0), mgr.find(1));
        assert_ne!(mgr.find(0), mgr.find(2));
        assert_eq!(mgr.find(2), mgr.find(3));
        assert_eq!(mgr.find(4), 4);
    }

    #[test]
    fn test_build_islands() {
        let mut mgr = IslandManager::new();
        let mut members: Vec<_> = (0..5).map(|i| resting(i, 0)).collect();
        let built = mgr.compute(&mut members, &[(0, 1), (2, 3)], 1, 60);
        assert_eq!(built, 3);
        let total: usize = mgr.islands().map(|i| i.members.len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_sleep_after_delay() {
        let mut mgr = IslandManager::new();
        let mut members = vec![resting(0, 10), resting(1, 10)];
        mgr.compute(&mut members, &[(0, 1)], 69, 60);
        assert!(!members[0].sleep);
        mgr.compute(&mut members, &[(0, 1)], 70, 60);
        assert!(members.iter().all(|m| m.sleep));
        assert_eq!(mgr.sleeping_islands(), 1);
    }

    #[test]
    fn test_moving_member_keeps_island_awake() {
        let mut mgr = IslandManager::new();
        let mut members = vec![resting(0, 0), resting(1, 0), resting(2, 0)];
        members[1].at_rest = false;
        mgr.compute(&mut members, &[(0, 1)], 100, 60);
        assert!(!members[0].sleep);
        assert!(!members[1].sleep);
        // the neighbour's stamp was refreshed, the loner was not
        assert_eq!(members[0].wake_time_stamp, 100);
        assert!(members[2].sleep);
    }

    #[test]
    fn test_stamp_propagates_through_island() {
        let mut mgr = IslandManager::new();
        let mut members = vec![resting(0, 5), resting(1, 50)];
        mgr.compute(&mut members, &[(1, 0)], 80, 60);
        assert_eq!(members[0].wake_time_stamp, 50);
        assert!(!members[0].sleep);
    }

    #[test]
    fn test_permit_sleep_respected() {
        let mut mgr = IslandManager::new();
        let mut members = vec![resting(0, 0), resting(1, 0)];
        members[1].permit_sleep = false;
        mgr.compute(&mut members, &[(0, 1)], 1000, 60);
        assert!(!members[0].sleep);
    }

    #[test]
    fn test_islands_recycled_between_steps() {
        let mut mgr = IslandManager::new();
        let mut members: Vec<_> = (0..4).map(|i| resting(i, 0)).collect();
        assert_eq!(mgr.compute(&mut members, &[], 1, 60), 4);
        assert_eq!(mgr.compute(&mut members, &[(0, 1), (1, 2), (2, 3)], 2, 60), 1);
        assert_eq!(mgr.islands().count(), 1);
        assert_eq!(mgr.islands.capacity(), 4);
    }
}
