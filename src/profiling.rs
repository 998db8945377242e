//! Physics Profiling
//!
//! Wall-clock timings of the pipeline stages and step counters for the last
//! `update`, exposed by `PhysicsWorld::performance_data`.
//!
//! # Profiled Stages
//!
//! - Discrete (broadphase, narrowphase and arbiter refresh together)
//! - Broadphase (index refresh and pair query)
//! - Narrowphase (GJK/EPA and manifold updates)
//! - Sleep computation (islands)
//! - Pre-step (contact and constraint preparation)
//! - Solver (warm start, velocity and bias passes)
//! - Physics integration (velocities and positions)
//! - Continuous (time-of-impact sweeps and resolution)

use std::time::Duration;

/// Pipeline stage measured by the profiler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Broadphase plus narrowphase
    Discrete,
    /// Broadphase index refresh and pair query
    Broadphase,
    /// Narrow phase and arbiter updates
    Narrowphase,
    /// Island building and sleep decisions
    SleepComputation,
    /// Contact and constraint preStep
    PreStep,
    /// Warm start, velocity iterations and bias passes
    Solver,
    /// Velocity and position integration
    PhysicsIntegration,
    /// Time-of-impact sweeps and event resolution
    Continuous,
}

impl Stage {
    /// Every stage, in report order
    pub const ALL: [Stage; 8] = [
        Stage::Discrete,
        Stage::Broadphase,
        Stage::Narrowphase,
        Stage::SleepComputation,
        Stage::PreStep,
        Stage::Solver,
        Stage::PhysicsIntegration,
        Stage::Continuous,
    ];

    /// Stage name
    pub fn name(self) -> &'static str {
        match self {
            Stage::Discrete => "discrete",
            Stage::Broadphase => "broadphase",
            Stage::Narrowphase => "narrowphase",
            Stage::SleepComputation => "sleep_computation",
            Stage::PreStep => "pre_step",
            Stage::Solver => "solver",
            Stage::PhysicsIntegration => "physics_integration",
            Stage::Continuous => "continuous",
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Accumulated time of one stage
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProfileEntry {
    /// Time spent during the last `update`
    pub last: Duration,
    /// Time spent since the world was created or reset
    pub total: Duration,
    /// Longest single `update`
    pub peak: Duration,
    /// Number of `update` calls that ran the stage
    pub call_count: u64,
}

impl ProfileEntry {
    /// Average time per `update`
    pub fn average(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            self.total / self.call_count as u32
        }
    }
}

/// Counters of the last `update`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepStats {
    /// Substeps taken
    pub substeps: u32,
    /// Awake dynamic bodies after the last substep
    pub active_bodies: u32,
    /// Static and sleeping bodies
    pub static_bodies: u32,
    /// Candidate pairs reported by the broad phase
    pub broadphase_pairs: u32,
    /// Live arbiters
    pub arbiters: u32,
    /// Contact points across all arbiters
    pub contacts: u32,
    /// Time-of-impact events resolved
    pub toi_events: u32,
    /// Islands built
    pub islands: u32,
    /// Constraints in the world
    pub constraints: u32,
}

/// Per-stage timings and counters
#[derive(Clone, Debug, Default)]
pub struct PerformanceData {
    entries: [ProfileEntry; 8],
    frame: [Duration; 8],
    /// Counters of the last `update`
    pub stats: StepStats,
    /// Number of `update` calls measured
    pub frame_count: u64,
}

impl PerformanceData {
    /// Empty data
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an `update`
    pub(crate) fn begin_frame(&mut self) {
        self.frame = [Duration::ZERO; 8];
        self.stats = StepStats::default();
    }

    /// Close an `update`, folding the frame times into the entries
    pub(crate) fn end_frame(&mut self) {
        for (entry, &spent) in self.entries.iter_mut().zip(self.frame.iter()) {
            entry.last = spent;
            if spent > Duration::ZERO {
                entry.total += spent;
                entry.call_count += 1;
                entry.peak = entry.peak.max(spent);
            }
        }
        self.frame_count += 1;
    }

    /// Add time to a stage of the running frame
    #[inline]
    pub(crate) fn record(&mut self, stage: Stage, spent: Duration) {
        self.frame[stage.index()] += spent;
    }

    /// Accumulated data of a stage
    pub fn get(&self, stage: Stage) -> &ProfileEntry {
        &self.entries[stage.index()]
    }

    /// Time of a stage during the last `update`
    pub fn last(&self, stage: Stage) -> Duration {
        self.entries[stage.index()].last
    }

    /// `(name, last, average, peak)` for every stage
    pub fn summary(&self) -> Vec<(&'static str, Duration, Duration, Duration)> {
        Stage::ALL
            .iter()
            .map(|&s| {
                let e = self.get(s);
                (s.name(), e.last, e.average(), e.peak)
            })
            .collect()
    }

    /// Forget everything
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_entry_average() {
        let e = ProfileEntry {
            total: Duration::from_millis(450),
            call_count: 3,
            ..Default::default()
        };
        assert_eq!(e.average(), Duration::from_millis(150));
        assert_eq!(ProfileEntry::default().average(), Duration::ZERO);
    }

    #[test]
    fn test_frame_accumulation() {
        let mut perf = PerformanceData::new();
        perf.begin_frame();
        perf.record(Stage::Solver, Duration::from_millis(2));
        perf.record(Stage::Solver, Duration::from_millis(3));
        perf.end_frame();
        assert_eq!(perf.last(Stage::Solver), Duration::from_millis(5));
        assert_eq!(perf.last(Stage::Broadphase), Duration::ZERO);

        perf.begin_frame();
        perf.record(Stage::Solver, Duration::from_millis(1));
        perf.end_frame();
        let solver = perf.get(Stage::Solver);
        assert_eq!(solver.peak, Duration::from_millis(5));
        assert_eq!(solver.total, Duration::from_millis(6));
        assert_eq!(solver.call_count, 2);
        assert_eq!(perf.frame_count, 2);
    }

    #[test]
    fn test_summary_names() {
        let perf = PerformanceData::new();
        let names: Vec<_> = perf.summary().iter().map(|s| s.0).collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"sleep_computation"));
    }

    #[test]
    fn test_reset() {
        let mut perf = PerformanceData::new();
        perf.begin_frame();
        perf.record(Stage::PreStep, Duration::from_millis(1));
        perf.stats.substeps = 2;
        perf.end_frame();
        perf.reset();
        assert_eq!(perf.frame_count, 0);
        assert_eq!(perf.stats, StepStats::default());
        assert_eq!(perf.last(Stage::PreStep), Duration::ZERO);
    }
}
