//! Time-phased load shape.
//!
//! A schedule is an ordered list of phases, each ending at an absolute
//! offset from test start. The first phase whose end lies beyond the
//! elapsed run time is active; past the last phase the test is over.

use std::time::Duration;
use thiserror::Error;

/// One step of the load shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadPhase {
    /// Offset from test start at which this phase ends.
    pub until: Duration,
    /// Simulated users to converge on.
    pub users: usize,
    /// Users started or stopped per second while converging.
    pub spawn_rate: f64,
}

impl LoadPhase {
    pub fn new(until_secs: u64, users: usize, spawn_rate: f64) -> Self {
        Self {
            until: Duration::from_secs(until_secs),
            users,
            spawn_rate,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("schedule has no phases")]
    Empty,
    #[error("phase {index} ends at {until:?}, not after the previous phase")]
    NotIncreasing { index: usize, until: Duration },
    #[error("phase {index} has invalid spawn rate {rate}")]
    InvalidRate { index: usize, rate: f64 },
}

/// Validated, ordered sequence of phases.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSchedule {
    phases: Vec<LoadPhase>,
}

impl LoadSchedule {
    pub fn new(phases: Vec<LoadPhase>) -> Result<Self, ScheduleError> {
        if phases.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let mut previous = Duration::ZERO;
        for (index, phase) in phases.iter().enumerate() {
            if phase.until <= previous {
                return Err(ScheduleError::NotIncreasing {
                    index,
                    until: phase.until,
                });
            }
            if !phase.spawn_rate.is_finite() || phase.spawn_rate < 0.0 {
                return Err(ScheduleError::InvalidRate {
                    index,
                    rate: phase.spawn_rate,
                });
            }
            previous = phase.until;
        }

        Ok(Self { phases })
    }

    /// Warm up, ramp, spike to 200 users, hold, cool down, stabilize.
    pub fn nice_default() -> Self {
        Self {
            phases: vec![
                LoadPhase::new(60, 50, 2.0),
                LoadPhase::new(120, 100, 2.0),
                LoadPhase::new(150, 200, 10.0),
                LoadPhase::new(180, 200, 10.0),
                LoadPhase::new(240, 50, 5.0),
                LoadPhase::new(300, 20, 2.0),
            ],
        }
    }

    /// A single phase holding `users` for `run_time`.
    pub fn constant(users: usize, spawn_rate: f64, run_time: Duration) -> Result<Self, ScheduleError> {
        Self::new(vec![LoadPhase {
            until: run_time,
            users,
            spawn_rate,
        }])
    }

    /// Active phase at `elapsed`, or `None` once the schedule is exhausted.
    pub fn tick(&self, elapsed: Duration) -> Option<&LoadPhase> {
        // phases are sorted by end offset, so the active one is the first
        // whose end is still ahead
        let index = self.phases.partition_point(|phase| phase.until <= elapsed);
        self.phases.get(index)
    }

    /// Target user count at `elapsed`.
    pub fn target_users(&self, elapsed: Duration) -> Option<usize> {
        self.tick(elapsed).map(|phase| phase.users)
    }

    /// Total length of the run.
    pub fn total_duration(&self) -> Duration {
        self.phases.last().map(|phase| phase.until).unwrap_or_default()
    }

    pub fn peak_users(&self) -> usize {
        self.phases.iter().map(|phase| phase.users).max().unwrap_or(0)
    }

    pub fn phases(&self) -> &[LoadPhase] {
        &self.phases
    }
}

impl Default for LoadSchedule {
    fn default() -> Self {
        Self::nice_default()
    }
}

/// What the scheduler should do on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampStep {
    Hold,
    Spawn(usize),
    Stop(usize),
}

/// Converts a spawn rate into whole users per tick.
///
/// Fractional allowance carries over between ticks, so a rate of 2.5
/// users/s with 1 s ticks alternates between 2 and 3. The carry resets
/// whenever the target is reached, the target changes, or the ramp turns
/// around.
#[derive(Debug, Default)]
pub struct RampPlanner {
    carry: f64,
    /// Target and direction (`true` when spawning) the carry belongs to.
    ramp: Option<(usize, bool)>,
}

impl RampPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, current: usize, target: usize, spawn_rate: f64, dt: Duration) -> RampStep {
        let gap = current.abs_diff(target);
        if gap == 0 {
            self.carry = 0.0;
            self.ramp = None;
            return RampStep::Hold;
        }

        let ramp = Some((target, target > current));
        if self.ramp != ramp {
            self.carry = 0.0;
            self.ramp = ramp;
        }

        let count = if spawn_rate <= 0.0 {
            self.carry = 0.0;
            gap
        } else {
            let allowance = self.carry + spawn_rate * dt.as_secs_f64();
            let whole = allowance.floor();
            if whole >= gap as f64 {
                self.carry = 0.0;
                gap
            } else {
                self.carry = allowance - whole;
                whole as usize
            }
        };

        match count {
            0 => RampStep::Hold,
            n if target > current => RampStep::Spawn(n),
            n => RampStep::Stop(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_default_schedule_lookup() {
        let schedule = LoadSchedule::nice_default();
        assert_eq!(schedule.target_users(secs(0)), Some(50));
        assert_eq!(schedule.target_users(secs(65)), Some(100));
        assert_eq!(schedule.target_users(secs(140)), Some(200));
        assert_eq!(schedule.target_users(secs(170)), Some(200));
        assert_eq!(schedule.target_users(secs(200)), Some(50));
        assert_eq!(schedule.target_users(secs(299)), Some(20));
        assert_eq!(schedule.target_users(secs(301)), None);
    }

    #[test]
    fn test_phase_boundaries_are_exclusive() {
        let schedule = LoadSchedule::nice_default();
        assert_eq!(schedule.target_users(Duration::from_millis(59_999)), Some(50));
        assert_eq!(schedule.target_users(secs(60)), Some(100));
        assert_eq!(schedule.target_users(secs(300)), None);
    }

    #[test]
    fn test_tick_reports_spawn_rate() {
        let schedule = LoadSchedule::nice_default();
        let phase = schedule.tick(secs(149)).unwrap();
        assert_eq!(phase.users, 200);
        assert_eq!(phase.spawn_rate, 10.0);
        assert_eq!(schedule.total_duration(), secs(300));
        assert_eq!(schedule.peak_users(), 200);
    }

    #[test]
    fn test_schedule_validation() {
        assert_eq!(LoadSchedule::new(vec![]), Err(ScheduleError::Empty));

        let err = LoadSchedule::new(vec![LoadPhase::new(60, 10, 1.0), LoadPhase::new(60, 20, 1.0)]);
        assert!(matches!(err, Err(ScheduleError::NotIncreasing { index: 1, .. })));

        let err = LoadSchedule::new(vec![LoadPhase::new(0, 10, 1.0)]);
        assert!(matches!(err, Err(ScheduleError::NotIncreasing { index: 0, .. })));

        let err = LoadSchedule::new(vec![LoadPhase::new(10, 10, f64::NAN)]);
        assert!(matches!(err, Err(ScheduleError::InvalidRate { index: 0, .. })));
    }

    #[test]
    fn test_constant_schedule() {
        let schedule = LoadSchedule::constant(5, 1.0, secs(10)).unwrap();
        assert_eq!(schedule.target_users(secs(9)), Some(5));
        assert_eq!(schedule.target_users(secs(10)), None);
    }

    #[test]
    fn test_ramp_respects_rate() {
        let mut planner = RampPlanner::new();
        assert_eq!(planner.step(0, 50, 2.0, secs(1)), RampStep::Spawn(2));
        assert_eq!(planner.step(2, 50, 2.0, secs(1)), RampStep::Spawn(2));
        assert_eq!(planner.step(48, 50, 10.0, secs(1)), RampStep::Spawn(2));
        assert_eq!(planner.step(50, 50, 10.0, secs(1)), RampStep::Hold);
    }

    #[test]
    fn test_ramp_carries_fractions() {
        let mut planner = RampPlanner::new();
        let tick = Duration::from_millis(250);
        let steps: Vec<_> = (0..4).map(|_| planner.step(0, 100, 2.0, tick)).collect();
        assert_eq!(
            steps,
            vec![
                RampStep::Hold,
                RampStep::Spawn(1),
                RampStep::Hold,
                RampStep::Spawn(1),
            ]
        );
    }

    #[test]
    fn test_ramp_down_stops_users() {
        let mut planner = RampPlanner::new();
        assert_eq!(planner.step(200, 50, 5.0, secs(1)), RampStep::Stop(5));
        assert_eq!(planner.step(52, 50, 5.0, secs(1)), RampStep::Stop(2));
    }

    #[test]
    fn test_ramp_carry_resets_on_reversal() {
        let mut planner = RampPlanner::new();
        assert_eq!(planner.step(0, 100, 0.5, secs(1)), RampStep::Hold);
        assert_eq!(planner.step(100, 0, 0.5, secs(1)), RampStep::Hold);
        assert_eq!(planner.step(100, 0, 0.5, secs(1)), RampStep::Stop(1));
    }

    #[test]
    fn test_ramp_carry_resets_on_new_target() {
        let mut planner = RampPlanner::new();
        assert_eq!(planner.step(0, 100, 0.5, secs(1)), RampStep::Hold);
        assert_eq!(planner.step(0, 200, 0.5, secs(1)), RampStep::Hold);
        assert_eq!(planner.step(0, 200, 0.5, secs(1)), RampStep::Spawn(1));
    }

    #[test]
    fn test_ramp_zero_rate_jumps() {
        let mut planner = RampPlanner::new();
        assert_eq!(planner.step(0, 30, 0.0, secs(1)), RampStep::Spawn(30));
        assert_eq!(planner.step(30, 0, 0.0, secs(1)), RampStep::Stop(30));
    }
}
