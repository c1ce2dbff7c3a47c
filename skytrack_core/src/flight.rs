//! Pure per-tick flight math for the simulation engine.
//!
//! Everything here is deterministic: the caller supplies the uniform draws
//! taken from the environment, so any obstacle sequence can be scripted in
//! tests and replayed from a seed in the deterministic context.
//!
//! Geometry is a planar approximation - deltas and distances are computed
//! directly on degree values, not geodesics. Acceptable only at city scale.

use crate::location::ObstacleType;
use std::time::Duration;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tuning constants for the simulation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period between ticks (default: 2000 ms)
    pub tick_period: Duration,

    /// Distance below which the destination counts as reached
    /// (default: 0.0005 degrees, roughly 55 m)
    pub arrival_epsilon: f64,

    /// Fraction of the remaining delta covered per tick (default: 0.1).
    /// An exponential approach, not constant linear speed.
    pub cruise_speed: f64,

    /// Step fraction while slowed by wind (default: 0.05)
    pub wind_speed: f64,

    /// Fixed detour added to both coordinates on each fire tick
    /// (default: 0.0004)
    pub fire_detour: f64,

    /// Random obstacles only trigger further out than this (default: 0.003)
    pub min_obstacle_distance: f64,

    /// A uniform draw above this triggers an obstacle, i.e. 5% per tick
    /// (default: 0.95)
    pub obstacle_chance_threshold: f64,

    /// Second draw above this picks fire over wind, i.e. 30% of triggers
    /// (default: 0.7)
    pub fire_share_threshold: f64,

    /// Ticks a wind obstacle persists after triggering (default: 5)
    pub wind_duration_steps: u32,

    /// Ticks a fire obstacle persists after triggering (default: 3)
    pub fire_duration_steps: u32,

    /// Forced-fire window: fires once per task when the distance lies
    /// strictly inside (min, max) and no fire was seen yet
    /// (default: (0.01, 0.015))
    pub forced_fire_min_distance: f64,
    pub forced_fire_max_distance: f64,

    /// Ticks the forced fire persists after triggering (default: 4)
    pub forced_fire_steps: u32,

    /// Start point when a tracker has no stored location yet
    pub fallback_origin: (f64, f64),

    /// Altitude is re-drawn each tick uniformly in [min, max).
    /// A known non-physical simplification.
    pub altitude_min: f64,
    pub altitude_max: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(2000),
            arrival_epsilon: 0.0005,
            cruise_speed: 0.1,
            wind_speed: 0.05,
            fire_detour: 0.0004,
            min_obstacle_distance: 0.003,
            obstacle_chance_threshold: 0.95,
            fire_share_threshold: 0.7,
            wind_duration_steps: 5,
            fire_duration_steps: 3,
            forced_fire_min_distance: 0.01,
            forced_fire_max_distance: 0.015,
            forced_fire_steps: 4,
            fallback_origin: (53.2284, 6.5416),
            altitude_min: 30.0,
            altitude_max: 35.0,
        }
    }
}

// ============================================================================
// OBSTACLE STATE
// ============================================================================

/// Per-task obstacle memory, carried alongside the scheduled tick loop.
///
/// Invariant: `steps_remaining > 0` implies `current != None`.
/// `fire_seen` is monotone - once true it never resets, and the forced-fire
/// rule never triggers again for the task.
#[derive(Debug, Clone, Default)]
pub struct ObstacleState {
    pub current: ObstacleType,
    pub steps_remaining: u32,
    pub fire_seen: bool,
}

impl ObstacleState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// TICK PLANNING
// ============================================================================

/// Outcome of one tick for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TickPlan {
    /// Within the arrival epsilon; the task should write its terminal
    /// record and stop.
    Arrived,

    /// Next position, with the obstacle (if any) this record is tagged with.
    Step {
        latitude: f64,
        longitude: f64,
        altitude: f64,
        heading: f64,
        obstacle: ObstacleType,
    },
}

/// Planar distance between two coordinate pairs, in degrees.
pub fn planar_distance(from: (f64, f64), to: (f64, f64)) -> f64 {
    let d_lat = to.0 - from.0;
    let d_lng = to.1 - from.1;
    (d_lat * d_lat + d_lng * d_lng).sqrt()
}

/// Computes one simulation step.
///
/// `draw` supplies uniform values in [0, 1); the draw order is fixed:
/// obstacle trigger, obstacle kind (only when triggered), altitude.
///
/// The step fraction is chosen from the obstacle state *before* the state
/// transition runs, so a wind obstacle still slows the first tick after its
/// last tagged step. The transition itself applies two mutually exclusive
/// rules in priority order: the random trigger first, the one-shot forced
/// fire only when the random rule did not fire this tick.
pub fn plan_tick(
    current: (f64, f64),
    destination: (f64, f64),
    state: &mut ObstacleState,
    draw: &mut dyn FnMut() -> f64,
    config: &EngineConfig,
) -> TickPlan {
    let d_lat = destination.0 - current.0;
    let d_lng = destination.1 - current.1;
    let distance = planar_distance(current, destination);

    if distance < config.arrival_epsilon {
        return TickPlan::Arrived;
    }

    let speed = if state.current == ObstacleType::Wind {
        config.wind_speed
    } else {
        config.cruise_speed
    };
    let mut latitude = current.0 + d_lat * speed;
    let mut longitude = current.1 + d_lng * speed;
    let heading = d_lng.atan2(d_lat).to_degrees().rem_euclid(360.0);

    let obstacle = if state.steps_remaining > 0 {
        // Carry the active obstacle through its remaining steps.
        let kind = state.current;
        state.steps_remaining -= 1;
        if kind == ObstacleType::Fire {
            latitude += config.fire_detour;
            longitude += config.fire_detour;
        }
        kind
    } else {
        state.current = ObstacleType::None;
        if distance > config.min_obstacle_distance && draw() > config.obstacle_chance_threshold {
            let kind = if draw() > config.fire_share_threshold {
                ObstacleType::Fire
            } else {
                ObstacleType::Wind
            };
            state.current = kind;
            state.steps_remaining = match kind {
                ObstacleType::Wind => config.wind_duration_steps,
                _ => config.fire_duration_steps,
            };
            if kind == ObstacleType::Fire {
                state.fire_seen = true;
            }
            kind
        } else if !state.fire_seen
            && distance > config.forced_fire_min_distance
            && distance < config.forced_fire_max_distance
        {
            state.current = ObstacleType::Fire;
            state.steps_remaining = config.forced_fire_steps;
            state.fire_seen = true;
            ObstacleType::Fire
        } else {
            ObstacleType::None
        }
    };

    let altitude = config.altitude_min + draw() * (config.altitude_max - config.altitude_min);

    TickPlan::Step {
        latitude,
        longitude,
        altitude,
        heading,
        obstacle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEST: (f64, f64) = (53.2407722, 6.5357325);

    /// Config with both obstacle rules disabled, for clean-path tests.
    fn quiet_config() -> EngineConfig {
        EngineConfig {
            obstacle_chance_threshold: 2.0,
            forced_fire_min_distance: 0.0,
            forced_fire_max_distance: 0.0,
            ..EngineConfig::default()
        }
    }

    /// Draw source scripted from a fixed list; falls back to 0.5 when the
    /// script runs out (0.5 never triggers anything).
    fn scripted(values: Vec<f64>) -> impl FnMut() -> f64 {
        let mut values = values.into_iter();
        move || values.next().unwrap_or(0.5)
    }

    #[test]
    fn test_convergence_is_geometric_and_monotone() {
        let config = quiet_config();
        let mut state = ObstacleState::new();
        let mut draw = scripted(vec![]);
        let mut pos = config.fallback_origin;
        let mut prev_distance = planar_distance(pos, DEST);

        for _ in 0..60 {
            match plan_tick(pos, DEST, &mut state, &mut draw, &config) {
                TickPlan::Arrived => {
                    assert!(prev_distance < config.arrival_epsilon);
                    return;
                }
                TickPlan::Step {
                    latitude, longitude, ..
                } => {
                    pos = (latitude, longitude);
                    let distance = planar_distance(pos, DEST);
                    assert!(distance < prev_distance);
                    // distance_k+1 = distance_k * (1 - cruise_speed)
                    let expected = prev_distance * (1.0 - config.cruise_speed);
                    assert!((distance - expected).abs() < 1e-12);
                    prev_distance = distance;
                }
            }
        }
        panic!("no arrival within 60 ticks");
    }

    #[test]
    fn test_arrival_within_epsilon() {
        let config = quiet_config();
        let mut state = ObstacleState::new();
        let mut draw = scripted(vec![]);
        let near = (DEST.0 + 0.0003, DEST.1 + 0.0002);
        assert_eq!(
            plan_tick(near, DEST, &mut state, &mut draw, &config),
            TickPlan::Arrived
        );
    }

    #[test]
    fn test_wind_trigger_slows_following_ticks() {
        let config = EngineConfig {
            forced_fire_min_distance: 0.0,
            forced_fire_max_distance: 0.0,
            ..EngineConfig::default()
        };
        let mut state = ObstacleState::new();
        // Trigger draw above 0.95, kind draw below 0.7 -> wind.
        let mut draw = scripted(vec![0.96, 0.5]);
        let start = config.fallback_origin;

        let first = plan_tick(start, DEST, &mut state, &mut draw, &config);
        let TickPlan::Step {
            latitude,
            longitude,
            obstacle,
            ..
        } = first
        else {
            panic!("expected a step");
        };
        assert_eq!(obstacle, ObstacleType::Wind);
        assert_eq!(state.steps_remaining, config.wind_duration_steps);
        // The trigger tick itself still moves at cruise speed.
        let full_step = start.0 + (DEST.0 - start.0) * config.cruise_speed;
        assert!((latitude - full_step).abs() < 1e-12);

        // The next tick is slowed to the wind fraction.
        let pos = (latitude, longitude);
        let second = plan_tick(pos, DEST, &mut state, &mut draw, &config);
        let TickPlan::Step {
            latitude, obstacle, ..
        } = second
        else {
            panic!("expected a step");
        };
        assert_eq!(obstacle, ObstacleType::Wind);
        assert_eq!(state.steps_remaining, config.wind_duration_steps - 1);
        let slowed = pos.0 + (DEST.0 - pos.0) * config.wind_speed;
        assert!((latitude - slowed).abs() < 1e-12);
    }

    #[test]
    fn test_wind_still_slows_first_tick_after_expiry() {
        let config = quiet_config();
        let mut state = ObstacleState {
            current: ObstacleType::Wind,
            steps_remaining: 0,
            fire_seen: false,
        };
        let mut draw = scripted(vec![]);
        let start = config.fallback_origin;

        let plan = plan_tick(start, DEST, &mut state, &mut draw, &config);
        let TickPlan::Step {
            latitude, obstacle, ..
        } = plan
        else {
            panic!("expected a step");
        };
        // Speed was chosen before the transition cleared the obstacle.
        let slowed = start.0 + (DEST.0 - start.0) * config.wind_speed;
        assert!((latitude - slowed).abs() < 1e-12);
        assert_eq!(obstacle, ObstacleType::None);
        assert_eq!(state.current, ObstacleType::None);
    }

    #[test]
    fn test_fire_detour_on_continuation_ticks_only() {
        let config = EngineConfig {
            forced_fire_min_distance: 0.0,
            forced_fire_max_distance: 0.0,
            ..EngineConfig::default()
        };
        let mut state = ObstacleState::new();
        // Trigger draw, then kind draw above 0.7 -> fire.
        let mut draw = scripted(vec![0.96, 0.8]);
        let start = config.fallback_origin;

        let first = plan_tick(start, DEST, &mut state, &mut draw, &config);
        let TickPlan::Step {
            latitude,
            longitude,
            obstacle,
            ..
        } = first
        else {
            panic!("expected a step");
        };
        assert_eq!(obstacle, ObstacleType::Fire);
        assert!(state.fire_seen);
        // No detour on the trigger tick itself.
        let undetoured = start.0 + (DEST.0 - start.0) * config.cruise_speed;
        assert!((latitude - undetoured).abs() < 1e-12);

        let pos = (latitude, longitude);
        let second = plan_tick(pos, DEST, &mut state, &mut draw, &config);
        let TickPlan::Step {
            latitude,
            longitude,
            obstacle,
            ..
        } = second
        else {
            panic!("expected a step");
        };
        assert_eq!(obstacle, ObstacleType::Fire);
        let detoured_lat = pos.0 + (DEST.0 - pos.0) * config.cruise_speed + config.fire_detour;
        let detoured_lng = pos.1 + (DEST.1 - pos.1) * config.cruise_speed + config.fire_detour;
        assert!((latitude - detoured_lat).abs() < 1e-12);
        assert!((longitude - detoured_lng).abs() < 1e-12);
    }

    #[test]
    fn test_forced_fire_fires_once_inside_window() {
        let config = EngineConfig {
            obstacle_chance_threshold: 2.0,
            ..EngineConfig::default()
        };
        let mut state = ObstacleState::new();
        let mut draw = scripted(vec![]);
        // Fallback origin to the reference destination starts inside the
        // forced-fire window (distance around 0.0137).
        let start = config.fallback_origin;
        let distance = planar_distance(start, DEST);
        assert!(distance > config.forced_fire_min_distance);
        assert!(distance < config.forced_fire_max_distance);

        let plan = plan_tick(start, DEST, &mut state, &mut draw, &config);
        let TickPlan::Step {
            latitude,
            longitude,
            obstacle,
            ..
        } = plan
        else {
            panic!("expected a step");
        };
        assert_eq!(obstacle, ObstacleType::Fire);
        assert!(state.fire_seen);
        assert_eq!(state.steps_remaining, config.forced_fire_steps);

        // Drain the forced fire, then verify it never re-triggers even if
        // the distance re-enters the window.
        let mut pos = (latitude, longitude);
        let mut fire_ticks = 1;
        for _ in 0..60 {
            match plan_tick(pos, DEST, &mut state, &mut draw, &config) {
                TickPlan::Arrived => break,
                TickPlan::Step {
                    latitude,
                    longitude,
                    obstacle,
                    ..
                } => {
                    if obstacle == ObstacleType::Fire {
                        fire_ticks += 1;
                    }
                    pos = (latitude, longitude);
                }
            }
        }
        // Trigger tick plus the configured continuation steps, nothing more.
        assert_eq!(fire_ticks, 1 + config.forced_fire_steps);
        assert!(state.fire_seen);
    }

    #[test]
    fn test_random_trigger_takes_priority_over_forced_fire() {
        let config = EngineConfig::default();
        let mut state = ObstacleState::new();
        // Inside the forced-fire window, but the random rule fires first
        // and picks wind - the forced rule must not be consulted this tick.
        let mut draw = scripted(vec![0.96, 0.5]);
        let start = config.fallback_origin;
        assert!(planar_distance(start, DEST) < config.forced_fire_max_distance);

        let plan = plan_tick(start, DEST, &mut state, &mut draw, &config);
        let TickPlan::Step { obstacle, .. } = plan else {
            panic!("expected a step");
        };
        assert_eq!(obstacle, ObstacleType::Wind);
        assert!(!state.fire_seen);
        assert_eq!(state.steps_remaining, config.wind_duration_steps);
    }

    #[test]
    fn test_no_random_trigger_close_to_destination() {
        let config = EngineConfig {
            forced_fire_min_distance: 0.0,
            forced_fire_max_distance: 0.0,
            ..EngineConfig::default()
        };
        let mut state = ObstacleState::new();
        // A guaranteed-trigger draw must be ignored below the minimum
        // obstacle distance.
        let mut draw = scripted(vec![0.99, 0.99]);
        let near = (DEST.0 + 0.002, DEST.1);

        let plan = plan_tick(near, DEST, &mut state, &mut draw, &config);
        let TickPlan::Step { obstacle, .. } = plan else {
            panic!("expected a step");
        };
        assert_eq!(obstacle, ObstacleType::None);
        assert_eq!(state.steps_remaining, 0);
    }

    #[test]
    fn test_altitude_band() {
        let config = quiet_config();
        let mut state = ObstacleState::new();
        // First draw feeds the trigger check, second the altitude.
        let mut low = scripted(vec![0.5, 0.0]);
        let TickPlan::Step { altitude, .. } =
            plan_tick(config.fallback_origin, DEST, &mut state, &mut low, &config)
        else {
            panic!("expected a step");
        };
        assert_eq!(altitude, config.altitude_min);

        let mut high = scripted(vec![0.5, 0.999_999]);
        let TickPlan::Step { altitude, .. } =
            plan_tick(config.fallback_origin, DEST, &mut state, &mut high, &config)
        else {
            panic!("expected a step");
        };
        assert!(altitude < config.altitude_max);
    }

    #[test]
    fn test_heading_normalized_into_0_360() {
        let config = quiet_config();
        let mut state = ObstacleState::new();
        let mut draw = scripted(vec![]);
        // Destination to the south-west: raw atan2 would be negative.
        let start = (53.25, 6.55);
        let dest = (53.24, 6.54);
        let TickPlan::Step { heading, .. } =
            plan_tick(start, dest, &mut state, &mut draw, &config)
        else {
            panic!("expected a step");
        };
        assert!((0.0..360.0).contains(&heading));
        assert!(heading > 180.0);
    }

    #[test]
    fn test_steps_remaining_never_negative() {
        let config = quiet_config();
        let mut state = ObstacleState {
            current: ObstacleType::Fire,
            steps_remaining: 1,
            fire_seen: true,
        };
        let mut draw = scripted(vec![]);
        let mut pos = config.fallback_origin;
        for _ in 0..10 {
            match plan_tick(pos, DEST, &mut state, &mut draw, &config) {
                TickPlan::Arrived => break,
                TickPlan::Step {
                    latitude, longitude, ..
                } => pos = (latitude, longitude),
            }
            assert!(state.steps_remaining <= config.forced_fire_steps);
            if state.steps_remaining > 0 {
                assert_ne!(state.current, ObstacleType::None);
            }
        }
        assert_eq!(state.steps_remaining, 0);
    }
}
