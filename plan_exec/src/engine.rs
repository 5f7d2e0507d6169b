//! # Trajectory Generation Engine
//!
//! [`SimWorld`] is the world object the bridge plans in. It holds the ego agent and the obstacles
//! registered by the [`WorldAssembler`](crate::world::WorldAssembler), and generates trajectories
//! by rolling a kinematic model of the ego forward under the selected behaviour policy. Obstacles
//! follow their predicted trajectories.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;

use log::trace;
use nalgebra::{Point2, Vector2};
use serde::Deserialize;
use util::maths::{clamp, wrap_to_pi};

use crate::{
    frame::AgentState,
    map::LaneMap,
    policy::{Action, BehaviorPolicy, Leader, Observation},
    world::{EngineError, PlanningWorld},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of the engine's ego model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Units: meters/second^2
    pub max_acceleration_mss: f64,

    /// Maximum braking, positive.
    ///
    /// Units: meters/second^2
    pub max_deceleration_mss: f64,

    /// Units: 1/meters
    pub max_curvature_m: f64,

    /// Obstacles further than this from the ego's heading line are not considered leaders.
    ///
    /// Units: meters
    pub lane_half_width_m: f64,

    /// Units: meters
    pub ego_length_m: f64,

    /// Desired velocity used when the request does not carry one.
    ///
    /// Units: meters/second
    pub default_desired_velocity_ms: f64,
}

/// An obstacle moving along its predicted trajectory.
#[derive(Debug, Clone)]
pub struct SimObstacle {
    pub trajectory: Vec<AgentState>,
    pub length_m: f64,
    pub width_m: f64,
}

/// Read-only view of the world handed to the behaviour policy.
pub struct WorldState<'a> {
    /// Initial state of the ego.
    pub ego: AgentState,

    pub obstacles: &'a [SimObstacle],

    pub map: &'a LaneMap,

    pub params: &'a EngineParams,

    /// Units: meters/second
    pub desired_velocity_ms: f64,
}

/// The engine's world object.
pub struct SimWorld {
    params: EngineParams,
    map: Arc<LaneMap>,
    policy: Box<dyn BehaviorPolicy>,

    ego: Option<AgentState>,
    obstacles: Vec<SimObstacle>,
    desired_velocity_ms: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            max_acceleration_mss: 2.0,
            max_deceleration_mss: 6.0,
            max_curvature_m: 0.2,
            lane_half_width_m: 1.75,
            ego_length_m: 4.5,
            default_desired_velocity_ms: 8.0,
        }
    }
}

impl SimObstacle {
    /// State of the obstacle at the given time, interpolated along its trajectory and held at its
    /// ends. `None` if the trajectory is empty.
    pub fn state_at(&self, time_s: f64) -> Option<AgentState> {
        let first = self.trajectory.first()?;
        let last = self.trajectory.last()?;

        if time_s <= first.time_s {
            return Some(*first);
        }
        if time_s >= last.time_s {
            return Some(*last);
        }

        let i = self
            .trajectory
            .windows(2)
            .position(|w| w[0].time_s <= time_s && time_s < w[1].time_s)?;
        let (a, b) = (&self.trajectory[i], &self.trajectory[i + 1]);

        let frac = (time_s - a.time_s) / (b.time_s - a.time_s);
        let lerp = |p: f64, q: f64| p + (q - p) * frac;

        Some(AgentState {
            time_s,
            x_m: lerp(a.x_m, b.x_m),
            y_m: lerp(a.y_m, b.y_m),
            theta_rad: a.theta_rad + wrap_to_pi(b.theta_rad - a.theta_rad) * frac,
            v_ms: lerp(a.v_ms, b.v_ms),
        })
    }
}

impl<'a> WorldState<'a> {
    /// Build the policy's observation for the ego in the given state.
    pub fn observe(&self, ego: &AgentState) -> Observation<'a> {
        let position = Point2::new(ego.x_m, ego.y_m);

        Observation {
            ego: *ego,
            lane: self.map.project(&position),
            map: self.map,
            leader: self.find_leader(ego),
            desired_velocity_ms: self.desired_velocity_ms,
            limits: self.params,
        }
    }

    /// Closest obstacle ahead of the ego within the lane half width of its heading line.
    pub fn find_leader(&self, ego: &AgentState) -> Option<Leader> {
        let heading = Vector2::new(ego.theta_rad.cos(), ego.theta_rad.sin());
        let ego_pos = Point2::new(ego.x_m, ego.y_m);

        self.obstacles
            .iter()
            .filter_map(|obs| {
                let state = obs.state_at(ego.time_s)?;
                let rel = Point2::new(state.x_m, state.y_m) - ego_pos;

                let longitudinal = rel.dot(&heading);
                let lateral = heading.x * rel.y - heading.y * rel.x;

                if longitudinal <= 0.0
                    || lateral.abs() > self.params.lane_half_width_m + 0.5 * obs.width_m
                {
                    return None;
                }

                Some(Leader {
                    gap_m: longitudinal - 0.5 * (obs.length_m + self.params.ego_length_m),
                    // Speed of the leader along the ego's heading
                    v_ms: state.v_ms * (state.theta_rad - ego.theta_rad).cos(),
                })
            })
            .min_by(|a, b| a.gap_m.partial_cmp(&b.gap_m).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Advance the ego by one step under the action, clamped to the kinematic limits.
    pub fn integrate(&self, ego: &AgentState, action: &Action, step_time_s: f64) -> AgentState {
        let acc = clamp(
            action.acceleration_mss,
            -self.params.max_deceleration_mss,
            self.params.max_acceleration_mss,
        );
        let curvature = clamp(
            action.curvature_m,
            -self.params.max_curvature_m,
            self.params.max_curvature_m,
        );

        // The ego never reverses
        let v_next = (ego.v_ms + acc * step_time_s).max(0.0);
        let v_avg = 0.5 * (ego.v_ms + v_next);
        let dist = v_avg * step_time_s;

        let d_theta = curvature * dist;
        let theta_mid = ego.theta_rad + 0.5 * d_theta;

        AgentState {
            time_s: ego.time_s + step_time_s,
            x_m: ego.x_m + dist * theta_mid.cos(),
            y_m: ego.y_m + dist * theta_mid.sin(),
            theta_rad: wrap_to_pi(ego.theta_rad + d_theta),
            v_ms: v_next,
        }
    }
}

impl SimWorld {
    pub fn new(params: EngineParams, map: Arc<LaneMap>, policy: Box<dyn BehaviorPolicy>) -> Self {
        let desired_velocity_ms = params.default_desired_velocity_ms;

        Self {
            params,
            map,
            policy,
            ego: None,
            obstacles: Vec::new(),
            desired_velocity_ms,
        }
    }
}

impl PlanningWorld for SimWorld {
    fn reset(&mut self) -> Result<(), EngineError> {
        self.ego = None;
        self.obstacles.clear();
        self.desired_velocity_ms = self.params.default_desired_velocity_ms;
        Ok(())
    }

    fn add_ego_agent(&mut self, state: AgentState) -> Result<(), EngineError> {
        self.ego = Some(state);
        Ok(())
    }

    fn add_obstacle(
        &mut self,
        trajectory: Vec<AgentState>,
        length_m: f64,
        width_m: f64,
    ) -> Result<(), EngineError> {
        self.obstacles.push(SimObstacle {
            trajectory,
            length_m,
            width_m,
        });
        Ok(())
    }

    fn set_desired_velocity(&mut self, v_ms: f64) {
        if v_ms > 0.0 {
            self.desired_velocity_ms = v_ms;
        }
    }

    fn generate_trajectory(
        &mut self,
        step_time_s: f64,
        num_steps: usize,
    ) -> Result<Vec<AgentState>, EngineError> {
        if !(step_time_s > 0.0) || num_steps == 0 {
            return Err(EngineError::InvalidHorizon(num_steps, step_time_s));
        }

        let ego = self.ego.ok_or(EngineError::NoEgoAgent)?;

        let world = WorldState {
            ego,
            obstacles: &self.obstacles,
            map: &self.map,
            params: &self.params,
            desired_velocity_ms: self.desired_velocity_ms,
        };

        let trajectory = self
            .policy
            .produce_trajectory(&world, step_time_s, num_steps)?;

        if let Some(bad) = trajectory
            .iter()
            .find(|s| s.to_array().iter().any(|v| !v.is_finite()))
        {
            return Err(EngineError::InvalidTrajectory(format!(
                "non-finite state {:?}",
                bad
            )));
        }

        trace!(
            "{} policy generated {} states with {} obstacles",
            self.policy.name(),
            trajectory.len(),
            self.obstacles.len()
        );

        Ok(trajectory)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::policy::{RuleBasedParams, RuleBasedPolicy};

    fn map() -> Arc<LaneMap> {
        Arc::new(
            LaneMap::from_lanes(vec![(0, vec![Point2::new(-100.0, 0.0), Point2::new(1000.0, 0.0)])])
                .unwrap(),
        )
    }

    fn world() -> SimWorld {
        SimWorld::new(
            EngineParams::default(),
            map(),
            Box::new(RuleBasedPolicy::new(RuleBasedParams::default())),
        )
    }

    #[test]
    fn test_requires_ego() {
        let mut w = world();

        assert!(matches!(w.generate_trajectory(0.2, 10), Err(EngineError::NoEgoAgent)));

        w.add_ego_agent(AgentState::default()).unwrap();
        assert!(matches!(
            w.generate_trajectory(0.0, 10),
            Err(EngineError::InvalidHorizon(10, _))
        ));
    }

    #[test]
    fn test_trajectory_timing() {
        let mut w = world();
        w.add_ego_agent(AgentState::new(0.0, 0.0, 0.0, 0.0, 5.0)).unwrap();

        let traj = w.generate_trajectory(0.25, 8).unwrap();

        assert_eq!(traj.len(), 8);
        for (k, s) in traj.iter().enumerate() {
            assert!((s.time_s - 0.25 * (k + 1) as f64).abs() < 1e-12);
            assert!(s.v_ms >= 0.0);
        }
        assert!(traj.windows(2).all(|w| w[1].time_s >= w[0].time_s));
        assert!(traj.windows(2).all(|w| w[1].x_m > w[0].x_m));
    }

    #[test]
    fn test_stops_behind_obstacle() {
        let mut w = world();
        w.add_ego_agent(AgentState::new(0.0, 0.0, 0.0, 0.0, 8.0)).unwrap();

        // Stationary obstacle 30 m ahead
        w.add_obstacle(
            vec![
                AgentState::new(0.0, 30.0, 0.0, 0.0, 0.0),
                AgentState::new(20.0, 30.0, 0.0, 0.0, 0.0),
            ],
            4.5,
            1.8,
        )
        .unwrap();

        let traj = w.generate_trajectory(0.2, 50).unwrap();
        let last = traj.last().unwrap();

        assert!(last.x_m < 30.0 - 4.5);
        assert!(last.v_ms < 2.0);
    }

    #[test]
    fn test_obstacle_interpolation() {
        let obs = SimObstacle {
            trajectory: vec![
                AgentState::new(0.0, 0.0, 0.0, 0.0, 2.0),
                AgentState::new(1.0, 2.0, 4.0, 0.0, 4.0),
            ],
            length_m: 4.0,
            width_m: 2.0,
        };

        assert_eq!(obs.state_at(-1.0), Some(AgentState::new(0.0, 0.0, 0.0, 0.0, 2.0)));
        assert_eq!(obs.state_at(0.5), Some(AgentState::new(0.5, 1.0, 2.0, 0.0, 3.0)));
        assert_eq!(obs.state_at(3.0), Some(AgentState::new(1.0, 2.0, 4.0, 0.0, 4.0)));

        let empty = SimObstacle { trajectory: vec![], length_m: 4.0, width_m: 2.0 };
        assert_eq!(empty.state_at(0.0), None);
    }

    #[test]
    fn test_reset_clears_world() {
        let mut w = world();
        w.add_ego_agent(AgentState::default()).unwrap();
        w.add_obstacle(vec![], 1.0, 1.0).unwrap();
        w.set_desired_velocity(3.0);

        w.reset().unwrap();

        assert!(matches!(w.generate_trajectory(0.2, 1), Err(EngineError::NoEgoAgent)));
        assert!(w.obstacles.is_empty());
        assert_eq!(w.desired_velocity_ms, EngineParams::default().default_desired_velocity_ms);
    }
}
