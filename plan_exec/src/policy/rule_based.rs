//! # Rule based policy
//!
//! Intelligent Driver Model for the longitudinal action, pure pursuit on the closest lane
//! centreline for the lateral action.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Point2;
use serde::Deserialize;
use util::maths::ang_dist;

use super::{Action, BehaviorPolicy, Observation, PolicyError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tuning of the rule based policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleBasedParams {
    /// IDM maximum acceleration.
    ///
    /// Units: meters/second^2
    pub max_acceleration_mss: f64,

    /// IDM comfortable deceleration, positive.
    ///
    /// Units: meters/second^2
    pub comfortable_deceleration_mss: f64,

    /// IDM acceleration exponent.
    pub acceleration_exponent: f64,

    /// Minimum gap to keep to the leader when stopped.
    ///
    /// Units: meters
    pub min_gap_m: f64,

    /// Desired time headway to the leader.
    ///
    /// Units: seconds
    pub time_headway_s: f64,

    /// Pure pursuit lookahead per unit of speed.
    ///
    /// Units: seconds
    pub lookahead_time_s: f64,

    /// Lookahead used at low speed.
    ///
    /// Units: meters
    pub min_lookahead_m: f64,
}

/// IDM plus pure pursuit.
#[derive(Debug, Clone)]
pub struct RuleBasedPolicy {
    params: RuleBasedParams,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for RuleBasedParams {
    fn default() -> Self {
        Self {
            max_acceleration_mss: 1.7,
            comfortable_deceleration_mss: 1.67,
            acceleration_exponent: 4.0,
            min_gap_m: 2.0,
            time_headway_s: 1.5,
            lookahead_time_s: 1.0,
            min_lookahead_m: 5.0,
        }
    }
}

impl RuleBasedPolicy {
    pub fn new(params: RuleBasedParams) -> Self {
        Self { params }
    }

    /// Intelligent Driver Model acceleration.
    fn idm_acceleration(&self, obs: &Observation) -> f64 {
        let p = &self.params;
        let v = obs.ego.v_ms;
        let v0 = obs.desired_velocity_ms.max(0.1);

        let free_road = 1.0 - (v / v0).powf(p.acceleration_exponent);

        let interaction = match obs.leader {
            Some(leader) => {
                let dv = v - leader.v_ms;
                let desired_gap = p.min_gap_m
                    + (v * p.time_headway_s
                        + v * dv / (2.0 * (p.max_acceleration_mss * p.comfortable_deceleration_mss).sqrt()))
                    .max(0.0);
                (desired_gap / leader.gap_m.max(0.1)).powi(2)
            }
            None => 0.0,
        };

        p.max_acceleration_mss * (free_road - interaction)
    }

    /// Pure pursuit curvature towards a point further along the current lane.
    fn pursuit_curvature(&self, obs: &Observation) -> f64 {
        let lookahead_m = (obs.ego.v_ms * self.params.lookahead_time_s).max(self.params.min_lookahead_m);

        let target = match obs.map.point_at(obs.lane.lane_idx, obs.lane.s_m + lookahead_m) {
            Some(t) => t,
            None => return 0.0,
        };

        let to_target = target - Point2::new(obs.ego.x_m, obs.ego.y_m);
        let dist_m = to_target.norm();
        if dist_m < 1e-6 {
            return 0.0;
        }

        let alpha = ang_dist(obs.ego.theta_rad, to_target.y.atan2(to_target.x));

        2.0 * alpha.sin() / dist_m
    }
}

impl BehaviorPolicy for RuleBasedPolicy {
    fn name(&self) -> &'static str {
        "RuleBased"
    }

    fn act(&mut self, obs: &Observation) -> Result<Action, PolicyError> {
        Ok(Action {
            acceleration_mss: self.idm_acceleration(obs),
            curvature_m: self.pursuit_curvature(obs),
        })
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        engine::EngineParams,
        frame::AgentState,
        map::LaneMap,
        policy::Leader,
    };

    fn straight_map() -> LaneMap {
        LaneMap::from_lanes(vec![(0, vec![Point2::new(0.0, 0.0), Point2::new(500.0, 0.0)])]).unwrap()
    }

    fn observe<'a>(
        map: &'a LaneMap,
        limits: &'a EngineParams,
        ego: AgentState,
        leader: Option<Leader>,
    ) -> Observation<'a> {
        Observation {
            ego,
            lane: map.project(&Point2::new(ego.x_m, ego.y_m)),
            map,
            leader,
            desired_velocity_ms: 10.0,
            limits,
        }
    }

    #[test]
    fn test_free_road() {
        let map = straight_map();
        let limits = EngineParams::default();
        let mut policy = RuleBasedPolicy::new(RuleBasedParams::default());

        // Stopped on the centreline, free road: full acceleration straight ahead
        let action = policy
            .act(&observe(&map, &limits, AgentState::new(0.0, 10.0, 0.0, 0.0, 0.0), None))
            .unwrap();
        assert_eq!(action.acceleration_mss, 1.7);
        assert_eq!(action.curvature_m, 0.0);

        // At desired speed: no acceleration
        let action = policy
            .act(&observe(&map, &limits, AgentState::new(0.0, 10.0, 0.0, 0.0, 10.0), None))
            .unwrap();
        assert!(action.acceleration_mss.abs() < 1e-12);
    }

    #[test]
    fn test_brakes_for_close_leader() {
        let map = straight_map();
        let limits = EngineParams::default();
        let mut policy = RuleBasedPolicy::new(RuleBasedParams::default());

        let leader = Leader { gap_m: 3.0, v_ms: 0.0 };
        let action = policy
            .act(&observe(&map, &limits, AgentState::new(0.0, 10.0, 0.0, 0.0, 8.0), Some(leader)))
            .unwrap();

        assert!(action.acceleration_mss < -1.67);
    }

    #[test]
    fn test_steers_back_to_lane() {
        let map = straight_map();
        let limits = EngineParams::default();
        let mut policy = RuleBasedPolicy::new(RuleBasedParams::default());

        // Left of the centreline, heading straight: should curve right
        let action = policy
            .act(&observe(&map, &limits, AgentState::new(0.0, 10.0, 1.5, 0.0, 5.0), None))
            .unwrap();
        assert!(action.curvature_m < 0.0);

        // Right of the centreline: should curve left
        let action = policy
            .act(&observe(&map, &limits, AgentState::new(0.0, 10.0, -1.5, 0.0, 5.0), None))
            .unwrap();
        assert!(action.curvature_m > 0.0);
    }
}
