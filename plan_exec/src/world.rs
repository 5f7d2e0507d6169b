//! # World Assembly
//!
//! The planning engine plans inside a world object holding the ego agent and the obstacles around
//! it. [`PlanningWorld`] is the boundary to that object and [`WorldAssembler`] fills it from a
//! [`PlanningRequest`] at the start of every cycle.
//!
//! The world is always rebuilt from scratch: nothing is assumed to survive safely from one cycle to
//! the next.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::msg::planning::PlanningRequest;
use log::{trace, warn};

use crate::{
    frame::{AgentState, FrameConverter},
    policy::PolicyError,
};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A world object owned by a trajectory-generation engine.
pub trait PlanningWorld: Send {
    /// Remove every agent from the world.
    fn reset(&mut self) -> Result<(), EngineError>;

    /// Register the ego agent at its initial state.
    fn add_ego_agent(&mut self, state: AgentState) -> Result<(), EngineError>;

    /// Register an obstacle with its predicted trajectory and footprint.
    fn add_obstacle(
        &mut self,
        trajectory: Vec<AgentState>,
        length_m: f64,
        width_m: f64,
    ) -> Result<(), EngineError>;

    /// Set the velocity the ego agent should aim for. Worlds without a notion of desired velocity
    /// ignore it.
    fn set_desired_velocity(&mut self, _v_ms: f64) {}

    /// Plan `num_steps` states of the ego agent, `step_time_s` apart.
    ///
    /// The returned states start one step after the ego's initial state.
    fn generate_trajectory(
        &mut self,
        step_time_s: f64,
        num_steps: usize,
    ) -> Result<Vec<AgentState>, EngineError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Fills a [`PlanningWorld`] from planning requests.
#[derive(Debug, Clone, Copy)]
pub struct WorldAssembler {
    converter: FrameConverter,
}

/// Summary of what was registered in the world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub num_obstacles: usize,
    pub num_obstacle_states: usize,

    /// Obstacles left out because their footprint is not a positive size.
    pub num_skipped: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors raised by the planning engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("The world has no ego agent")]
    NoEgoAgent,

    #[error("Invalid planning horizon ({0} steps of {1} s)")]
    InvalidHorizon(usize, f64),

    #[error("Behaviour policy error: {0}")]
    PolicyError(PolicyError),

    #[error("The engine produced an unusable trajectory: {0}")]
    InvalidTrajectory(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl WorldAssembler {
    pub fn new(converter: FrameConverter) -> Self {
        Self { converter }
    }

    /// Rebuild the world from the request.
    ///
    /// All states are converted with the negative of the planning init point's relative time, so
    /// that the ego starts at local time zero.
    pub fn assemble<W: PlanningWorld + ?Sized>(
        &self,
        world: &mut W,
        request: &PlanningRequest,
    ) -> Result<AssemblyReport, EngineError> {
        world.reset()?;

        let init_point = &request.planning_init_point;
        let time_offset_s = -init_point.relative_time;

        let ego = self.converter.to_local(init_point, time_offset_s);
        trace!("Ego agent initial state: {:?}", ego);
        world.add_ego_agent(ego)?;
        world.set_desired_velocity(request.velocity_desired);

        let mut report = AssemblyReport::default();

        for obstacle in request.obstacles.iter() {
            // A bad footprint only costs that obstacle, the rest of the request is still planned
            if !(obstacle.box_length > 0.0 && obstacle.box_width > 0.0) {
                warn!(
                    "Skipping obstacle {} with footprint {} x {} m",
                    obstacle.id, obstacle.box_length, obstacle.box_width
                );
                report.num_skipped += 1;
                continue;
            }

            let trajectory: Vec<AgentState> = obstacle
                .prediction
                .iter()
                .map(|p| self.converter.to_local(p, time_offset_s))
                .collect();

            trace!(
                "Obstacle {}: {} predicted states, {} x {} m",
                obstacle.id,
                trajectory.len(),
                obstacle.box_length,
                obstacle.box_width
            );

            report.num_obstacles += 1;
            report.num_obstacle_states += trajectory.len();

            world.add_obstacle(trajectory, obstacle.box_length, obstacle.box_width)?;
        }

        Ok(report)
    }
}

impl From<PolicyError> for EngineError {
    fn from(e: PolicyError) -> Self {
        EngineError::PolicyError(e)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::FrameOffsets;
    use comms_if::msg::planning::{PredictedObstacle, TrajectoryPoint};

    /// World which records everything registered in it.
    #[derive(Default)]
    struct RecordingWorld {
        num_resets: usize,
        ego: Option<AgentState>,
        obstacles: Vec<(Vec<AgentState>, f64, f64)>,
    }

    impl PlanningWorld for RecordingWorld {
        fn reset(&mut self) -> Result<(), EngineError> {
            self.num_resets += 1;
            self.ego = None;
            self.obstacles.clear();
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
            self.obstacles.push((trajectory, length_m, width_m));
            Ok(())
        }

        fn generate_trajectory(&mut self, _: f64, _: usize) -> Result<Vec<AgentState>, EngineError> {
            Ok(vec![])
        }
    }

    fn assembler() -> WorldAssembler {
        WorldAssembler::new(FrameConverter::new(FrameOffsets { x_m: 100.0, y_m: 200.0 }))
    }

    fn point(t: f64, x: f64, y: f64) -> TrajectoryPoint {
        TrajectoryPoint { relative_time: t, x, y, theta: 0.25, v: 2.0 }
    }

    fn request(num_obstacles: usize, num_points: usize) -> PlanningRequest {
        PlanningRequest {
            planning_init_point: point(0.5, 110.0, 220.0),
            obstacles: (0..num_obstacles)
                .map(|i| PredictedObstacle {
                    id: i as i32,
                    prediction: (0..num_points)
                        .map(|k| point(0.5 * k as f64, 130.0 + i as f64, 200.0 + k as f64))
                        .collect(),
                    box_length: 4.0 + i as f64,
                    box_width: 2.0,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_obstacles() {
        let mut world = RecordingWorld::default();

        let report = assembler().assemble(&mut world, &request(0, 0)).unwrap();

        assert_eq!(report, AssemblyReport::default());
        assert_eq!(world.ego, Some(AgentState::new(0.0, 10.0, 20.0, 0.25, 2.0)));
        assert!(world.obstacles.is_empty());
    }

    #[test]
    fn test_obstacles_in_order() {
        let mut world = RecordingWorld::default();

        let report = assembler().assemble(&mut world, &request(3, 4)).unwrap();

        assert_eq!(
            report,
            AssemblyReport { num_obstacles: 3, num_obstacle_states: 12, num_skipped: 0 }
        );
        assert_eq!(world.obstacles.len(), 3);

        for (i, (traj, length, width)) in world.obstacles.iter().enumerate() {
            assert_eq!(*length, 4.0 + i as f64);
            assert_eq!(*width, 2.0);
            assert_eq!(traj.len(), 4);

            for (k, state) in traj.iter().enumerate() {
                // Same time offset as the ego: shifted by the init point's relative time
                assert_eq!(state.time_s, 0.5 * k as f64 - 0.5);
                assert_eq!(state.x_m, 30.0 + i as f64);
                assert_eq!(state.y_m, k as f64);
            }
        }
    }

    #[test]
    fn test_bad_footprint_skips_only_that_obstacle() {
        let mut world = RecordingWorld::default();
        let mut req = request(3, 2);
        req.obstacles[1].box_length = 0.0;

        let report = assembler().assemble(&mut world, &req).unwrap();

        assert_eq!(
            report,
            AssemblyReport { num_obstacles: 2, num_obstacle_states: 4, num_skipped: 1 }
        );
        assert!(world.ego.is_some());

        // The remaining obstacles keep their order
        let lengths: Vec<f64> = world.obstacles.iter().map(|o| o.1).collect();
        assert_eq!(lengths, vec![4.0, 6.0]);
    }

    #[test]
    fn test_world_is_rebuilt() {
        let mut world = RecordingWorld::default();
        let asm = assembler();

        asm.assemble(&mut world, &request(2, 3)).unwrap();
        asm.assemble(&mut world, &request(1, 3)).unwrap();

        assert_eq!(world.num_resets, 2);
        assert_eq!(world.obstacles.len(), 1);
    }
}
