//! # Behaviour Policies
//!
//! A behaviour policy decides, at every step of a rollout, which acceleration and curvature the
//! ego agent should apply. The policy used by the bridge is chosen once at startup from the
//! parameters and never switched while running.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod learned;
mod rule_based;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::{
    engine::{EngineParams, WorldState},
    frame::AgentState,
    map::{LaneMap, LaneProjection},
};

pub use learned::{Checkpoint, DenseLayer, LearnedPolicy, NUM_FEATURES};
pub use rule_based::{RuleBasedParams, RuleBasedPolicy};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A behaviour policy driving the ego agent through the world.
pub trait BehaviorPolicy: Send {
    /// Name of the policy, for logging.
    fn name(&self) -> &'static str;

    /// Choose the action to apply for the next step.
    fn act(&mut self, obs: &Observation) -> Result<Action, PolicyError>;

    /// Roll the ego agent forward through the world, one action per step.
    fn produce_trajectory(
        &mut self,
        world: &WorldState,
        step_time_s: f64,
        num_steps: usize,
    ) -> Result<Vec<AgentState>, PolicyError> {
        let mut ego = world.ego;
        let mut trajectory = Vec::with_capacity(num_steps);

        for _ in 0..num_steps {
            let obs = world.observe(&ego);
            let action = self.act(&obs)?;

            if !action.acceleration_mss.is_finite() || !action.curvature_m.is_finite() {
                return Err(PolicyError::NonFiniteAction(action));
            }

            ego = world.integrate(&ego, &action, step_time_s);
            trajectory.push(ego);
        }

        Ok(trajectory)
    }
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// What a policy sees of the world at one step.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub ego: AgentState,

    /// Ego position relative to the closest lane.
    pub lane: LaneProjection,

    pub map: &'a LaneMap,

    /// Closest obstacle ahead in the ego's lane, if any.
    pub leader: Option<Leader>,

    /// Units: meters/second
    pub desired_velocity_ms: f64,

    /// Limits of the ego's kinematic model.
    pub limits: &'a EngineParams,
}

/// The obstacle the ego is following.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leader {
    /// Free space between the ego's front and the leader's rear.
    ///
    /// Units: meters
    pub gap_m: f64,

    /// Units: meters/second
    pub v_ms: f64,
}

/// Control applied to the ego for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Action {
    /// Units: meters/second^2
    pub acceleration_mss: f64,

    /// Path curvature, positive to the left.
    ///
    /// Units: 1/meters
    pub curvature_m: f64,
}

/// Policy selection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyParams {
    pub kind: PolicyKind,

    /// Path to the learned policy's checkpoint, required if `kind` is `Learned`.
    #[serde(default)]
    pub checkpoint_path: Option<String>,

    #[serde(default)]
    pub rule_based: RuleBasedParams,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PolicyKind {
    RuleBased,
    Learned,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("A learned policy was selected but no checkpoint path was given")]
    NoCheckpoint,

    #[error("Cannot load the policy checkpoint: {0}")]
    CheckpointLoadError(std::io::Error),

    #[error("Cannot parse the policy checkpoint: {0}")]
    CheckpointParseError(serde_json::Error),

    #[error("The policy checkpoint contains no layers")]
    EmptyNetwork,

    #[error("Layer {layer} of the checkpoint expects {expected} inputs but {found} are provided")]
    DimensionMismatch {
        layer: usize,
        expected: usize,
        found: usize,
    },

    #[error("The policy produced a non-finite action: {0:?}")]
    NonFiniteAction(Action),
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the policy selected in the parameters.
///
/// `resolve` maps the checkpoint path from the parameters onto the file system.
pub fn build_policy<F, P>(
    params: &PolicyParams,
    resolve: F,
) -> Result<Box<dyn BehaviorPolicy>, PolicyError>
where
    F: FnOnce(&str) -> P,
    P: AsRef<Path>,
{
    let policy: Box<dyn BehaviorPolicy> = match params.kind {
        PolicyKind::RuleBased => Box::new(RuleBasedPolicy::new(params.rule_based.clone())),
        PolicyKind::Learned => {
            let path = params
                .checkpoint_path
                .as_ref()
                .ok_or(PolicyError::NoCheckpoint)?;
            let checkpoint = Checkpoint::load(resolve(path))?;
            Box::new(LearnedPolicy::new(checkpoint)?)
        }
    };

    info!("Behaviour policy: {}", policy.name());

    Ok(policy)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
