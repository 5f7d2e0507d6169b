//! # Learned policy
//!
//! A small feed-forward network trained offline, restored from a JSON checkpoint. Every layer uses
//! a `tanh` activation, so the two outputs lie in [-1, 1] and are scaled onto the kinematic limits
//! of the ego: output 0 is the acceleration, output 1 the curvature.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{fs::File, io::BufReader, path::Path};

use log::debug;
use ndarray::{arr1, Array1, Array2};
use serde::Deserialize;
use util::maths::{ang_dist, lin_map};

use super::{Action, BehaviorPolicy, Observation, PolicyError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of features in the observation vector fed to the network.
pub const NUM_FEATURES: usize = 6;

/// Number of network outputs.
const NUM_OUTPUTS: usize = 2;

/// Gap reported to the network when there is no leader.
///
/// Units: meters
const MAX_GAP_M: f64 = 100.0;

/// Normalisation of speed differences.
///
/// Units: meters/second
const SPEED_SCALE_MS: f64 = 10.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Serialised network weights.
#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint {
    pub layers: Vec<DenseLayer>,
}

/// A fully connected layer computing `tanh(weights . input + bias)`.
#[derive(Debug, Clone, Deserialize)]
pub struct DenseLayer {
    /// Shape `(outputs, inputs)`.
    pub weights: Array2<f64>,

    pub bias: Array1<f64>,
}

/// Policy evaluating a restored network.
#[derive(Debug, Clone)]
pub struct LearnedPolicy {
    layers: Vec<DenseLayer>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Checkpoint {
    /// Read a checkpoint from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let file = File::open(path.as_ref()).map_err(PolicyError::CheckpointLoadError)?;

        let checkpoint: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(PolicyError::CheckpointParseError)?;

        debug!(
            "Loaded policy checkpoint {:?} with {} layers",
            path.as_ref(),
            checkpoint.layers.len()
        );

        Ok(checkpoint)
    }
}

impl DenseLayer {
    fn forward(&self, input: &Array1<f64>) -> Array1<f64> {
        (self.weights.dot(input) + &self.bias).mapv(f64::tanh)
    }
}

impl LearnedPolicy {
    /// Build the policy, checking the layer shapes chain from the observation to the action.
    pub fn new(checkpoint: Checkpoint) -> Result<Self, PolicyError> {
        if checkpoint.layers.is_empty() {
            return Err(PolicyError::EmptyNetwork);
        }

        let mut width = NUM_FEATURES;
        for (i, layer) in checkpoint.layers.iter().enumerate() {
            let (outputs, inputs) = layer.weights.dim();

            if inputs != width {
                return Err(PolicyError::DimensionMismatch {
                    layer: i,
                    expected: inputs,
                    found: width,
                });
            }
            if layer.bias.len() != outputs {
                return Err(PolicyError::DimensionMismatch {
                    layer: i,
                    expected: outputs,
                    found: layer.bias.len(),
                });
            }

            width = outputs;
        }

        if width != NUM_OUTPUTS {
            return Err(PolicyError::DimensionMismatch {
                layer: checkpoint.layers.len(),
                expected: NUM_OUTPUTS,
                found: width,
            });
        }

        Ok(Self {
            layers: checkpoint.layers,
        })
    }

    /// Build the normalised feature vector.
    fn features(obs: &Observation) -> Array1<f64> {
        let v0 = obs.desired_velocity_ms.max(0.1);
        let (gap, dv) = match obs.leader {
            Some(l) => (l.gap_m.min(MAX_GAP_M), l.v_ms - obs.ego.v_ms),
            None => (MAX_GAP_M, 0.0),
        };

        arr1(&[
            obs.ego.v_ms / v0,
            (v0 - obs.ego.v_ms) / SPEED_SCALE_MS,
            obs.lane.lateral_m / obs.limits.lane_half_width_m,
            ang_dist(obs.lane.heading_rad, obs.ego.theta_rad),
            gap / MAX_GAP_M,
            dv / SPEED_SCALE_MS,
        ])
    }
}

impl BehaviorPolicy for LearnedPolicy {
    fn name(&self) -> &'static str {
        "Learned"
    }

    fn act(&mut self, obs: &Observation) -> Result<Action, PolicyError> {
        let output = self
            .layers
            .iter()
            .fold(Self::features(obs), |x, layer| layer.forward(&x));

        let limits = obs.limits;

        Ok(Action {
            acceleration_mss: lin_map(
                (-1.0, 1.0),
                (-limits.max_deceleration_mss, limits.max_acceleration_mss),
                output[0],
            ),
            curvature_m: lin_map(
                (-1.0, 1.0),
                (-limits.max_curvature_m, limits.max_curvature_m),
                output[1],
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
