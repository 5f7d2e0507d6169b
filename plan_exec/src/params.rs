//! # Planning Executable Parameters
//!
//! Parameters of the planning bridge, loaded from `plan_exec.toml` at startup.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

use crate::{
    cycle::CycleParams,
    engine::EngineParams,
    frame::FrameOffsets,
    monitor::InteractionLimits,
    policy::PolicyParams,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PlanExecParams {
    /// Position of the local frame's origin in the global frame.
    pub frame_offsets: FrameOffsets,

    /// Path to the lane map CSV, relative to the software root unless absolute.
    pub map_path: String,

    pub policy: PolicyParams,

    #[serde(default)]
    pub cycle: CycleParams,

    pub interaction: InteractionLimits,

    #[serde(default)]
    pub engine: EngineParams,
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::policy::PolicyKind;

    #[test]
    fn test_parse_params() {
        let params: PlanExecParams = util::params::parse(
            r#"
            map_path = "data/lanes.csv"

            [frame_offsets]
            x_m = 652000.0
            y_m = 5339000.0

            [policy]
            kind = "RuleBased"

            [policy.rule_based]
            time_headway_s = 2.0

            [cycle]
            engine_timeout_s = 0.15

            [interaction]
            steering_wheel_torque_limit = 10.0
            throttle_limit = 10.0
            brake_limit = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(params.frame_offsets, FrameOffsets { x_m: 652000.0, y_m: 5339000.0 });
        assert_eq!(params.policy.kind, PolicyKind::RuleBased);
        assert_eq!(params.policy.rule_based.time_headway_s, 2.0);
        assert_eq!(params.policy.rule_based.min_gap_m, 2.0);
        assert_eq!(params.cycle.num_steps, 10);
        assert_eq!(params.cycle.engine_timeout_s, Some(0.15));
        assert_eq!(params.interaction.brake_limit, 10.0);
        assert_eq!(params.engine.ego_length_m, 4.5);
    }
}
