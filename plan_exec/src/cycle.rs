//! # Cycle Controller
//!
//! The fixed period loop of the bridge. On every tick the controller checks whether a planning
//! request is pending and, if so, has the engine worker assemble the world and generate a
//! trajectory, turns the result into a response anchored on the request's planning init point, and
//! publishes it.
//!
//! A tick never fails the loop. Engine and publish failures are logged and the request they were
//! working on is dropped, so that the next request is planned on the next tick.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use comms_if::msg::{
    planning::{PlanningResponse, TrajectoryPoint},
    Header,
};
use log::{debug, error, warn};
use serde::Deserialize;
use util::time::now_unix_seconds;

use crate::{
    frame::{AgentState, FrameConverter},
    gateway::GatewayError,
    inbox::{Inbox, InboxError},
    worker::{EngineWorker, PlanJob, WorkerError},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default module name carried in the header of every response, the name the response consumers
/// filter on.
pub const DEFAULT_MODULE_NAME: &str = "bark_response";

/// Longest accepted cycle period, step time or engine timeout.
///
/// Units: seconds
pub const MAX_TIMING_S: f64 = 3600.0;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Outbound side of the gateway.
pub trait ResponsePublisher {
    /// Send the response. No retry is attempted on failure.
    fn publish(&mut self, response: &PlanningResponse) -> Result<(), GatewayError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Timing and horizon of the planning cycle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleParams {
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Time between two generated states.
    ///
    /// Units: seconds
    pub step_time_s: f64,

    /// Number of states generated per cycle.
    pub num_steps: usize,

    /// Longest the cycle waits for the engine. Defaults to the cycle period.
    ///
    /// Units: seconds
    pub engine_timeout_s: Option<f64>,

    /// Module name written in the response headers.
    pub module_name: String,
}

/// Drives one planning cycle per tick.
pub struct CycleController<P: ResponsePublisher> {
    params: CycleParams,
    converter: FrameConverter,
    inbox: Arc<Inbox>,
    worker: EngineWorker,
    publisher: P,

    /// Sequence number of the next response, incremented on every successful publish.
    sequence_num: u64,

    /// Id of the next planning job, incremented on every job submitted to the worker.
    cycle_id: u64,

    /// Abandoned job the cycle has already warned about.
    stuck_job: Option<u64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What happened during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No request pending.
    Idle,

    /// A request is flagged but none has been received.
    NotReady,

    /// A response was published with the given sequence number.
    Published { sequence_num: u64 },

    /// The engine failed, the request was dropped.
    EngineFailure,

    /// The response could not be sent, the request was dropped.
    PublishFailure,

    /// The engine is still running a job from an earlier cycle, the request stays pending.
    WorkerBusy,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleParamsError {
    #[error("{0} must be a finite number of seconds in (0, 3600], found {1}")]
    InvalidTiming(&'static str, f64),

    #[error("num_steps must be at least 1")]
    NoSteps,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Inbox error: {0}")]
    InboxError(#[from] InboxError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for CycleParams {
    fn default() -> Self {
        Self {
            cycle_period_s: 0.2,
            step_time_s: 0.2,
            num_steps: 10,
            engine_timeout_s: None,
            module_name: DEFAULT_MODULE_NAME.into(),
        }
    }
}

impl CycleParams {
    /// Check that the timings can be used by the cycle.
    pub fn validate(&self) -> Result<(), CycleParamsError> {
        check_timing("cycle_period_s", self.cycle_period_s)?;
        check_timing("step_time_s", self.step_time_s)?;
        if let Some(t) = self.engine_timeout_s {
            check_timing("engine_timeout_s", t)?;
        }

        if self.num_steps == 0 {
            return Err(CycleParamsError::NoSteps);
        }

        Ok(())
    }

    /// Target period of the cycle.
    pub fn cycle_period(&self) -> Duration {
        secs_to_duration(self.cycle_period_s)
    }

    /// Longest the cycle waits for the engine.
    pub fn engine_deadline(&self) -> Duration {
        secs_to_duration(self.engine_timeout_s.unwrap_or(self.cycle_period_s))
    }
}

impl<P: ResponsePublisher> CycleController<P> {
    pub fn new(
        params: CycleParams,
        converter: FrameConverter,
        inbox: Arc<Inbox>,
        worker: EngineWorker,
        publisher: P,
    ) -> Self {
        Self {
            params,
            converter,
            inbox,
            worker,
            publisher,
            sequence_num: 0,
            cycle_id: 0,
            stuck_job: None,
        }
    }

    /// Sequence number the next published response will carry.
    pub fn next_sequence_num(&self) -> u64 {
        self.sequence_num
    }

    /// Run one planning cycle if a request is pending.
    pub fn tick(&mut self) -> Result<TickOutcome, CycleError> {
        if !self.inbox.is_pending()? {
            return Ok(TickOutcome::Idle);
        }

        // Don't take a snapshot for a job that couldn't be submitted anyway
        if let Some(id) = self.worker.busy_with() {
            self.report_stuck(id);
            return Ok(TickOutcome::WorkerBusy);
        }

        let snapshot = match self.inbox.take_snapshot()? {
            Some(s) => s,
            None => {
                warn!("No planning request has been received, cycle skipped");
                return Ok(TickOutcome::NotReady);
            }
        };

        let cycle_start = Instant::now();
        let cycle_id = self.cycle_id;
        self.cycle_id += 1;

        let init_point = snapshot.request.planning_init_point;

        debug!(
            "[cycle {}] Planning request {} with {} obstacles",
            cycle_id,
            snapshot.request.header.sequence_num,
            snapshot.request.obstacles.len()
        );

        let job = PlanJob {
            cycle_id,
            request: snapshot.request.clone(),
            step_time_s: self.params.step_time_s,
            num_steps: self.params.num_steps,
        };

        let states = match self.worker.plan(job, self.params.engine_deadline()) {
            Ok(s) => s,
            Err(WorkerError::Busy(id)) => {
                self.report_stuck(id);
                return Ok(TickOutcome::WorkerBusy);
            }
            Err(e) => {
                error!("[cycle {}] Trajectory generation failed: {}", cycle_id, e);
                self.inbox.complete(&snapshot)?;
                return Ok(TickOutcome::EngineFailure);
            }
        };

        let response = assemble_response(
            &self.converter,
            &init_point,
            &states,
            &self.params.module_name,
            self.sequence_num,
            now_unix_seconds(),
        );

        let outcome = match self.publisher.publish(&response) {
            Ok(()) => {
                let sequence_num = self.sequence_num;
                self.sequence_num += 1;
                TickOutcome::Published { sequence_num }
            }
            Err(e) => {
                warn!("[cycle {}] Could not publish the response: {}", cycle_id, e);
                TickOutcome::PublishFailure
            }
        };

        if !self.inbox.complete(&snapshot)? {
            debug!("[cycle {}] A newer request arrived during the cycle", cycle_id);
        }

        debug!(
            "[cycle {}] Cycle took {:.06} s",
            cycle_id,
            cycle_start.elapsed().as_secs_f64()
        );

        Ok(outcome)
    }

    /// Tick at the cycle period until `shutdown` is raised.
    ///
    /// The flag is only checked between ticks, a running cycle always completes.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let period = self.params.cycle_period();

        while !shutdown.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();

            if let Err(e) = self.tick() {
                error!("Planning cycle error: {}", e);
            }

            // Sleep out the rest of the period, overruns are only reported
            let cycle_dur = Instant::now() - cycle_start;
            match remaining_period(period, cycle_dur) {
                Some(d) => thread::sleep(d),
                None => warn!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - period.as_secs_f64()
                ),
            }
        }
    }

    /// Warn once per abandoned job keeping the worker busy.
    fn report_stuck(&mut self, id: u64) {
        if note_stuck_job(&mut self.stuck_job, id) {
            warn!(
                "Engine still busy with the abandoned job of cycle {}, requests are waiting",
                id
            );
        } else {
            debug!("Engine still busy with the job of cycle {}", id);
        }
    }

    /// Stop the engine worker and hand back the publisher.
    pub fn shutdown(self) -> P {
        self.worker.stop();
        self.publisher
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the response for the generated states.
///
/// The first point is the planning init point, copied unchanged. The generated states follow,
/// converted back into the global frame with the init point's relative time as the time offset.
pub fn assemble_response(
    converter: &FrameConverter,
    init_point: &TrajectoryPoint,
    states: &[AgentState],
    module_name: &str,
    sequence_num: u64,
    timestamp_sec: f64,
) -> PlanningResponse {
    let time_offset_s = init_point.relative_time;

    let mut planned_trajectory = Vec::with_capacity(states.len() + 1);
    planned_trajectory.push(*init_point);
    planned_trajectory.extend(states.iter().map(|s| converter.to_global(s, time_offset_s)));

    PlanningResponse {
        header: Header {
            timestamp_sec,
            module_name: module_name.into(),
            sequence_num,
        },
        planned_trajectory,
    }
}

/// Time left in the period after a cycle of the given duration, `None` on overrun.
pub fn remaining_period(period: Duration, cycle_dur: Duration) -> Option<Duration> {
    period.checked_sub(cycle_dur)
}

/// Record `id` as the stuck job, returning true if it wasn't already.
fn note_stuck_job(last: &mut Option<u64>, id: u64) -> bool {
    if *last == Some(id) {
        false
    } else {
        *last = Some(id);
        true
    }
}

fn check_timing(name: &'static str, value_s: f64) -> Result<(), CycleParamsError> {
    if value_s.is_finite() && value_s > 0.0 && value_s <= MAX_TIMING_S {
        Ok(())
    } else {
        Err(CycleParamsError::InvalidTiming(name, value_s))
    }
}

/// Seconds to a duration, clamped into `[0, MAX_TIMING_S]`. NaN maps to zero.
fn secs_to_duration(value_s: f64) -> Duration {
    Duration::from_secs_f64(value_s.max(0.0).min(MAX_TIMING_S))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::FrameOffsets;

    #[test]
    fn test_assemble_response() {
        let converter = FrameConverter::new(FrameOffsets { x_m: 1000.0, y_m: 2000.0 });
        let init = TrajectoryPoint {
            relative_time: 1.5,
            x: 1010.3,
            y: 2020.7,
            theta: 0.1,
            v: 3.3,
        };
        let states = vec![
            AgentState::new(0.5, 11.0, 21.0, 0.1, 3.5),
            AgentState::new(1.0, 12.0, 22.0, 0.1, 3.75),
        ];

        let response = assemble_response(&converter, &init, &states, "bark_response", 7, 123.0);

        assert_eq!(response.header.sequence_num, 7);
        assert_eq!(response.header.timestamp_sec, 123.0);
        assert_eq!(response.header.module_name, "bark_response");

        assert_eq!(response.planned_trajectory.len(), 3);
        assert_eq!(response.planned_trajectory[0], init);
        assert_eq!(
            response.planned_trajectory[1],
            TrajectoryPoint { relative_time: 2.0, x: 1011.0, y: 2021.0, theta: 0.1, v: 3.5 }
        );
        assert_eq!(response.planned_trajectory[2].relative_time, 2.5);
    }

    #[test]
    fn test_engine_deadline() {
        let mut params = CycleParams::default();
        assert_eq!(params.engine_deadline(), Duration::from_millis(200));

        params.engine_timeout_s = Some(0.5);
        assert_eq!(params.engine_deadline(), Duration::from_millis(500));

        // Out of range values never panic
        params.engine_timeout_s = Some(std::f64::INFINITY);
        assert_eq!(params.engine_deadline(), Duration::from_secs(3600));
        params.engine_timeout_s = Some(1e20);
        assert_eq!(params.engine_deadline(), Duration::from_secs(3600));
        params.cycle_period_s = std::f64::NAN;
        assert_eq!(params.cycle_period(), Duration::from_secs(0));
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        assert!(CycleParams::default().validate().is_ok());

        let bad_timeouts = [std::f64::INFINITY, 1e20, 0.0, -1.0, std::f64::NAN];
        for &t in bad_timeouts.iter() {
            let params = CycleParams { engine_timeout_s: Some(t), ..Default::default() };
            assert!(matches!(
                params.validate(),
                Err(CycleParamsError::InvalidTiming("engine_timeout_s", _))
            ));
        }

        for &t in [0.0, -0.2, std::f64::NAN, std::f64::INFINITY].iter() {
            let params = CycleParams { cycle_period_s: t, ..Default::default() };
            assert!(matches!(
                params.validate(),
                Err(CycleParamsError::InvalidTiming("cycle_period_s", _))
            ));

            let params = CycleParams { step_time_s: t, ..Default::default() };
            assert!(matches!(
                params.validate(),
                Err(CycleParamsError::InvalidTiming("step_time_s", _))
            ));
        }

        let params = CycleParams { num_steps: 0, ..Default::default() };
        assert!(matches!(params.validate(), Err(CycleParamsError::NoSteps)));
    }

    #[test]
    fn test_stuck_job_reported_once() {
        let mut last = None;

        assert!(note_stuck_job(&mut last, 3));
        assert!(!note_stuck_job(&mut last, 3));
        assert!(!note_stuck_job(&mut last, 3));

        // A different abandoned job is reported again
        assert!(note_stuck_job(&mut last, 5));
        assert_eq!(last, Some(5));
    }

    #[test]
    fn test_remaining_period() {
        let period = Duration::from_millis(200);

        assert_eq!(
            remaining_period(period, Duration::from_millis(50)),
            Some(Duration::from_millis(150))
        );
        assert_eq!(remaining_period(period, period), Some(Duration::from_secs(0)));

        // Overrun: no sleep, the next tick starts straight away
        assert_eq!(remaining_period(period, Duration::from_millis(250)), None);
    }

    #[test]
    fn test_params_from_toml() {
        let params: CycleParams = util::params::parse(
            r#"
            cycle_period_s = 0.1
            num_steps = 20
            "#,
        )
        .unwrap();

        assert_eq!(params.cycle_period_s, 0.1);
        assert_eq!(params.step_time_s, 0.2);
        assert_eq!(params.num_steps, 20);
        assert!(params.engine_timeout_s.is_none());
        assert_eq!(params.module_name, DEFAULT_MODULE_NAME);
    }
}
