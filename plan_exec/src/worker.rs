//! # Engine Worker
//!
//! The planning engine runs on its own thread so that the cycle can give up on a call that takes
//! longer than its deadline. Jobs are tagged with the id of the cycle that submitted them, results
//! arriving after their cycle gave up are discarded.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use comms_if::msg::planning::PlanningRequest;
use log::{debug, warn};

use crate::{
    frame::AgentState,
    world::{EngineError, PlanningWorld, WorldAssembler},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Handle to the engine thread.
pub struct EngineWorker {
    sender: Sender<WorkerSignal>,
    receiver: Receiver<PlanOutput>,
    jh: Option<JoinHandle<()>>,

    /// Id of the job the worker is still running after its cycle gave up on it.
    busy_with: Option<u64>,
}

/// A planning job for the engine.
#[derive(Debug)]
pub struct PlanJob {
    pub cycle_id: u64,
    pub request: PlanningRequest,
    pub step_time_s: f64,
    pub num_steps: usize,
}

/// Result of a job, sent back by the engine thread.
#[derive(Debug)]
pub struct PlanOutput {
    pub cycle_id: u64,
    pub result: Result<Vec<AgentState>, EngineError>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum WorkerSignal {
    /// Assemble the world from the job's request and generate a trajectory.
    Plan(Box<PlanJob>),

    /// The worker should stop.
    Stop,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Engine error: {0}")]
    Engine(EngineError),

    #[error("The engine did not answer before the deadline")]
    Timeout,

    #[error("The engine is still running the job of cycle {0}")]
    Busy(u64),

    #[error("The engine thread has stopped")]
    Disconnected,

    #[error("Could not start the engine thread: {0}")]
    SpawnError(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl EngineWorker {
    /// Start the engine thread, which takes ownership of the world.
    pub fn new(
        world: Box<dyn PlanningWorld>,
        assembler: WorldAssembler,
    ) -> Result<Self, WorkerError> {
        let (sender, rx) = channel();
        let (tx, receiver) = channel();

        let jh = thread::Builder::new()
            .name("engine".into())
            .spawn(move || worker_thread(world, assembler, tx, rx))
            .map_err(WorkerError::SpawnError)?;

        Ok(Self {
            sender,
            receiver,
            jh: Some(jh),
            busy_with: None,
        })
    }

    /// Id of the job the worker is still running after its cycle gave up on it.
    pub fn busy_with(&mut self) -> Option<u64> {
        self.drain_stale();
        self.busy_with
    }

    /// Run a job on the engine thread and wait at most `deadline` for its result.
    pub fn plan(&mut self, job: PlanJob, deadline: Duration) -> Result<Vec<AgentState>, WorkerError> {
        self.drain_stale();
        if let Some(id) = self.busy_with {
            return Err(WorkerError::Busy(id));
        }

        let cycle_id = job.cycle_id;
        let start = Instant::now();

        self.sender
            .send(WorkerSignal::Plan(Box::new(job)))
            .map_err(|_| WorkerError::Disconnected)?;
        self.busy_with = Some(cycle_id);

        loop {
            let remaining = deadline
                .checked_sub(start.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            match self.receiver.recv_timeout(remaining) {
                Ok(output) if output.cycle_id == cycle_id => {
                    self.busy_with = None;
                    return output.result.map_err(WorkerError::Engine);
                }
                Ok(output) => {
                    warn!("Discarding stale engine result of cycle {}", output.cycle_id)
                }
                Err(RecvTimeoutError::Timeout) => return Err(WorkerError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(WorkerError::Disconnected),
            }
        }
    }

    /// Stop the engine thread and wait for it to exit.
    pub fn stop(mut self) {
        self.sender.send(WorkerSignal::Stop).ok();

        if let Some(jh) = self.jh.take() {
            if jh.join().is_err() {
                warn!("The engine thread panicked");
            }
        }
    }

    /// Collect results of jobs abandoned by earlier cycles.
    fn drain_stale(&mut self) {
        while self.busy_with.is_some() {
            match self.receiver.try_recv() {
                Ok(output) => {
                    warn!("Discarding stale engine result of cycle {}", output.cycle_id);
                    if Some(output.cycle_id) == self.busy_with {
                        self.busy_with = None;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl Drop for EngineWorker {
    fn drop(&mut self) {
        // Don't join here, the engine may be stuck in a job
        self.sender.send(WorkerSignal::Stop).ok();
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn worker_thread(
    mut world: Box<dyn PlanningWorld>,
    assembler: WorldAssembler,
    main_sender: Sender<PlanOutput>,
    main_receiver: Receiver<WorkerSignal>,
) {
    while let Ok(signal) = main_receiver.recv() {
        let job = match signal {
            WorkerSignal::Stop => break,
            WorkerSignal::Plan(job) => job,
        };

        let result = run_job(world.as_mut(), &assembler, &job);

        if main_sender
            .send(PlanOutput {
                cycle_id: job.cycle_id,
                result,
            })
            .is_err()
        {
            break;
        }
    }

    debug!("Engine thread stopped");
}

/// Assemble the world and generate the trajectory, logging the time spent in each stage.
fn run_job(
    world: &mut dyn PlanningWorld,
    assembler: &WorldAssembler,
    job: &PlanJob,
) -> Result<Vec<AgentState>, EngineError> {
    let start = Instant::now();
    let report = assembler.assemble(&mut *world, &job.request)?;
    let assembled = Instant::now();

    debug!(
        "[cycle {}] World assembled in {:.06} s ({} obstacles, {} states)",
        job.cycle_id,
        (assembled - start).as_secs_f64(),
        report.num_obstacles,
        report.num_obstacle_states
    );

    let trajectory = world.generate_trajectory(job.step_time_s, job.num_steps)?;

    debug!(
        "[cycle {}] Trajectory generated in {:.06} s",
        job.cycle_id,
        assembled.elapsed().as_secs_f64()
    );

    Ok(trajectory)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::{FrameConverter, FrameOffsets};
    use std::sync::{Arc, Mutex};

    /// World whose generation blocks until released.
    struct GatedWorld {
        gate: Arc<Mutex<()>>,
    }

    impl PlanningWorld for GatedWorld {
        fn reset(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn add_ego_agent(&mut self, _: AgentState) -> Result<(), EngineError> {
            Ok(())
        }

        fn add_obstacle(&mut self, _: Vec<AgentState>, _: f64, _: f64) -> Result<(), EngineError> {
            Ok(())
        }

        fn generate_trajectory(&mut self, dt: f64, n: usize) -> Result<Vec<AgentState>, EngineError> {
            let _guard = self.gate.lock().unwrap();
            Ok((1..=n).map(|k| AgentState::new(k as f64 * dt, 0.0, 0.0, 0.0, 0.0)).collect())
        }
    }

    fn job(cycle_id: u64) -> PlanJob {
        PlanJob {
            cycle_id,
            request: PlanningRequest::default(),
            step_time_s: 0.5,
            num_steps: 4,
        }
    }

    fn worker(gate: Arc<Mutex<()>>) -> EngineWorker {
        EngineWorker::new(
            Box::new(GatedWorld { gate }),
            WorldAssembler::new(FrameConverter::new(FrameOffsets::default())),
        )
        .unwrap()
    }

    #[test]
    fn test_plan() {
        let mut w = worker(Arc::new(Mutex::new(())));

        let traj = w.plan(job(0), Duration::from_secs(5)).unwrap();

        assert_eq!(traj.len(), 4);
        assert_eq!(traj[3].time_s, 2.0);
        assert_eq!(w.busy_with(), None);

        w.stop();
    }

    #[test]
    fn test_timeout_then_stale_result_discarded() {
        let gate = Arc::new(Mutex::new(()));
        let mut w = worker(gate.clone());

        let guard = gate.lock().unwrap();
        assert!(matches!(
            w.plan(job(0), Duration::from_millis(20)),
            Err(WorkerError::Timeout)
        ));

        // Still running the first job
        assert_eq!(w.busy_with(), Some(0));
        assert!(matches!(w.plan(job(1), Duration::from_millis(20)), Err(WorkerError::Busy(0))));

        drop(guard);

        // Wait for the abandoned job to finish
        let start = Instant::now();
        while w.busy_with().is_some() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }

        let traj = w.plan(job(2), Duration::from_secs(5)).unwrap();
        assert_eq!(traj.len(), 4);

        w.stop();
    }
}
