//! Planning bridge executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logging and parameters
//!     - Load the startup resources (lane map, behaviour policy)
//!     - Start the engine worker and the network:
//!         - Planning request subscriber
//!         - Chassis telemetry subscriber, feeding the interaction monitor
//!         - Planning response publisher
//!     - Main loop, one planning cycle per period until ctrl-c
//!     - Save the interaction log into the session and stop all threads

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::info;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

// Internal
use comms_if::net::{zmq, NetParams};
use plan_lib::{
    cycle::CycleController,
    engine::SimWorld,
    frame::FrameConverter,
    gateway::{Gateway, ResponseServer},
    inbox::Inbox,
    map::LaneMap,
    monitor::InteractionMonitor,
    params::PlanExecParams,
    policy::build_policy,
    worker::EngineWorker,
    world::WorldAssembler,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Session-relative path the interaction log is saved to on shutdown.
const INTERACTIONS_FILE: &str = "driver_interactions.json";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("plan_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Planning Bridge Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams = util::params::load("net.toml").wrap_err("Could not load net params")?;

    let params: PlanExecParams =
        util::params::load("plan_exec.toml").wrap_err("Could not load plan_exec params")?;
    params.cycle.validate().wrap_err("Invalid cycle parameters")?;

    info!("Exec parameters loaded");

    // ---- LOAD RESOURCES ----

    let converter = FrameConverter::new(params.frame_offsets);

    let map_path = host::resolve(&params.map_path).wrap_err("Could not resolve the map path")?;
    let map = LaneMap::from_csv(&map_path, params.frame_offsets)
        .wrap_err_with(|| format!("Could not load the lane map from {:?}", map_path))?;
    info!("Lane map loaded with {} lanes", map.lanes().len());

    // The session already required the root to be set, so resolving cannot fail here
    let policy = build_policy(&params.policy, |p| host::resolve(p).unwrap_or_else(|_| p.into()))
        .wrap_err("Could not build the behaviour policy")?;

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let world = SimWorld::new(params.engine.clone(), Arc::new(map), policy);
    let worker = EngineWorker::new(Box::new(world), WorldAssembler::new(converter))
        .wrap_err("Failed to start the engine worker")?;
    info!("Engine worker started");

    let inbox = Arc::new(Inbox::new());
    let monitor = Arc::new(InteractionMonitor::new(params.interaction));

    info!("Module initialisation complete\n");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let gateway = Gateway::start(&zmq_ctx, &net_params, inbox.clone(), monitor.clone())
        .wrap_err("Failed to start the gateway")?;
    info!("Gateway subscribers started");

    let response_server =
        ResponseServer::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise ResponseServer")?;
    info!("ResponseServer initialised");

    info!("Network initialisation complete");

    // ---- SHUTDOWN HANDLER ----

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed))
            .wrap_err("Failed to set the ctrl-c handler")?;
    }

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut controller =
        CycleController::new(params.cycle.clone(), converter, inbox, worker, response_server);

    controller.run(&shutdown);

    info!(
        "Shutdown requested after {} responses",
        controller.next_sequence_num()
    );

    // ---- SHUTDOWN ----

    gateway.stop();
    controller.shutdown();

    let interactions = monitor.interactions();
    info!("{} driver interactions recorded", interactions.len());
    session.save(INTERACTIONS_FILE, interactions);

    session.exit();

    Ok(())
}
