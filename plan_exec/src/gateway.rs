//! # Request/Response Gateway
//!
//! Boundary between the bridge and the messaging bus. Two subscriber threads receive planning
//! requests and chassis telemetry, copy them into the [`Inbox`] and, for telemetry, run the
//! [`InteractionMonitor`] straight away. The [`ResponseServer`] publishes planning responses.
//!
//! Malformed messages are logged and dropped, they never stop a subscriber.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use comms_if::{
    msg::{
        chassis::ChassisTelemetry,
        planning::{PlanningRequest, PlanningResponse},
    },
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{debug, error, info, trace, warn};

use crate::{cycle::ResponsePublisher, inbox::Inbox, monitor::InteractionMonitor};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Receive timeout of the subscribers, the shutdown flag is checked at least this often.
const SUB_RECV_TIMEOUT_MS: i32 = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Inbound side of the gateway.
pub struct Gateway {
    bg_run: Arc<AtomicBool>,
    request_jh: Option<JoinHandle<()>>,
    chassis_jh: Option<JoinHandle<()>>,
}

/// Publishes planning responses.
pub struct ResponseServer {
    socket: MonitoredSocket,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the response: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the response: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not start a subscriber thread: {0}")]
    SpawnError(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Gateway {
    /// Connect the subscribers and start their background threads.
    ///
    /// This function does not block until the publishers are up.
    pub fn start(
        ctx: &zmq::Context,
        params: &NetParams,
        inbox: Arc<Inbox>,
        monitor: Arc<InteractionMonitor>,
    ) -> Result<Self, GatewayError> {
        let request_socket = subscriber(ctx, &params.request_endpoint)?;
        let chassis_socket = subscriber(ctx, &params.chassis_endpoint)?;

        let bg_run = Arc::new(AtomicBool::new(true));

        let request_jh = {
            let run = bg_run.clone();
            let inbox = inbox.clone();
            thread::Builder::new()
                .name("request_sub".into())
                .spawn(move || {
                    bg_thread(request_socket, run, "planning request", |msg| {
                        handle_request_msg(&inbox, msg);
                    })
                })
                .map_err(GatewayError::SpawnError)?
        };

        let chassis_jh = {
            let run = bg_run.clone();
            thread::Builder::new()
                .name("chassis_sub".into())
                .spawn(move || {
                    bg_thread(chassis_socket, run, "chassis", |msg| {
                        handle_chassis_msg(&inbox, &monitor, msg);
                    })
                })
                .map_err(GatewayError::SpawnError)?
        };

        Ok(Self {
            bg_run,
            request_jh: Some(request_jh),
            chassis_jh: Some(chassis_jh),
        })
    }

    /// Stop the subscriber threads and wait for them to exit.
    pub fn stop(mut self) {
        self.bg_run.store(false, Ordering::Relaxed);

        let handles = self.request_jh.take().into_iter().chain(self.chassis_jh.take());
        for jh in handles {
            if jh.join().is_err() {
                error!("A gateway subscriber thread panicked");
            }
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);
    }
}

impl ResponseServer {
    /// Bind the response publisher.
    ///
    /// This function will not block until a subscriber connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, GatewayError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            bind: true,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            send_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::PUB, socket_options, &params.response_endpoint)
            .map_err(GatewayError::SocketError)?;

        Ok(Self { socket })
    }
}

impl ResponsePublisher for ResponseServer {
    fn publish(&mut self, response: &PlanningResponse) -> Result<(), GatewayError> {
        let msg = serde_json::to_string(response).map_err(GatewayError::SerializationError)?;

        self.socket.send(&msg, 0).map_err(GatewayError::SendError)?;

        trace!("Published response {}", response.header.sequence_num);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Handle a planning request message: store it as the latest request and flag it pending.
///
/// Returns `true` if the message was stored.
pub fn handle_request_msg(inbox: &Inbox, msg: &str) -> bool {
    let request = match PlanningRequest::from_json(msg) {
        Ok(r) => r,
        Err(e) => {
            warn!("Dropping malformed planning request: {}", e);
            return false;
        }
    };

    debug!(
        "Planning request {} received ({} obstacles)",
        request.header.sequence_num,
        request.obstacles.len()
    );

    match inbox.put_request(request) {
        Ok(()) => true,
        Err(e) => {
            error!("Could not store the planning request: {}", e);
            false
        }
    }
}

/// Handle a chassis telemetry message: store it and run the interaction monitor on it.
///
/// Returns `true` if the message was stored.
pub fn handle_chassis_msg(inbox: &Inbox, monitor: &InteractionMonitor, msg: &str) -> bool {
    let telemetry = match ChassisTelemetry::from_json(msg) {
        Ok(t) => t,
        Err(e) => {
            warn!("Dropping malformed chassis telemetry: {}", e);
            return false;
        }
    };

    if let Err(e) = inbox.put_chassis(telemetry) {
        error!("Could not store the chassis telemetry: {}", e);
        return false;
    }

    monitor.on_telemetry(&telemetry);

    true
}

/// Create a subscriber socket connected to the endpoint.
fn subscriber(ctx: &zmq::Context, endpoint: &str) -> Result<MonitoredSocket, GatewayError> {
    let socket_options = SocketOptions {
        block_on_first_connect: false,
        connect_timeout: 1000,
        heartbeat_ivl: 500,
        heartbeat_ttl: 1000,
        heartbeat_timeout: 1000,
        linger: 1,
        recv_timeout: SUB_RECV_TIMEOUT_MS,
        ..Default::default()
    };

    let socket = MonitoredSocket::new(ctx, zmq::SUB, socket_options, endpoint)
        .map_err(GatewayError::SocketError)?;

    info!("Subscribed to {}", endpoint);

    Ok(socket)
}

/// Background thread, passes every message received on the socket to the handler.
fn bg_thread<F>(socket: MonitoredSocket, run: Arc<AtomicBool>, channel: &str, handler: F)
where
    F: Fn(&str),
{
    while run.load(Ordering::Relaxed) {
        let msg = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Non UTF-8 {} message", channel);
                continue;
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving {} message: {}", channel, e);
                break;
            }
        };

        handler(&msg);
    }

    debug!("{} subscriber stopped", channel);
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::monitor::InteractionLimits;

    fn monitor() -> InteractionMonitor {
        InteractionMonitor::new(InteractionLimits {
            steering_wheel_torque_limit: 10.0,
            throttle_limit: 10.0,
            brake_limit: 10.0,
        })
    }

    #[test]
    fn test_request_sets_pending() {
        let inbox = Inbox::new();

        let msg = r#"{
            "planning_init_point": {"relative_time": 0.0, "x": 1.0, "y": 2.0, "theta": 0.0, "v": 3.0},
            "obstacles": []
        }"#;

        assert!(handle_request_msg(&inbox, msg));
        assert!(inbox.is_pending().unwrap());
    }

    #[test]
    fn test_malformed_request_dropped() {
        let inbox = Inbox::new();

        assert!(!handle_request_msg(&inbox, "{not json"));
        assert!(!handle_request_msg(&inbox, r#"{"obstacles": []}"#));
        assert!(!inbox.is_pending().unwrap());
    }

    #[test]
    fn test_chassis_runs_monitor() {
        let inbox = Inbox::new();
        let monitor = monitor();

        let msg = r#"{
            "timestamp": 12.5,
            "steering": {"steering_wheel_torque": 11.0},
            "gas": {"throttle_input": 0.0},
            "brake": {"brake_input": 0.0}
        }"#;

        assert!(handle_chassis_msg(&inbox, &monitor, msg));
        assert_eq!(monitor.interactions(), vec![12.5]);
        assert_eq!(inbox.latest_chassis().unwrap().unwrap().steering_wheel_torque, 11.0);

        // No request is flagged by telemetry
        assert!(!inbox.is_pending().unwrap());
    }

    #[test]
    fn test_chassis_missing_group_dropped() {
        let inbox = Inbox::new();
        let monitor = monitor();

        let msg = r#"{"timestamp": 1.0, "steering": {"steering_wheel_torque": 50.0}}"#;

        assert!(!handle_chassis_msg(&inbox, &monitor, msg));
        assert_eq!(monitor.num_interactions(), 0);
        assert!(inbox.latest_chassis().unwrap().is_none());
    }
}
