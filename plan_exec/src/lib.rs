//! # Planning bridge library.
//!
//! This library allows the executable, the integration tests and the benchmarks to access items
//! defined inside the planning bridge crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Cycle controller - plans the pending request once per period and publishes the response
pub mod cycle;

/// Planning engine - rolls the ego forward through the world under a behaviour policy
pub mod engine;

/// Frame converter - moves points between the global frame and the engine's local frame
pub mod frame;

/// Gateway - subscribers for requests and telemetry, publisher for responses
pub mod gateway;

/// Inbox - latest request and telemetry shared between the gateway and the cycle
pub mod inbox;

/// Lane map - lane centrelines used by the behaviour policies
pub mod map;

/// Interaction monitor - detects the driver taking over from the chassis telemetry
pub mod monitor;

/// Executable parameters
pub mod params;

/// Behaviour policies - rule based and learned
pub mod policy;

/// World assembly - fills the engine's world from a planning request
pub mod world;

/// Engine worker - runs the engine on its own thread with a deadline
pub mod worker;
