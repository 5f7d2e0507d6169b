//! # Communications interface crate.
//!
//! Provides the message definitions exchanged with the motion-planning stack and the network
//! plumbing used to move them around.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Message definitions for the planning request/response and chassis telemetry channels
pub mod msg;

/// Network module
pub mod net;
