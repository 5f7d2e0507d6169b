//! # Message Interface
//!
//! This module defines the structures which travel over the bridge's channels. All messages are
//! encoded as JSON strings on the wire.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod chassis;
pub mod planning;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::{de::DeserializeOwned, Deserialize, Serialize};

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

/// Header attached to messages leaving the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Wall clock time at which the message was built, in seconds since the unix epoch.
    pub timestamp_sec: f64,

    /// Name of the module that produced the message.
    pub module_name: String,

    /// Sequence number of the message on its channel.
    pub sequence_num: u64,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

/// Errors raised while decoding or validating an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum MsgError {
    #[error("Could not deserialize the message: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The message is missing the {0} field")]
    MissingField(&'static str),

    #[error("The {0} field has an invalid value (got {1})")]
    InvalidValue(&'static str, f64),
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Decode a message from its JSON wire representation.
pub fn from_json<T: DeserializeOwned>(json: &str) -> Result<T, MsgError> {
    serde_json::from_str(json).map_err(MsgError::DeserializeError)
}

/// Check that a numeric field is finite.
pub(crate) fn check_finite(name: &'static str, value: f64) -> Result<(), MsgError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MsgError::InvalidValue(name, value))
    }
}
