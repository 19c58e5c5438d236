use thiserror::Error;

use crate::capability::types::CapabilityError;
use crate::event_bus::EventError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
    #[error("Config error: {0}")]
    Config(String),
}

pub type InternalResult<T> = Result<T, Error>;
