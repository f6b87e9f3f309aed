use thiserror::Error;

use crate::device::DeviceError;
use crate::encoding::ConversionError;
use crate::modules::ModuleError;
use crate::protocol::ReplyError;
use crate::session::SessionClosed;
use crate::tracker::TrackerError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Reply error: {0}")]
    Reply(#[from] ReplyError),
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),
    #[error("Session error: {0}")]
    Session(#[from] SessionClosed),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
