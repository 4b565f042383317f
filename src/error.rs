use crate::response::Status;
use serde::{Deserialize, Serialize};
use serde_json;
use std::error;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DedupError {
    pub msg: String,
    pub status: Status,
}

impl fmt::Display for DedupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let json = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json)
    }
}

impl error::Error for DedupError {}

impl From<std::io::Error> for DedupError {
    fn from(err: std::io::Error) -> Self {
        DedupError::io(err)
    }
}

impl From<csv::Error> for DedupError {
    fn from(err: csv::Error) -> Self {
        DedupError::io(err)
    }
}

impl DedupError {
    pub fn invalid_config<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            status: Status::InvalidConfig,
        }
    }

    pub fn invalid_input<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            status: Status::InvalidInput,
        }
    }

    pub fn not_fitted<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            status: Status::NotFitted,
        }
    }

    pub fn function_failed<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            status: Status::FunctionFailed,
        }
    }

    pub fn io<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            status: Status::Io,
        }
    }

    /// Serialization failures of our own types; reported as io since they only
    /// happen while writing reports or dumps.
    pub fn internal<T: fmt::Display>(msg: T) -> DedupError {
        DedupError::io(msg)
    }
}
