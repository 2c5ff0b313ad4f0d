//! Forcing window configuration attached to each formulation.
//!
//! Reading the forcing data itself is an external concern; the core only
//! validates and carries the window description.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ParameterMap;
use crate::errors::{HydronetError, HydronetResult};

/// Keys every forcing block must provide, in reporting order.
pub const REQUIRED_FORCING_PARAMETERS: [&str; 3] = ["path", "start_time", "end_time"];

/// The forcing data window for one catchment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcingConfig {
    pub path: String,
    pub start_time: String,
    pub end_time: String,
}

impl ForcingConfig {
    pub fn new(
        path: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }

    /// Build a forcing configuration from a realized configuration block,
    /// collecting every missing key before failing.
    pub fn from_realized(id: &str, block: &ParameterMap) -> HydronetResult<Self> {
        let mut missing = Vec::new();
        let mut resolve = |key: &str| -> String {
            match block.get(key) {
                Some(Value::String(value)) => value.clone(),
                Some(other) => other.to_string(),
                None => {
                    missing.push(key.to_string());
                    String::new()
                }
            }
        };

        let path = resolve("path");
        let start_time = resolve("start_time");
        let end_time = resolve("end_time");

        if !missing.is_empty() {
            return Err(HydronetError::MissingParameters {
                id: id.to_string(),
                missing,
            });
        }

        Ok(Self {
            path,
            start_time,
            end_time,
        })
    }
}
