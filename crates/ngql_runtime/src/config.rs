//! Request quotas and server options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-request limits. Exceeding any of them ends the request with a
/// `QUOTA` (or `TOO_MANY_ERRORS`) error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestQuota {
    /// Maximum wall-clock duration of one request or publish.
    #[serde(rename = "max_request_time_ms", with = "millis")]
    pub max_request_time: Duration,
    /// Maximum number of errors before the request is aborted.
    pub max_errors: usize,
    /// Maximum number of output objects (scopes) one response may hold.
    pub max_output_objects: usize,
}

impl Default for RequestQuota {
    fn default() -> Self {
        Self {
            max_request_time: Duration::from_secs(30),
            max_errors: 20,
            max_output_objects: 100_000,
        }
    }
}

impl RequestQuota {
    /// Creates a quota with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_request_time(mut self, duration: Duration) -> Self {
        self.max_request_time = duration;
        self
    }

    pub fn with_max_errors(mut self, max: usize) -> Self {
        self.max_errors = max;
        self
    }

    pub fn with_max_output_objects(mut self, max: usize) -> Self {
        self.max_output_objects = max;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

bitflags::bitflags! {
    /// Behavior switches for request processing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ServerOptions: u32 {
        /// Unknown fields in input objects are dropped instead of rejected.
        const IGNORE_UNKNOWN_INPUT_FIELDS = 1;
        /// A null produced for a non-null output field is passed through
        /// instead of reported as an error.
        const IGNORE_OUT_NULL_FAULTS = 1 << 1;
        /// The first argument error stops mapping of the whole operation.
        const FAIL_FAST_ARGUMENTS = 1 << 2;

        const DEFAULT_DEV = 0;
        const DEFAULT_PROD = Self::IGNORE_UNKNOWN_INPUT_FIELDS.bits() | Self::IGNORE_OUT_NULL_FAULTS.bits();
    }
}
