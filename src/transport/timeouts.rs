use std::convert::TryFrom;
use tokio::time::Duration;

/// Operation deadlines configured per transport. The read timeout bounds `get`
/// invokes; the mutative timeout bounds every invoke that installs an
/// invalidation barrier, and the barrier wait that follows it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub read_operation: Duration,
    pub mutative_operation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            read_operation: Duration::from_secs(5),
            mutative_operation: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Default)]
pub struct TimeoutOptions {
    pub read_operation_timeout: Option<Duration>,
    pub mutative_operation_timeout: Option<Duration>,
}

impl TryFrom<TimeoutOptions> for Timeouts {
    type Error = &'static str;

    fn try_from(options: TimeoutOptions) -> Result<Self, Self::Error> {
        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            read_operation: options.read_operation_timeout.unwrap_or(defaults.read_operation),
            mutative_operation: options
                .mutative_operation_timeout
                .unwrap_or(defaults.mutative_operation),
        };

        if timeouts.read_operation.is_zero() {
            return Err("Read operation timeout must be non-zero");
        }
        if timeouts.mutative_operation.is_zero() {
            return Err("Mutative operation timeout must be non-zero");
        }

        Ok(timeouts)
    }
}
