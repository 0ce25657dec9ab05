//! Job configuration.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{Mode, OverwritePolicy};
use crate::stream::UNLIMITED;

/// Default size of the buffer used to stream bytes between backends.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Settings that control how a transfer job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Copy or Move
    pub mode: Mode,
    /// How to handle files that already exist at the destination
    pub overwrite_policy: OverwritePolicy,
    /// Initial throughput limit in bytes/second (-1 = unlimited)
    pub throughput_limit: i64,
    /// Use a backend's native copy when it merely supports one.
    ///
    /// A native copy runs as one call: pause, stop and per-file progress only
    /// take effect once the file is done. `LocalFile` supports native copies
    /// to other local files, so with this set every unthrottled local copy
    /// goes through `fs::copy`.
    pub prefer_direct_copy: bool,
    /// Streaming buffer size in bytes
    pub buffer_size: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            mode: Mode::Copy,
            overwrite_policy: OverwritePolicy::Overwrite,
            throughput_limit: UNLIMITED,
            prefer_direct_copy: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl JobConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.buffer_size == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "buffer_size must be greater than zero".to_string(),
            });
        }
        if self.throughput_limit < UNLIMITED {
            return Err(EngineError::InvalidConfig {
                reason: format!(
                    "throughput_limit must be -1 (unlimited) or >= 0, got {}",
                    self.throughput_limit
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        JobConfig::default().validate().expect("default config should be valid");
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let config = JobConfig {
            buffer_size: 0,
            ..JobConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bogus_limit() {
        let config = JobConfig {
            throughput_limit: -7,
            ..JobConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
