//! Rate limiter configuration and types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backend::{RateLimitError, RateLimitResult};

/// Request budget for one upstream source: at most `max_requests` within any
/// trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    #[serde(with = "duration_secs")]
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> RateLimitResult<Self> {
        let config = Self {
            max_requests,
            window,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject a zero limit or zero window. These are programming errors and
    /// are caught when a source is registered rather than at acquire time.
    pub fn validate(&self) -> RateLimitResult<()> {
        if self.max_requests == 0 {
            return Err(RateLimitError::InvalidConfig(
                "max_requests must be at least 1".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "window must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn per_second(max_requests: u32) -> RateLimitResult<Self> {
        Self::new(max_requests, Duration::from_secs(1))
    }

    pub fn per_minute(max_requests: u32) -> RateLimitResult<Self> {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn per_hour(max_requests: u32) -> RateLimitResult<Self> {
        Self::new(max_requests, Duration::from_secs(3600))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Statistics for a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub max_requests: u32,
    #[serde(with = "duration_secs")]
    pub window: Duration,
    pub in_window: usize,
    pub total_requests: u64,
    pub throttled: u64,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("window must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_limit() {
        assert!(RateLimitConfig::new(0, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_rejects_zero_window() {
        assert!(RateLimitConfig::new(10, Duration::ZERO).is_err());
    }

    #[test]
    fn test_per_hour() {
        let config = RateLimitConfig::per_hour(5000).unwrap();
        assert_eq!(config.max_requests, 5000);
        assert_eq!(config.window, Duration::from_secs(3600));
    }

    #[test]
    fn test_deserializes_window_in_seconds() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{"max_requests": 15, "window": 60}"#).unwrap();
        assert_eq!(config, RateLimitConfig::per_minute(15).unwrap());
    }
}
