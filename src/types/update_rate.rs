//! Update rate control for telemetry feeds

use serde::{Deserialize, Serialize};

/// Update rate for telemetry feed subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every frame the peripheral sends
    Native,

    /// Throttled to maximum Hz (latest frame wins)
    Max(u32),
}

impl UpdateRate {
    /// Get throttle interval if needed
    ///
    /// `Max(0)` is treated as `Native`.
    pub fn throttle_interval(self) -> Option<std::time::Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => Some(std::time::Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn throttle_interval_matches_rate() {
        assert_eq!(UpdateRate::Native.throttle_interval(), None);
        assert_eq!(UpdateRate::Max(0).throttle_interval(), None);
        assert_eq!(UpdateRate::Max(4).throttle_interval(), Some(Duration::from_millis(250)));
    }
}
