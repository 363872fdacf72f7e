use std::time::Duration;
use tracing::warn;

pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(5);
/// Lower bound for the sweep interval.
pub const MIN_REAPER_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct ReaperConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}

impl ReaperConfig {
    pub fn new(enabled: bool, interval_secs: u64) -> Self {
        let requested = Duration::from_secs(interval_secs);
        let interval = if requested < MIN_REAPER_INTERVAL {
            warn!(
                "Expire job interval {}s is below the minimum {}s, clamping",
                interval_secs,
                MIN_REAPER_INTERVAL.as_secs()
            );
            MIN_REAPER_INTERVAL
        } else {
            requested
        };
        Self { enabled, interval }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_clamped_to_minimum() {
        let cfg = ReaperConfig::new(true, 0);
        assert_eq!(cfg.interval, MIN_REAPER_INTERVAL);
    }

    #[test]
    fn interval_above_minimum_is_kept() {
        let cfg = ReaperConfig::new(false, 30);
        assert_eq!(cfg.interval, Duration::from_secs(30));
        assert!(!cfg.enabled);
    }

    #[test]
    fn default_is_five_seconds() {
        assert_eq!(ReaperConfig::default().interval, Duration::from_secs(5));
    }
}
