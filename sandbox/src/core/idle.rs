//! Idle detection rules for the autorun scheduler.

use std::time::Duration;

use serde::Serialize;

/// Observable scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPhase {
    /// Autorun is switched off in configuration.
    Disabled,
    /// Enabled, but idle time is below the threshold.
    Waiting,
    /// Idle threshold reached; a cycle runs on this poll.
    Firing,
    /// A stop request was observed. Terminal.
    Stopped,
}

impl SchedulerPhase {
    pub fn as_u8(self) -> u8 {
        match self {
            SchedulerPhase::Disabled => 0,
            SchedulerPhase::Waiting => 1,
            SchedulerPhase::Firing => 2,
            SchedulerPhase::Stopped => 3,
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SchedulerPhase::Disabled,
            2 => SchedulerPhase::Firing,
            3 => SchedulerPhase::Stopped,
            _ => SchedulerPhase::Waiting,
        }
    }
}

/// Decide the phase for one poll.
///
/// Idle time equal to the threshold already fires.
pub fn phase_for(enabled: bool, idle: Duration, threshold: Duration) -> SchedulerPhase {
    if !enabled {
        SchedulerPhase::Disabled
    } else if idle < threshold {
        SchedulerPhase::Waiting
    } else {
        SchedulerPhase::Firing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_wins_over_idle_time() {
        assert_eq!(
            phase_for(false, Duration::from_secs(999), Duration::from_secs(1)),
            SchedulerPhase::Disabled
        );
    }

    #[test]
    fn fires_once_threshold_is_reached() {
        let threshold = Duration::from_secs(5);
        assert_eq!(
            phase_for(true, Duration::from_millis(4_999), threshold),
            SchedulerPhase::Waiting
        );
        assert_eq!(
            phase_for(true, threshold, threshold),
            SchedulerPhase::Firing
        );
        assert_eq!(
            phase_for(true, Duration::from_secs(6), threshold),
            SchedulerPhase::Firing
        );
    }

    #[test]
    fn phase_survives_u8_encoding() {
        for phase in [
            SchedulerPhase::Disabled,
            SchedulerPhase::Waiting,
            SchedulerPhase::Firing,
            SchedulerPhase::Stopped,
        ] {
            assert_eq!(SchedulerPhase::from_u8(phase.as_u8()), phase);
        }
    }
}
