//! # Supervisor runtime settings.
//!
//! [`SupervisorConfig`] is built from the `main` section of the active
//! configuration; values absent from the file keep their defaults.

use std::time::Duration;

use crate::config::MainSection;

/// Settings of the supervisor runtime.
///
/// ## Field semantics
/// - `period`: health-check period (a zero period falls back to the default)
/// - `grace`: how long workers get to stop cooperatively before being aborted
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by `Bus`)
#[derive(Clone, Debug, PartialEq)]
pub struct SupervisorConfig {
    /// Health-check period.
    pub period: Duration,
    /// Shutdown grace period.
    pub grace: Duration,
    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
}

impl SupervisorConfig {
    /// Default health-check period.
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);
    /// Default shutdown grace, also used by the deployment cycle when terminating.
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(20);

    /// Builds the settings from the `main` section.
    pub fn from_main(main: &MainSection) -> Self {
        let mut cfg = Self::default();
        if !main.period().is_zero() {
            cfg.period = main.period();
        }
        if let Some(grace) = main.grace() {
            cfg.grace = grace;
        }
        cfg
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            period: Self::DEFAULT_PERIOD,
            grace: Self::DEFAULT_GRACE,
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_section(period: f64, grace: Option<f64>) -> MainSection {
        MainSection {
            period,
            grace,
            local_log_file: None,
            ntfy: None,
        }
    }

    #[test]
    fn test_from_main_overrides_defaults() {
        let cfg = SupervisorConfig::from_main(&main_section(2.0, Some(7.5)));
        assert_eq!(cfg.period, Duration::from_secs(2));
        assert_eq!(cfg.grace, Duration::from_millis(7500));
        assert_eq!(cfg.bus_capacity, 1024);
    }

    #[test]
    fn test_zero_period_keeps_default() {
        let cfg = SupervisorConfig::from_main(&main_section(0.0, None));
        assert_eq!(cfg.period, SupervisorConfig::DEFAULT_PERIOD);
        assert_eq!(cfg.grace, SupervisorConfig::DEFAULT_GRACE);
    }
}
