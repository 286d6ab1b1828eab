use crate::config::{CounterReset, WatchConfig};
use crate::unit::MemoryUnit;
use tracing::debug;

/// Why a tick asked for the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Sample was above the critical limit.
    Critical,
    /// The consecutive-tick counter reached `cycle`.
    CycleExhausted,
}

/// Decision returned by the threshold policy for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep polling; carries the counter after this tick.
    Continue { count: u32 },
    Trigger(TriggerReason),
}

/// Threshold and hysteresis evaluation for the watcher's poll loop.
///
/// Holds the consecutive-tick counter. A critical sample asks for the trigger
/// straight away; otherwise the counter is reset or advanced according to
/// [`CounterReset`] and a trigger is requested once it reaches `cycle`.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    cfg: WatchConfig,
    count: u32,
}

impl ThresholdPolicy {
    pub fn new(cfg: WatchConfig) -> Self {
        Self { cfg, count: 0 }
    }

    /// Evaluate one memory sample.
    ///
    /// The counter is still updated on a critical sample, and when both the
    /// critical and cycle conditions hold the reason reported is `Critical`.
    pub fn evaluate(&mut self, total: MemoryUnit) -> Verdict {
        let critical = self.cfg.reaches_critical(total);
        let warning = self.cfg.reaches_warning(total);

        if !critical {
            let reset = match self.cfg.counter_reset {
                CounterReset::OnWarningBreach => warning,
                CounterReset::BelowWarning => !warning,
            };
            if reset {
                self.count = 0;
            }
        }

        self.count = self.count.saturating_add(1);
        debug!(
            total = %total,
            count = self.count,
            cycle = self.cfg.cycle,
            critical,
            warning,
            "memory tick evaluated"
        );

        if critical {
            Verdict::Trigger(TriggerReason::Critical)
        } else if self.count >= self.cfg.cycle {
            Verdict::Trigger(TriggerReason::CycleExhausted)
        } else {
            Verdict::Continue { count: self.count }
        }
    }

    /// Reset the consecutive-tick counter (on stop, restart or trigger).
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_WATCH_CONFIG;
    use crate::unit::{KILOBYTE, MEGABYTE};

    fn policy(cycle: u32, counter_reset: CounterReset) -> ThresholdPolicy {
        ThresholdPolicy::new(WatchConfig {
            warning_limit: 100 * MEGABYTE,
            critical_limit: 200 * MEGABYTE,
            cycle,
            counter_reset,
            ..DEFAULT_WATCH_CONFIG
        })
    }

    #[test]
    fn test_critical_triggers_immediately() {
        let mut p = policy(10, CounterReset::OnWarningBreach);
        assert_eq!(
            p.evaluate(201 * MEGABYTE),
            Verdict::Trigger(TriggerReason::Critical)
        );
    }

    #[test]
    fn test_equal_to_critical_is_not_critical() {
        let mut p = policy(10, CounterReset::OnWarningBreach);
        // Above warning, so the counter resets and then advances to 1.
        assert_eq!(p.evaluate(200 * MEGABYTE), Verdict::Continue { count: 1 });
    }

    #[test]
    fn test_tenth_quiet_tick_triggers() {
        let mut p = policy(10, CounterReset::OnWarningBreach);
        for expected in 1..10 {
            assert_eq!(
                p.evaluate(10 * MEGABYTE),
                Verdict::Continue { count: expected }
            );
        }
        assert_eq!(
            p.evaluate(10 * MEGABYTE),
            Verdict::Trigger(TriggerReason::CycleExhausted)
        );
    }

    #[test]
    fn test_warning_breach_resets_counter() {
        let mut p = policy(3, CounterReset::OnWarningBreach);
        p.evaluate(10 * MEGABYTE);
        p.evaluate(10 * MEGABYTE);
        assert_eq!(p.count(), 2);
        // Breach resets to 0, then the tick itself counts.
        assert_eq!(p.evaluate(150 * MEGABYTE), Verdict::Continue { count: 1 });
    }

    #[test]
    fn test_oscillating_above_warning_never_exhausts_cycle() {
        let mut p = policy(3, CounterReset::OnWarningBreach);
        for _ in 0..50 {
            assert_eq!(p.evaluate(150 * MEGABYTE), Verdict::Continue { count: 1 });
        }
    }

    #[test]
    fn test_below_warning_policy_escalates_on_sustained_warning() {
        let mut p = policy(3, CounterReset::BelowWarning);
        assert_eq!(p.evaluate(150 * MEGABYTE), Verdict::Continue { count: 1 });
        assert_eq!(p.evaluate(150 * MEGABYTE), Verdict::Continue { count: 2 });
        assert_eq!(
            p.evaluate(150 * MEGABYTE),
            Verdict::Trigger(TriggerReason::CycleExhausted)
        );
    }

    #[test]
    fn test_below_warning_policy_quiet_tick_resets() {
        let mut p = policy(3, CounterReset::BelowWarning);
        p.evaluate(150 * MEGABYTE);
        p.evaluate(150 * MEGABYTE);
        assert_eq!(p.evaluate(10 * MEGABYTE), Verdict::Continue { count: 1 });
        assert_eq!(p.evaluate(150 * MEGABYTE), Verdict::Continue { count: 2 });
    }

    #[test]
    fn test_critical_wins_when_cycle_also_exhausted() {
        let mut p = policy(1, CounterReset::OnWarningBreach);
        assert_eq!(
            p.evaluate(300 * MEGABYTE),
            Verdict::Trigger(TriggerReason::Critical)
        );
        assert_eq!(p.count(), 1);
    }

    #[test]
    fn test_reset_clears_counter() {
        let mut p = policy(10, CounterReset::OnWarningBreach);
        for _ in 0..5 {
            p.evaluate(KILOBYTE);
        }
        assert_eq!(p.count(), 5);
        p.reset();
        assert_eq!(p.count(), 0);
        assert_eq!(p.evaluate(KILOBYTE), Verdict::Continue { count: 1 });
    }

    #[test]
    fn test_equal_warning_and_critical_limits() {
        let mut p = ThresholdPolicy::new(WatchConfig {
            warning_limit: 300 * KILOBYTE,
            critical_limit: 300 * KILOBYTE,
            cycle: 10,
            ..DEFAULT_WATCH_CONFIG
        });
        assert_eq!(p.evaluate(300 * KILOBYTE), Verdict::Continue { count: 1 });
        assert_eq!(
            p.evaluate(301 * KILOBYTE),
            Verdict::Trigger(TriggerReason::Critical)
        );
    }
}
