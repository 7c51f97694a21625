use std::time::{Duration, Instant};

use super::zone::{aggregate_alert_state, AlertState, ZoneState};

/// Banner drawn once an alert state has persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Banner {
    Warning,
    Clear,
}

impl Banner {
    pub fn text(&self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Clear => "  CLEAR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlertDecision {
    pub state: AlertState,
    pub banner: Option<Banner>,
    /// Set only on the frame a WARNING banner first appears.
    pub newly_raised: bool,
}

/// Per-connection debounce over frame alert states.
///
/// A state must hold for `duration` before its banner is shown.
#[derive(Debug)]
pub struct AlertMonitor {
    trigger_class_id: usize,
    duration: Duration,
    state: AlertState,
    changed_at: Option<Instant>,
    banner_displayed: bool,
}

impl AlertMonitor {
    pub fn new(trigger_class_id: usize, duration: Duration) -> Self {
        Self {
            trigger_class_id,
            duration,
            state: AlertState::Normal,
            changed_at: None,
            banner_displayed: false,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn update(&mut self, zones: &[ZoneState], now: Instant) -> AlertDecision {
        let state = aggregate_alert_state(zones, self.trigger_class_id);
        let mut changed_at = *self.changed_at.get_or_insert(now);
        if state != self.state {
            changed_at = now;
            self.changed_at = Some(now);
            self.state = state;
        }

        let settled = now.saturating_duration_since(changed_at) >= self.duration;
        let banner = match state {
            AlertState::Warning if settled => Some(Banner::Warning),
            AlertState::Clear if settled => Some(Banner::Clear),
            _ => None,
        };

        let displayed = banner == Some(Banner::Warning);
        let newly_raised = displayed && !self.banner_displayed;
        self.banner_displayed = displayed;

        AlertDecision {
            state,
            banner,
            newly_raised,
        }
    }
}

/// Rate limit for classification results: at most one submit per `duration`.
#[derive(Debug)]
pub struct SubmitThrottle {
    duration: Duration,
    last: Option<Instant>,
}

impl SubmitThrottle {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            last: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        let last = *self.last.get_or_insert(now);
        let submit = now.saturating_duration_since(last) > self.duration;
        if submit {
            self.last = Some(now);
        }
        submit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIGGER: usize = 0;

    fn restricted_trigger() -> Vec<ZoneState> {
        vec![ZoneState {
            safe: false,
            class_id: TRIGGER,
        }]
    }

    fn restricted_other() -> Vec<ZoneState> {
        vec![ZoneState {
            safe: false,
            class_id: 7,
        }]
    }

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn warning_rises_once_after_duration() {
        let base = Instant::now();
        let mut monitor = AlertMonitor::new(TRIGGER, Duration::from_secs(1));

        let d = monitor.update(&restricted_trigger(), base);
        assert_eq!(d.state, AlertState::Warning);
        assert_eq!(d.banner, None);
        assert!(!d.newly_raised);

        let d = monitor.update(&restricted_trigger(), ms(base, 500));
        assert_eq!(d.banner, None);
        assert!(!d.newly_raised);

        let d = monitor.update(&restricted_trigger(), ms(base, 1100));
        assert_eq!(d.banner, Some(Banner::Warning));
        assert!(d.newly_raised);

        let d = monitor.update(&restricted_trigger(), ms(base, 1500));
        assert_eq!(d.banner, Some(Banner::Warning));
        assert!(!d.newly_raised);
    }

    #[test]
    fn flicker_resets_the_timer() {
        let base = Instant::now();
        let mut monitor = AlertMonitor::new(TRIGGER, Duration::from_secs(1));

        monitor.update(&restricted_trigger(), base);
        monitor.update(&[], ms(base, 900));
        let d = monitor.update(&restricted_trigger(), ms(base, 1100));
        assert_eq!(d.banner, None);

        let d = monitor.update(&restricted_trigger(), ms(base, 2100));
        assert!(d.newly_raised);
    }

    #[test]
    fn new_episode_raises_again() {
        let base = Instant::now();
        let mut monitor = AlertMonitor::new(TRIGGER, Duration::from_secs(1));

        monitor.update(&restricted_trigger(), base);
        assert!(monitor.update(&restricted_trigger(), ms(base, 1000)).newly_raised);
        monitor.update(&[], ms(base, 1200));
        monitor.update(&restricted_trigger(), ms(base, 1300));
        assert!(monitor.update(&restricted_trigger(), ms(base, 2300)).newly_raised);
    }

    #[test]
    fn clear_shows_banner_without_raising() {
        let base = Instant::now();
        let mut monitor = AlertMonitor::new(TRIGGER, Duration::from_secs(1));

        monitor.update(&restricted_other(), base);
        let d = monitor.update(&restricted_other(), ms(base, 1000));
        assert_eq!(d.state, AlertState::Clear);
        assert_eq!(d.banner, Some(Banner::Clear));
        assert!(!d.newly_raised);
        assert_eq!(monitor.state(), AlertState::Clear);
    }

    #[test]
    fn normal_after_first_call_has_no_banner() {
        let base = Instant::now();
        let mut monitor = AlertMonitor::new(TRIGGER, Duration::ZERO);
        let d = monitor.update(&[], base);
        assert_eq!(d.state, AlertState::Normal);
        assert_eq!(d.banner, None);
    }

    #[test]
    fn throttle_submits_once_per_duration() {
        let base = Instant::now();
        let mut throttle = SubmitThrottle::new(Duration::from_secs(1));
        assert!(!throttle.ready(base));
        assert!(!throttle.ready(ms(base, 1000)));
        assert!(throttle.ready(ms(base, 1001)));
        assert!(!throttle.ready(ms(base, 1500)));
        assert!(throttle.ready(ms(base, 2100)));
    }
}
