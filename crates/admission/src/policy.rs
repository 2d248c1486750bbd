//! Cooldown policy

use std::collections::HashSet;
use std::time::Duration;

/// Result of an admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Cooldown still running; `remaining` until the subject may submit again.
    Denied { remaining: Duration },
    /// Another request for the same subject holds the in-flight slot.
    /// Only produced when reservations are enabled.
    InFlight,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Admission::Allowed => "allowed",
            Admission::Denied { .. } => "denied",
            Admission::InFlight => "in_flight",
        }
    }
}

/// Fixed cooldown window plus a set of exempt subjects. Immutable once built.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    cooldown: Duration,
    exempt: HashSet<String>,
}

impl CooldownPolicy {
    pub fn new(cooldown: Duration, exempt: impl IntoIterator<Item = String>) -> Self {
        Self {
            cooldown,
            exempt: exempt.into_iter().collect(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn is_exempt(&self, subject: &str) -> bool {
        self.exempt.contains(subject)
    }

    /// Decide admission from the last usage timestamp (unix ms).
    ///
    /// A subject with no recorded usage is always allowed. A last usage in
    /// the future (clock stepped backwards) counts as zero elapsed time.
    pub fn evaluate(&self, subject: &str, now_ms: u64, last_usage_ms: Option<u64>) -> Admission {
        if self.is_exempt(subject) {
            return Admission::Allowed;
        }
        let Some(last) = last_usage_ms else {
            return Admission::Allowed;
        };
        let elapsed = Duration::from_millis(now_ms.saturating_sub(last));
        if elapsed >= self.cooldown {
            Admission::Allowed
        } else {
            Admission::Denied {
                remaining: self.cooldown - elapsed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 3_600_000;
    const NOW: u64 = 1_760_000_000_000;

    fn six_hours(exempt: &[&str]) -> CooldownPolicy {
        CooldownPolicy::new(
            Duration::from_secs(6 * 3600),
            exempt.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn five_hours_ago_denies_with_one_hour_left() {
        let policy = six_hours(&[]);
        assert_eq!(
            policy.evaluate("42", NOW, Some(NOW - 5 * HOUR)),
            Admission::Denied {
                remaining: Duration::from_secs(3600)
            }
        );
    }

    #[test]
    fn seven_hours_ago_allows() {
        let policy = six_hours(&[]);
        assert_eq!(policy.evaluate("42", NOW, Some(NOW - 7 * HOUR)), Admission::Allowed);
    }

    #[test]
    fn exactly_cooldown_allows() {
        let policy = six_hours(&[]);
        assert_eq!(policy.evaluate("42", NOW, Some(NOW - 6 * HOUR)), Admission::Allowed);
    }

    #[test]
    fn no_record_allows() {
        assert_eq!(six_hours(&[]).evaluate("42", NOW, None), Admission::Allowed);
    }

    #[test]
    fn exempt_subject_always_allowed() {
        let policy = six_hours(&["5928372261"]);
        assert_eq!(
            policy.evaluate("5928372261", NOW, Some(NOW - 1000)),
            Admission::Allowed
        );
        assert!(!policy.evaluate("other", NOW, Some(NOW - 1000)).is_allowed());
    }

    #[test]
    fn future_last_usage_denies_full_window() {
        let policy = six_hours(&[]);
        assert_eq!(
            policy.evaluate("42", NOW, Some(NOW + HOUR)),
            Admission::Denied {
                remaining: Duration::from_secs(6 * 3600)
            }
        );
    }

    #[test]
    fn evaluation_is_pure() {
        let policy = six_hours(&[]);
        let a = policy.evaluate("42", NOW, Some(NOW - 2 * HOUR));
        let b = policy.evaluate("42", NOW, Some(NOW - 2 * HOUR));
        assert_eq!(a, b);
        assert_eq!(a.label(), "denied");
    }
}
