//! Failure injection for the mock remote
//!
//! Supports configurable failures at connect, command, and upload points.

use std::time::Duration;

/// Where a failure is injected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePoint {
    /// Authentication with the given credential kind (`"key"` or `"password"`)
    Auth(String),
    /// Any connection attempt, before authentication
    Connect,
    /// Any command segment containing this fragment
    Command(String),
    /// Upload to this exact remote path
    Upload(String),
}

impl FailurePoint {
    fn matches(&self, other: &FailurePoint) -> bool {
        match (self, other) {
            (FailurePoint::Auth(a), FailurePoint::Auth(b)) => a == b,
            (FailurePoint::Connect, FailurePoint::Connect) => true,
            (FailurePoint::Command(fragment), FailurePoint::Command(segment)) => segment.contains(fragment.as_str()),
            (FailurePoint::Upload(a), FailurePoint::Upload(b)) => a == b,
            _ => false,
        }
    }
}

/// Failure configuration for an injection point
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Error message to report (None = only delay)
    pub message: Option<String>,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Create a config that reports an error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            delay: None,
            fail_count: None,
        }
    }

    /// Create a config that just adds delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            message: None,
            delay: Some(duration),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector for the mock remote
#[derive(Debug, Default)]
pub struct FailureInjector {
    entries: Vec<(FailurePoint, FailureConfig, u32)>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure; replaces any earlier config for the same point
    pub fn inject(&mut self, point: FailurePoint, config: FailureConfig) {
        self.entries.retain(|(p, _, _)| p != &point);
        self.entries.push((point, config, 0));
    }

    /// Clear all failure injections
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Check whether `event` triggers an injected failure
    ///
    /// Each match counts against the entry's `fail_count`; once exhausted the
    /// entry stops firing.
    pub fn check(&mut self, event: &FailurePoint) -> Option<FailureConfig> {
        for (point, config, count) in self.entries.iter_mut() {
            if !point.matches(event) {
                continue;
            }
            *count += 1;
            if let Some(limit) = config.fail_count {
                if *count > limit {
                    continue;
                }
            }
            return Some(config.clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_fragment_matching() {
        let mut injector = FailureInjector::new();
        injector.inject(FailurePoint::Command("systemctl".into()), FailureConfig::error("unit failed"));

        let hit = injector.check(&FailurePoint::Command("sudo systemctl restart app".into()));
        assert_eq!(hit.unwrap().message.as_deref(), Some("unit failed"));
        assert!(injector.check(&FailurePoint::Command("pwd".into())).is_none());
    }

    #[test]
    fn test_fail_count_exhausts() {
        let mut injector = FailureInjector::new();
        injector.inject(FailurePoint::Connect, FailureConfig::error("refused").with_fail_count(2));

        assert!(injector.check(&FailurePoint::Connect).is_some());
        assert!(injector.check(&FailurePoint::Connect).is_some());
        assert!(injector.check(&FailurePoint::Connect).is_none());
    }

    #[test]
    fn test_auth_kind_is_exact() {
        let mut injector = FailureInjector::new();
        injector.inject(FailurePoint::Auth("key".into()), FailureConfig::error("Permission denied"));

        assert!(injector.check(&FailurePoint::Auth("password".into())).is_none());
        assert!(injector.check(&FailurePoint::Auth("key".into())).is_some());
    }

    #[test]
    fn test_inject_replaces_and_clear() {
        let mut injector = FailureInjector::new();
        injector.inject(FailurePoint::Upload("/a".into()), FailureConfig::error("first"));
        injector.inject(FailurePoint::Upload("/a".into()), FailureConfig::error("second"));

        let hit = injector.check(&FailurePoint::Upload("/a".into())).unwrap();
        assert_eq!(hit.message.as_deref(), Some("second"));

        injector.clear();
        assert!(injector.check(&FailurePoint::Upload("/a".into())).is_none());
    }
}
