//! Device status state machine.

use eletech_common::{DeviceStatus, OfflineReason};

use crate::transport::PollFailure;

/// A status change to report to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: DeviceStatus,
    pub description: Option<String>,
}

/// Tracks the status of one thing and decides which events change it.
///
/// Every method returns the transition to report, or `None` when the event
/// leaves the status as it is.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    status: DeviceStatus,
    description: Option<String>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Return to the initial status without reporting it.
    pub fn reset(&mut self) {
        self.status = DeviceStatus::INITIAL;
        self.description = None;
    }

    /// A poll returned registers.
    pub fn poll_succeeded(&mut self) -> Option<Transition> {
        match self.status {
            DeviceStatus::Online => None,
            DeviceStatus::Offline(OfflineReason::ConfigurationError) => None,
            DeviceStatus::Offline(_) => self.enter(DeviceStatus::Online, None),
        }
    }

    /// A poll failed after all its attempts.
    pub fn poll_failed(&mut self, failure: &PollFailure) -> Option<Transition> {
        match self.status {
            DeviceStatus::Offline(
                OfflineReason::ConfigurationError | OfflineReason::CommunicationError,
            ) => None,
            _ => self.enter(
                DeviceStatus::Offline(OfflineReason::CommunicationError),
                Some(format!("Error with read: {failure}")),
            ),
        }
    }

    /// The bridge or its communication interface is unavailable.
    pub fn bridge_unavailable(&mut self, description: String) -> Option<Transition> {
        self.enter(
            DeviceStatus::Offline(OfflineReason::BridgeOffline),
            Some(description),
        )
    }

    /// The thing cannot run with its configuration.
    pub fn configuration_error(&mut self, description: String) -> Option<Transition> {
        self.enter(
            DeviceStatus::Offline(OfflineReason::ConfigurationError),
            Some(description),
        )
    }

    fn enter(&mut self, status: DeviceStatus, description: Option<String>) -> Option<Transition> {
        if self.status == status && self.description == description {
            return None;
        }
        self.status = status;
        self.description = description.clone();
        Some(Transition {
            status,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timeout() -> PollFailure {
        PollFailure::Timeout(Duration::from_millis(1000))
    }

    #[test]
    fn test_initial_status() {
        let tracker = StatusTracker::new();
        assert_eq!(tracker.status(), DeviceStatus::INITIAL);
        assert_eq!(tracker.description(), None);
    }

    #[test]
    fn test_success_goes_online_once() {
        let mut tracker = StatusTracker::new();

        let transition = tracker.poll_succeeded().unwrap();
        assert_eq!(transition.status, DeviceStatus::Online);
        assert_eq!(transition.description, None);

        assert_eq!(tracker.poll_succeeded(), None);
        assert_eq!(tracker.status(), DeviceStatus::Online);
    }

    #[test]
    fn test_failure_goes_offline_once() {
        let mut tracker = StatusTracker::new();
        tracker.poll_succeeded();

        let transition = tracker.poll_failed(&timeout()).unwrap();
        assert_eq!(
            transition.status,
            DeviceStatus::Offline(OfflineReason::CommunicationError)
        );
        assert_eq!(
            transition.description.as_deref(),
            Some("Error with read: request timed out after 1s")
        );

        assert_eq!(
            tracker.poll_failed(&PollFailure::Io("broken pipe".into())),
            None
        );
        assert!(tracker.poll_succeeded().is_some());
    }

    #[test]
    fn test_failure_from_bridge_offline() {
        let mut tracker = StatusTracker::new();
        assert!(tracker.poll_failed(&timeout()).is_some());
    }

    #[test]
    fn test_configuration_error_is_sticky() {
        let mut tracker = StatusTracker::new();
        assert!(tracker.configuration_error("too many tasks".into()).is_some());

        assert_eq!(tracker.poll_succeeded(), None);
        assert_eq!(tracker.poll_failed(&timeout()), None);
        assert!(tracker.status().has_configuration_error());

        tracker.reset();
        assert_eq!(tracker.status(), DeviceStatus::INITIAL);
        assert!(tracker.poll_succeeded().is_some());
    }

    #[test]
    fn test_bridge_unavailable_reports_description_changes() {
        let mut tracker = StatusTracker::new();

        let first = tracker
            .bridge_unavailable("Bridge 'rtu' is offline".into())
            .unwrap();
        assert_eq!(first.status, DeviceStatus::INITIAL);

        assert_eq!(
            tracker.bridge_unavailable("Bridge 'rtu' is offline".into()),
            None
        );
        assert!(
            tracker
                .bridge_unavailable("Bridge 'rtu' not completely initialized".into())
                .is_some()
        );
    }
}
