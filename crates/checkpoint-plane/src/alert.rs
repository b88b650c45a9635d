//! Operational alerts
//!
//! Verification failures, signing failures, compromises and safe-mode
//! transitions are raised as `Alert`s. The default sink logs them as
//! structured `tracing` events; tests use `RecordingAlertSink`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

/// What the alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A checkpoint was rejected by a verifier
    VerificationFailed,
    /// A checkpoint build failed to sign
    SigningFailed,
    /// A key was reported compromised
    KeyCompromised,
    /// The last active key was revoked
    SafeModeEntered,
    /// A replacement key was activated
    SafeModeExited,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::VerificationFailed => write!(f, "verification_failed"),
            AlertKind::SigningFailed => write!(f, "signing_failed"),
            AlertKind::KeyCompromised => write!(f, "key_compromised"),
            AlertKind::SafeModeEntered => write!(f, "safe_mode_entered"),
            AlertKind::SafeModeExited => write!(f, "safe_mode_exited"),
        }
    }
}

/// A structured alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Create an alert
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            key_id: None,
            version: None,
            raised_at: Utc::now(),
        }
    }

    /// Attach the key involved
    pub fn with_key(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Attach the checkpoint version involved
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

/// Destination for alerts
pub trait AlertSink: Send + Sync + std::fmt::Debug {
    /// Deliver an alert; must not block
    fn raise(&self, alert: Alert);
}

/// Logs alerts as `tracing` events
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: Alert) {
        match alert.kind {
            AlertKind::SafeModeExited => warn!(
                alert = %alert.kind,
                alert_id = %alert.id,
                key_id = ?alert.key_id,
                "{}",
                alert.message
            ),
            _ => error!(
                alert = %alert.kind,
                alert_id = %alert.id,
                key_id = ?alert.key_id,
                version = ?alert.version,
                "{}",
                alert.message
            ),
        }
    }
}

/// Keeps every alert in memory and also logs it
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts raised so far
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    /// Number of alerts of one kind
    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts().iter().filter(|a| a.kind == kind).count()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: Alert) {
        TracingAlertSink.raise(alert.clone());
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingAlertSink::new();
        sink.raise(Alert::new(AlertKind::KeyCompromised, "k1 leaked").with_key("k1"));
        sink.raise(Alert::new(AlertKind::SafeModeEntered, "no signer").with_version(4));

        assert_eq!(sink.alerts().len(), 2);
        assert_eq!(sink.count(AlertKind::KeyCompromised), 1);
        assert_eq!(sink.alerts()[0].key_id.as_deref(), Some("k1"));
        assert_eq!(sink.alerts()[1].version, Some(4));
    }

    #[test]
    fn test_alert_serialization() {
        let alert = Alert::new(AlertKind::VerificationFailed, "bad hash");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "verification_failed");
        assert!(json.get("key_id").is_none());
    }
}
