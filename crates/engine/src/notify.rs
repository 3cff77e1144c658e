use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};

use crackmill_core::JobRecord;
use crackmill_core::config::NotifyConfig;

/// Timestamp format used for `last_seen` on job records.
pub const LAST_SEEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Job events that may trigger an external notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    /// A hash was cracked while the user was away.
    HashCracked,
    /// The job finished while the user was away.
    JobComplete,
}

impl NotifyEvent {
    /// Notification subject line.
    pub fn subject(self) -> &'static str {
        match self {
            NotifyEvent::HashCracked => "crackmill: hash cracked notification",
            NotifyEvent::JobComplete => "crackmill: job complete notification",
        }
    }

    /// Per-event cap on notifications sent for one job.
    pub fn cap(self) -> u32 {
        match self {
            NotifyEvent::HashCracked => 1,
            NotifyEvent::JobComplete => 2,
        }
    }
}

/// Notification transport. Delivery mechanics are an external concern;
/// only this interface is consumed.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification to `dest`.
    async fn notify(&self, dest: &str, subject: &str) -> anyhow::Result<()>;
}

/// Fire-and-forget webhook notifier.
pub struct WebhookNotifier {
    http: reqwest::Client,
    endpoint: String,
    source: String,
}

impl WebhookNotifier {
    /// Notifier POSTing to `endpoint`, labelled `source`.
    pub fn new(endpoint: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, dest: &str, subject: &str) -> anyhow::Result<()> {
        let res = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "to": dest,
                "from": self.source,
                "subject": subject,
            }))
            .send()
            .await?;
        if !res.status().is_success() {
            anyhow::bail!("webhook returned http {}", res.status());
        }
        Ok(())
    }
}

/// Decides, from job metadata and elapsed inactivity, whether a
/// notification should fire. Delivery failures are logged and swallowed;
/// they never affect job progress.
pub struct NotificationGate {
    settings: Option<NotifyConfig>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationGate {
    /// Gate with the given (optional) settings and transport.
    pub fn new(settings: Option<NotifyConfig>, notifier: Arc<dyn Notifier>) -> Self {
        Self { settings, notifier }
    }

    /// Apply the gate for `event`, mutating `record` (warning text,
    /// email counter). The caller persists the record afterwards.
    ///
    /// Returns whether a notification was dispatched.
    pub fn apply(&self, record: &mut JobRecord, event: NotifyEvent) -> bool {
        if !record.notify {
            return false;
        }
        let Some(settings) = &self.settings else {
            record.warning = Some("Notification settings error".to_string());
            return false;
        };
        let Some(email) = record.email.clone() else {
            record.warning = Some("No email address in profile".to_string());
            return false;
        };

        let Some(last_seen) = record.last_seen.as_deref() else {
            return false;
        };
        let Ok(last) = NaiveDateTime::parse_from_str(last_seen, LAST_SEEN_FORMAT) else {
            tracing::warn!(session = %record.session_id, last_seen, "unparseable last_seen");
            return false;
        };

        let inactivity = Utc::now().naive_utc() - last;
        if inactivity <= chrono::Duration::minutes(settings.inactive_minutes) {
            return false;
        }
        if record.email_count >= event.cap() {
            return false;
        }

        record.email_count += 1;
        let notifier = self.notifier.clone();
        let subject = event.subject();
        let session = record.session_id.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.notify(&email, subject).await {
                tracing::error!(session = %session, %err, "notification delivery failed");
            }
        });
        true
    }
}
