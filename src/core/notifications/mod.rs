mod email;

pub use email::EmailNotifier;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::core::models::NotificationSettings;

/// Events that trigger notifications
#[derive(Debug, Clone)]
pub enum JobEvent {
    Completed {
        job_id: String,
        job_name: String,
        source: PathBuf,
        snapshot: String,
        size: String,
        duration: String,
        warnings: Vec<String>,
    },
    Failed {
        job_id: String,
        job_name: String,
        error: String,
    },
}

impl JobEvent {
    pub fn job_name(&self) -> &str {
        match self {
            JobEvent::Completed { job_name, .. } | JobEvent::Failed { job_name, .. } => job_name,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            JobEvent::Completed { .. } => "SUCCESS",
            JobEvent::Failed { .. } => "FAILURE",
        }
    }

    pub fn subject(&self) -> String {
        format!("[{}] {} backup", self.status_label(), self.job_name())
    }
}

/// Trait for notification channel implementations
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: &JobEvent, recipients: &[String]) -> Result<()>;
}

/// Build the email channel from the shared settings, or `None` when the
/// settings are incomplete.
pub fn create_notifier(settings: &NotificationSettings) -> Option<Arc<dyn NotificationChannel>> {
    let server = settings.smtp_server.as_deref().filter(|s| !s.trim().is_empty());
    let sender = settings.sender_email.as_deref().filter(|s| !s.trim().is_empty());
    let password = settings
        .sender_password
        .as_deref()
        .filter(|s| !s.trim().is_empty());

    match (server, sender, password) {
        (Some(server), Some(sender), Some(password)) => Some(Arc::new(EmailNotifier::new(
            server.to_string(),
            settings.smtp_port.unwrap_or(587),
            sender.to_string(),
            password.to_string(),
        ))),
        _ => {
            warn!("Email skipped: SMTP server or credentials not configured");
            None
        }
    }
}
