use super::{JobEvent, NotificationChannel};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use std::time::Duration;
use tracing::{info, warn};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const SENDER_NAME: &str = "Backup Controller";

/// Sends HTML mail through an authenticated STARTTLS submission server.
pub struct EmailNotifier {
    server: String,
    port: u16,
    sender: String,
    password: String,
}

impl EmailNotifier {
    pub fn new(server: String, port: u16, sender: String, password: String) -> Self {
        Self {
            server,
            port,
            sender,
            password,
        }
    }

    fn build_message(&self, event: &JobEvent, recipients: &[String]) -> Result<Message> {
        let from: Address = self
            .sender
            .parse()
            .with_context(|| format!("Invalid sender address {:?}", self.sender))?;

        let mut builder = Message::builder()
            .from(Mailbox::new(Some(SENDER_NAME.to_string()), from))
            .subject(event.subject());

        let mut valid = 0;
        for recipient in recipients {
            match recipient.parse::<Address>() {
                Ok(address) => {
                    builder = builder.to(Mailbox::new(None, address));
                    valid += 1;
                }
                Err(e) => warn!(recipient = %recipient, error = %e, "Skipping invalid recipient"),
            }
        }
        if valid == 0 {
            bail!("No valid recipients");
        }

        let message = builder
            .header(ContentType::TEXT_HTML)
            .body(render_html(event))
            .context("Failed to build email")?;
        Ok(message)
    }
}

#[async_trait]
impl NotificationChannel for EmailNotifier {
    async fn notify(&self, event: &JobEvent, recipients: &[String]) -> Result<()> {
        let message = self.build_message(event, recipients)?;
        let server = self.server.clone();
        let port = self.port;
        let credentials = Credentials::new(self.sender.clone(), self.password.clone());

        // lettre's SMTP transport is blocking
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mailer = SmtpTransport::starttls_relay(&server)?
                .port(port)
                .credentials(credentials)
                .timeout(Some(SMTP_TIMEOUT))
                .build();
            mailer.send(&message)?;
            Ok(())
        })
        .await??;

        info!(recipients = recipients.len(), subject = %event.subject(), "Email sent");
        Ok(())
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn row(label: &str, value: &str) -> String {
    format!(
        "<tr><td style=\"padding:5px;\"><strong>{}:</strong></td><td>{}</td></tr>",
        label,
        escape(value)
    )
}

fn render_html(event: &JobEvent) -> String {
    let (color, rows) = match event {
        JobEvent::Completed {
            source,
            snapshot,
            size,
            duration,
            warnings,
            ..
        } => {
            let mut rows = vec![
                row("Duration", duration),
                row("Data Uploaded", size),
                row("Source", &source.display().to_string()),
                row("Cloud Folder", snapshot),
            ];
            rows.extend(warnings.iter().map(|w| row("Warning", w)));
            ("#10B981", rows)
        }
        JobEvent::Failed { error, .. } => ("#EF4444", vec![row("Error", error)]),
    };

    format!(
        r#"<html>
  <body style="font-family: sans-serif; color: #333;">
    <div style="border: 1px solid #ddd; border-radius: 8px; overflow: hidden; max-width: 600px;">
      <div style="background-color: {color}; padding: 15px; color: white; text-align: center;">
        <h2 style="margin:0;">{name}: Backup {status}</h2>
      </div>
      <div style="padding: 20px;">
        <p><strong>Time:</strong> {time}</p>
        <table style="width: 100%; border-collapse: collapse;">
          {rows}
        </table>
        <p style="font-size: 12px; color: #999; margin-top: 20px;">Automated alert from the backup agent.</p>
      </div>
    </div>
  </body>
</html>"#,
        color = color,
        name = escape(event.job_name()),
        status = event.status_label(),
        time = Local::now().format("%Y-%m-%d %I:%M %p"),
        rows = rows.join("\n          "),
    )
}
