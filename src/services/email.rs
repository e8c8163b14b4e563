//! SMTP notification channel

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::{self, authentication::Credentials},
    SmtpTransport, Transport,
};
use std::{str::FromStr, time::Duration};

use super::notification::{Notification, NotificationChannel, SendError};
use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
};

#[derive(Clone)]
pub struct SmtpChannel {
    mailer: SmtpTransport,
}

impl SmtpChannel {
    pub fn new(config: &EmailConfig) -> AppResult<Self> {
        let mailer_builder = if config.smtp_use_tls {
            // Use STARTTLS for secure connection
            SmtpTransport::starttls_relay(&config.smtp_host)
                .map_err(|e| AppError::Internal(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&config.smtp_host)
        }
        .port(config.smtp_port)
        .timeout(Some(Duration::from_secs(config.smtp_timeout_secs)));

        let mailer_builder = if let (Some(username), Some(password)) =
            (&config.smtp_username, &config.smtp_password)
        {
            mailer_builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer_builder
        };

        Ok(Self {
            mailer: mailer_builder.build(),
        })
    }
}

/// Build the plain text + HTML message
pub fn build_message(notification: &Notification) -> Result<Message, SendError> {
    let from_mailbox = Mailbox::from_str(&notification.from)
        .map_err(|e| SendError::Permanent(format!("Invalid from address: {}", e)))?;

    if notification.to.is_empty() {
        return Err(SendError::Permanent("No recipients".to_string()));
    }

    let mut builder = Message::builder().from(from_mailbox);
    for to in &notification.to {
        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| SendError::Permanent(format!("Invalid to address {}: {}", to, e)))?;
        builder = builder.to(to_mailbox);
    }

    builder
        .subject(notification.subject.as_str())
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(notification.body.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(format!(
                            r#"<html><body><p>{}</p></body></html>"#,
                            escape_html(&notification.body).replace('\n', "<br>")
                        )),
                ),
        )
        .map_err(|e| SendError::Permanent(format!("Failed to build email: {}", e)))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn classify(error: smtp::Error) -> SendError {
    if error.is_permanent() || error.is_client() {
        SendError::Permanent(error.to_string())
    } else {
        // 4xx replies, timeouts, connection and TLS trouble
        SendError::Transient(error.to_string())
    }
}

#[async_trait]
impl NotificationChannel for SmtpChannel {
    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        let email = build_message(notification)?;
        let mailer = self.mailer.clone();

        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| SendError::Transient(format!("SMTP worker failed: {}", e)))?
            .map_err(classify)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::config::EmailTransport;

    fn plain_config(port: u16) -> EmailConfig {
        EmailConfig {
            transport: EmailTransport::Smtp,
            smtp_host: "127.0.0.1".to_string(),
            smtp_port: port,
            smtp_use_tls: false,
            smtp_timeout_secs: 2,
            ..EmailConfig::default()
        }
    }

    /// Minimal SMTP server that greets, accepts EHLO and rejects the sender
    fn rejecting_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            writer.write_all(b"220 localhost ESMTP\r\n").unwrap();
            let mut line = String::new();
            while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                let command = line.to_ascii_uppercase();
                let reply: &[u8] = if command.starts_with("EHLO") || command.starts_with("HELO") {
                    b"250 localhost\r\n"
                } else if command.starts_with("MAIL") {
                    b"550 5.7.1 sender rejected\r\n"
                } else if command.starts_with("QUIT") {
                    let _ = writer.write_all(b"221 bye\r\n");
                    return;
                } else {
                    b"250 ok\r\n"
                };
                if writer.write_all(reply).is_err() {
                    return;
                }
                line.clear();
            }
        });
        port
    }

    fn notification(to: &[&str]) -> Notification {
        Notification {
            subject: "Overdue Notice: Dune".to_string(),
            body: "Dear Pat,\n\nPlease return the book.".to_string(),
            from: "Lendwell Library <noreply@lendwell.org>".to_string(),
            to: to.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_message() {
        let message = build_message(&notification(&["pat@example.org"])).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Overdue Notice: Dune"));
        assert!(raw.contains("To: pat@example.org"));
    }

    #[test]
    fn test_invalid_recipient_is_permanent() {
        let error = build_message(&notification(&["not an address"])).unwrap_err();
        assert!(!error.is_retryable());

        let error = build_message(&notification(&[])).unwrap_err();
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_html_part_is_escaped() {
        let mut notice = notification(&["pat@example.org"]);
        notice.body = "Your loan for \"Tom & Jerry <b>\" is overdue.\nThanks".to_string();

        let message = build_message(&notice).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("&quot;Tom &amp; Jerry &lt;b&gt;&quot;"));
        assert!(raw.contains("overdue.<br>Thanks"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        // Grab a free port, then close it so the connection is refused
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let channel = SmtpChannel::new(&plain_config(port)).unwrap();
        let error = channel
            .send(&notification(&["pat@example.org"]))
            .await
            .unwrap_err();

        assert!(error.is_retryable(), "expected transient, got {:?}", error);
    }

    #[tokio::test]
    async fn test_rejected_sender_is_permanent() {
        let channel = SmtpChannel::new(&plain_config(rejecting_server())).unwrap();
        let error = channel
            .send(&notification(&["pat@example.org"]))
            .await
            .unwrap_err();

        assert!(!error.is_retryable(), "expected permanent, got {:?}", error);
    }
}
