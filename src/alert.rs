// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! SMTP alert client, the external collaborator the donor calls `SMTP`
//! (`sensor/include/smtp.cpp`). Out of scope as a wire-protocol
//! reimplementation per §1; `lettre` supplies the protocol, this module
//! supplies the interface the BitTorrent and PPS analyzers alert through.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::AnalyzerConfig;
use crate::error::{Result, SensorError};

/// One alert send. §5's "one mutex around subject/body composition and
/// send" is satisfied by each analyzer owning its own `Arc<dyn Alerter>` and
/// composing the message locally before calling `send`; the analyzer's own
/// flush pass already serializes calls into it, so no extra mutex is added
/// here.
pub trait Alerter: Send + Sync {
    fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Real SMTP sender, wrapping `lettre`.
pub struct SmtpAlerter {
    transport: SmtpTransport,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
}

impl SmtpAlerter {
    pub fn from_config(conf: &AnalyzerConfig) -> Result<Self> {
        let server = conf
            .smtp_server
            .as_deref()
            .ok_or_else(|| SensorError::Config("smtp_server is required for alerting analyzers".into()))?;

        let mut builder = SmtpTransport::relay(server)
            .map_err(|e| SensorError::Config(format!("smtp relay '{server}': {e}")))?;
        if conf.smtp_auth {
            let user = conf.smtp_user.clone().unwrap_or_default();
            let password = conf.smtp_password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(user, password));
        }
        let transport = builder.build();

        let sender_address = conf
            .sender_address
            .as_deref()
            .ok_or_else(|| SensorError::Config("sender_address is required for alerting analyzers".into()))?;
        let sender = format_mailbox(conf.sender_name.as_deref(), sender_address)?;

        if conf.recipients.is_empty() {
            return Err(SensorError::Config("at least one recipient is required for alerting analyzers".into()));
        }
        let recipients = conf
            .recipients
            .iter()
            .map(|r| format_mailbox(None, r))
            .collect::<Result<Vec<_>>>()?;

        Ok(SmtpAlerter {
            transport,
            sender,
            recipients,
        })
    }
}

fn format_mailbox(name: Option<&str>, address: &str) -> Result<Mailbox> {
    let parsed = address
        .parse()
        .map_err(|e| SensorError::Config(format!("invalid e-mail address '{address}': {e}")))?;
    Ok(match name {
        Some(name) => Mailbox::new(Some(name.to_string()), parsed),
        None => Mailbox::new(None, parsed),
    })
}

impl Alerter for SmtpAlerter {
    fn send(&self, subject: &str, body: &str) -> Result<()> {
        for recipient in &self.recipients {
            let message = Message::builder()
                .from(self.sender.clone())
                .to(recipient.clone())
                .subject(subject)
                .body(body.to_string())
                .map_err(|e| SensorError::Analyzer {
                    name: "alert".into(),
                    reason: format!("building message: {e}"),
                })?;
            self.transport.send(&message).map_err(|e| SensorError::Analyzer {
                name: "alert".into(),
                reason: format!("smtp send: {e}"),
            })?;
        }
        Ok(())
    }
}

/// No-op alerter for tests, so analyzer unit tests can exercise the alert
/// path without a real mail server.
#[derive(Default)]
pub struct NullAlerter {
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
}

impl Alerter for NullAlerter {
    fn send(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}
