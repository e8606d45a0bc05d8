//! Outbound statement email via SMTP (lettre).

use std::path::PathBuf;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::error::MailError;

/// MIME type of every statement attachment.
const PDF_CONTENT_TYPE: &str = "application/pdf";

/// One statement email: a single recipient, shared CC list, one PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementEmail {
    pub to: String,
    /// CC addresses, one mailbox per entry.
    pub cc: Vec<String>,
    pub attachment_path: PathBuf,
    /// Name the attachment is presented under.
    pub attachment_name: String,
}

/// Something that can deliver a statement email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_statement(&self, email: &StatementEmail) -> Result<(), MailError>;
}

/// Join CC addresses the way they appear in the `Cc:` header.
pub fn join_cc(addresses: &[String]) -> String {
    addresses.join(", ")
}

/// Build the MIME message for a statement.
pub fn build_message(
    config: &SmtpConfig,
    email: &StatementEmail,
    pdf: Vec<u8>,
) -> Result<Message, MailError> {
    let from = parse_mailbox("from", &config.from_address)?;
    let to = parse_mailbox("to", &email.to)?;

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(config.subject.clone());

    for address in email.cc.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        match parse_mailbox("cc", address) {
            Ok(mailbox) => builder = builder.cc(mailbox),
            Err(e) => warn!("Dropping CC recipient: {e}"),
        }
    }

    let content_type = ContentType::parse(PDF_CONTENT_TYPE)
        .map_err(|e| MailError::Build(format!("content type: {e}")))?;
    let attachment = Attachment::new(email.attachment_name.clone()).body(pdf, content_type);

    builder
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(config.body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| MailError::Build(e.to_string()))
}

fn parse_mailbox(field: &'static str, address: &str) -> Result<Mailbox, MailError> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
            field,
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// SMTP mailer. Sends run on the blocking pool.
pub struct SmtpMailer {
    config: SmtpConfig,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let builder = if config.implicit_tls {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?;

        let transport = builder
            .port(config.port)
            .credentials(creds)
            .timeout(Some(config.timeout))
            .build();

        Ok(Self { config, transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_statement(&self, email: &StatementEmail) -> Result<(), MailError> {
        let pdf = tokio::fs::read(&email.attachment_path)
            .await
            .map_err(|source| MailError::Attachment {
                path: email.attachment_path.clone(),
                source,
            })?;
        let message = build_message(&self.config, email, pdf)?;

        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Transport(format!("send task panicked: {e}")))?
            .map_err(|e| MailError::Transport(e.to_string()))?;

        info!(to = %email.to, cc = %join_cc(&email.cc), "Email sent to {}", email.to);
        Ok(())
    }
}
