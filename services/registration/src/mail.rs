//! Outbound mail.
//!
//! Only the [`LogMailer`] ships: it writes the message, including the link,
//! to the log instead of delivering it. Every send goes through
//! [`send_with_deadline`], which gives up after [`SEND_TIMEOUT`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Upper bound for a single delivery attempt.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum MailError {
    #[error("timed out sending mail after {0:?}")]
    Timeout(Duration),

    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Logs mails instead of sending them.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        info!(to = %mail.to, subject = %mail.subject, body = %mail.body, "mail delivery disabled, logging instead");
        Ok(())
    }
}

/// Sends `mail`, counting it as failed once [`SEND_TIMEOUT`] elapses.
pub async fn send_with_deadline(mailer: &dyn Mailer, mail: &Mail) -> Result<(), MailError> {
    tokio::time::timeout(SEND_TIMEOUT, mailer.send(mail))
        .await
        .map_err(|_| MailError::Timeout(SEND_TIMEOUT))?
}

pub fn verification_mail(to: &str, nickname: &str, link: &str) -> Mail {
    Mail {
        to: to.to_string(),
        subject: "Bitte deine Email bestätigen".to_string(),
        body: format!(
            "Moin {nickname},\r\n\r\n\
             bitte klicke auf den folgenden Link, um deine Registrierung abzuschließen:\r\n\r\n\
             {link}\r\n\r\n\
             Der Link ist 24h gültig."
        ),
    }
}

pub fn password_reset_mail(to: &str, nickname: &str, link: &str) -> Mail {
    Mail {
        to: to.to_string(),
        subject: "Passwort Reset".to_string(),
        body: format!(
            "Moin {nickname},\r\n\r\n\
             klicke auf den folgenden Link, um dein Passwort zurückzusetzen:\r\n\r\n\
             {link}\r\n\r\n\
             Der Link ist 24h gültig."
        ),
    }
}
