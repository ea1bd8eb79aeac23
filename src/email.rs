use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Outbound mail capability. Constructed once at startup and injected, so
/// tests can swap in a recording double.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: config.from.parse()?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: EmailMessage) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(message.to.parse()?)
            .subject(&message.subject)
            .multipart(MultiPart::alternative_plain_html(
                message.text,
                message.html,
            ))?;
        self.transport.send(email).await?;
        info!(to = %message.to, subject = %message.subject, "email sent");
        Ok(())
    }
}

/// Verification email with the raw token embedded in a frontend link.
pub fn verification_email(
    frontend_url: &str,
    username: &str,
    email: &str,
    raw_token: &str,
    ttl_minutes: i64,
) -> EmailMessage {
    let link = format!("{frontend_url}/verify-email?token={raw_token}&email={email}");
    EmailMessage {
        to: email.to_string(),
        subject: "Verify your email".into(),
        html: format!(
            "<p>Hi {username},</p>\
             <p>Welcome! Please confirm your email by clicking the link below:</p>\
             <p><a href=\"{link}\">Confirm your account</a></p>\
             <p>This link is valid for the next {ttl_minutes} minutes.</p>"
        ),
        text: format!(
            "Hi {username},\n\nWelcome! Please confirm your email:\n{link}\n\n\
             This link is valid for the next {ttl_minutes} minutes.\n"
        ),
    }
}

/// Password-reset email with the raw token embedded in a frontend link.
pub fn password_reset_email(
    frontend_url: &str,
    username: &str,
    email: &str,
    raw_token: &str,
) -> EmailMessage {
    let link = format!("{frontend_url}/reset-password?token={raw_token}&email={email}");
    EmailMessage {
        to: email.to_string(),
        subject: "Reset your password".into(),
        html: format!(
            "<p>Hi {username},</p>\
             <p>A password reset was requested for your account. \
             Click the link below to choose a new password:</p>\
             <p><a href=\"{link}\">Reset your password</a></p>\
             <p>If you did not request this, you can safely ignore this email.</p>"
        ),
        text: format!(
            "Hi {username},\n\nA password reset was requested for your account.\n\
             Reset it here: {link}\n\n\
             If you did not request this, you can safely ignore this email.\n"
        ),
    }
}

/// Courtesy notification after a successful password change.
pub fn password_changed_email(username: &str, email: &str) -> EmailMessage {
    EmailMessage {
        to: email.to_string(),
        subject: "Your password was changed".into(),
        html: format!(
            "<p>Hi {username},</p>\
             <p>Your password was just changed. All existing sessions were signed out.</p>\
             <p>If this wasn't you, please reset your password immediately.</p>"
        ),
        text: format!(
            "Hi {username},\n\nYour password was just changed. \
             All existing sessions were signed out.\n\
             If this wasn't you, please reset your password immediately.\n"
        ),
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records every message instead of sending it.
    #[derive(Default)]
    pub struct MockMailer {
        pub sent: Mutex<Vec<EmailMessage>>,
    }

    impl MockMailer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn last(&self) -> Option<EmailMessage> {
            self.sent.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, message: EmailMessage) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_email_carries_raw_token_link() {
        let msg = verification_email("https://app.example.com", "alice", "a@x.com", "rawtok", 30);
        assert_eq!(msg.to, "a@x.com");
        assert!(msg
            .html
            .contains("https://app.example.com/verify-email?token=rawtok&email=a@x.com"));
        assert!(msg
            .text
            .contains("https://app.example.com/verify-email?token=rawtok&email=a@x.com"));
    }

    #[test]
    fn verification_email_states_the_configured_ttl() {
        let msg = verification_email("https://app.example.com", "alice", "a@x.com", "rawtok", 45);
        assert!(msg.html.contains("valid for the next 45 minutes"));
        assert!(msg.text.contains("valid for the next 45 minutes"));
    }

    #[test]
    fn reset_email_carries_raw_token_link() {
        let msg = password_reset_email("https://app.example.com", "alice", "a@x.com", "rawtok");
        assert!(msg
            .html
            .contains("https://app.example.com/reset-password?token=rawtok&email=a@x.com"));
        assert!(msg.subject.contains("Reset"));
    }
}
