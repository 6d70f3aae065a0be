use anyhow::{Context, Result};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpSettings;

/// Outbound mail over SMTP. Only used for the signup verification code;
/// delivery failures never fail the surrounding flow.
pub struct EmailService {
    settings: SmtpSettings,
}

impl EmailService {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    pub fn sending_disabled() -> bool {
        std::env::var("EMAIL_SEND_DISABLED")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub async fn send_otp_email(
        &self,
        recipient_email: &str,
        recipient_name: &str,
        otp: &str,
    ) -> Result<()> {
        if Self::sending_disabled() {
            tracing::info!(recipient = recipient_email, "Email sending disabled, skipping OTP");
            return Ok(());
        }

        let from_address: Mailbox = format!(
            "{} <{}>",
            self.settings.from_name, self.settings.from_email
        )
        .parse()
        .context("Invalid from email address")?;
        let to_address: Mailbox = format!("{} <{}>", recipient_name, recipient_email)
            .parse()
            .context("Invalid recipient email address")?;

        let body = format!(
            "Hello {},\n\nYour verification code is: {}\n\nIt expires in 10 minutes. If you did not sign up, ignore this email.\n",
            recipient_name, otp
        );

        let email = Message::builder()
            .from(from_address)
            .to(to_address)
            .subject("Your verification code")
            .body(body)
            .context("Failed to build email message")?;

        let mailer = self.build_mailer()?;
        mailer
            .send(email)
            .await
            .context("Failed to send verification email")?;

        Ok(())
    }

    fn build_mailer(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let creds = Credentials::new(self.settings.login.clone(), self.settings.password.clone());

        let builder = if self.settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.settings.server)
                .context("Invalid SMTP server for TLS")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.settings.server)
        }
        .port(self.settings.port)
        .credentials(creds);

        Ok(builder.build())
    }
}
