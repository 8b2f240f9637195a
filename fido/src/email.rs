//! Transaction notification emails.

use chrono::{DateTime, Datelike, Utc};
use lettre::{
    Address, AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use minijinja::{Environment, context};
use rust_decimal::Decimal;
use std::path::Path;

use crate::{
    config::{EmailConfig, EmailTransportKind},
    errors::Error,
    money::format_currency,
    types::TransactionType,
};

const TRANSACTION_TEMPLATE: &str = "transaction_notification.html";

/// What a notification email says about a settled transaction
#[derive(Debug, Clone)]
pub struct TransactionEmailContext {
    pub user_id: String,
    pub full_name: String,
    pub transaction_amount: Decimal,
    pub transaction_type: TransactionType,
    pub transaction_date: DateTime<Utc>,
    pub transaction_id: String,
}

pub struct EmailService {
    transport: EmailTransport,
    templates: Environment<'static>,
    from_email: String,
    from_name: String,
    enabled: bool,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &EmailConfig) -> Result<Self, Error> {
        let transport = match config.transport {
            EmailTransportKind::Smtp => {
                let smtp = &config.smtp;
                if !smtp.use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if smtp.use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(smtp.port)
                .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportKind::File => {
                let emails_dir = Path::new(&config.file_path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        let mut templates = Environment::new();
        templates
            .add_template(TRANSACTION_TEMPLATE, include_str!("../templates/email/transaction_notification.html"))
            .map_err(|e| Error::Internal {
                operation: format!("load email template: {e}"),
            })?;

        Ok(Self {
            transport,
            templates,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            enabled: config.enable_notifications,
        })
    }

    /// Render and send the notification for a settled transaction.
    ///
    /// Returns `Ok(false)` without sending when notifications are disabled, and also when the
    /// transport fails; delivery problems are logged rather than propagated.
    #[tracing::instrument(skip(self, context), fields(transaction_id = %context.transaction_id))]
    pub async fn send_transaction_notification(&self, to_email: &str, context: &TransactionEmailContext) -> Result<bool, Error> {
        if !self.enabled {
            tracing::info!("Email notifications are disabled");
            return Ok(false);
        }

        let (subject, body) = self.render_transaction_notification(context)?;
        match self.send_email(to_email, Some(&context.full_name), &subject, &body).await {
            Ok(()) => {
                tracing::info!("Transaction notification sent");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send transaction notification");
                Ok(false)
            }
        }
    }

    /// Subject line and HTML body for a transaction notification
    pub fn render_transaction_notification(&self, context: &TransactionEmailContext) -> Result<(String, String), Error> {
        let amount = format_currency(context.transaction_amount.abs());
        let transaction_type = title_case(context.transaction_type.as_str());

        let template = self.templates.get_template(TRANSACTION_TEMPLATE).map_err(|e| Error::Internal {
            operation: format!("load email template: {e}"),
        })?;
        let body = template
            .render(context! {
                full_name => context.full_name,
                transaction_type => transaction_type,
                amount => amount,
                transaction_date => context.transaction_date.format("%Y-%m-%d %H:%M:%S").to_string(),
                transaction_id => context.transaction_id,
                current_year => Utc::now().year(),
            })
            .map_err(|e| Error::Internal {
                operation: format!("render email template: {e}"),
            })?;

        let subject = format!("Transaction Notification: {transaction_type} - ${amount}");
        Ok((subject, body))
    }

    async fn send_email(&self, to_email: &str, to_name: Option<&str>, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to_address = to_email.parse::<Address>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;
        let to = Mailbox::new(to_name.map(str::to_string), to_address);

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmailConfig;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn file_config(dir: &std::path::Path, enabled: bool) -> EmailConfig {
        EmailConfig {
            transport: EmailTransportKind::File,
            file_path: dir.to_string_lossy().into_owned(),
            enable_notifications: enabled,
            ..Default::default()
        }
    }

    fn context() -> TransactionEmailContext {
        TransactionEmailContext {
            user_id: "42".into(),
            full_name: "Ada <Lovelace>".into(),
            transaction_amount: Decimal::from_str("1234.5").unwrap(),
            transaction_type: TransactionType::Credit,
            transaction_date: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap(),
            transaction_id: "17".into(),
        }
    }

    #[test]
    fn title_cases_transaction_types() {
        assert_eq!(title_case("credit"), "Credit");
        assert_eq!(title_case("DEBIT"), "Debit");
        assert_eq!(title_case(""), "");
    }

    #[tokio::test]
    async fn renders_subject_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&file_config(dir.path(), true)).unwrap();

        let (subject, body) = service.render_transaction_notification(&context()).unwrap();
        assert_eq!(subject, "Transaction Notification: Credit - $1,234.50");
        assert!(body.contains("$1,234.50"));
        assert!(body.contains("2024-03-09 14:05:00"));
        assert!(body.contains("Reference"));
        // names are escaped in the html body
        assert!(body.contains("Ada &lt;Lovelace&gt;"));
    }

    #[tokio::test]
    async fn disabled_notifications_send_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&file_config(dir.path(), false)).unwrap();

        let sent = service.send_transaction_notification("ada@example.com", &context()).await.unwrap();
        assert!(!sent);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn file_transport_writes_message() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&file_config(dir.path(), true)).unwrap();

        let sent = service.send_transaction_notification("ada@example.com", &context()).await.unwrap();
        assert!(sent);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
