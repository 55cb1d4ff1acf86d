//! Send emails to users for important account events.
//!
//! The request path only enqueues: events are published to a durable queue
//! and rendered/delivered by the mailer consuming it. Enqueue failures are
//! surfaced as [`MailError`] so each caller decides whether they are fatal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use serde::Serialize;

use crate::config::Mail;

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

#[derive(thiserror::Error, Debug)]
pub enum MailError {
    #[error("mail queue error: {0}")]
    Queue(#[from] lapin::Error),
    #[error("mail event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Mail templates list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Prove control of the address used at registration.
    Verification,
    /// Carry the password-reset link.
    PasswordReset,
    /// Confirm a completed password reset.
    ResetConfirmation,
    /// Carry the login second-factor code.
    TwoFactor,
    /// Notify an account was removed.
    AccountDeletion,
    /// Alert user of a personal data update.
    AccountUpdate,
}

/// Variables the templates interpolate. Unused fields are omitted from the
/// event payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Verification or reset link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Second-factor code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human wording of the token lifetime ("24 hours", "5 minutes").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<String>,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    to: &'a str,
    from: &'a str,
    template: Template,
    params: &'a TemplateParams,
}

/// Deliver templated notifications. The request that triggered the mail only
/// observes the enqueue, never the delivery.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn deliver(
        &self,
        to: &str,
        template: Template,
        params: TemplateParams,
    ) -> Result<(), MailError>;
}

/// Publishes mail events to an AMQP queue.
pub struct AmqpMailer {
    queue: String,
    from: String,
    conn: Arc<Connection>,
}

impl AmqpMailer {
    /// Create a new [`AmqpMailer`].
    pub async fn new(config: &Mail) -> Result<Self, MailError> {
        let uri = format!(
            "{}?connection_name=gatehouse_mailer",
            config.address.trim_end_matches('/')
        );
        let conn =
            Connection::connect(&uri, ConnectionProperties::default()).await?;

        tracing::info!(address = %config.address, "mail broker connected");

        Ok(Self {
            queue: config.queue.clone(),
            from: config.from.clone(),
            conn: Arc::new(conn),
        })
    }

    async fn create_channel(&self) -> Result<Channel, MailError> {
        let channel = self.conn.create_channel().await?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event<'a>(&'a self, data: Content<'a>) -> Cloudevent<'a> {
        let id: String = (0..ID_LENGTH)
            .map(|_| OsRng.sample(Alphanumeric) as char)
            .collect();
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.gatehouse.email",
            source: "com.gatehouse.api",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }
}

#[async_trait]
impl MailSink for AmqpMailer {
    async fn deliver(
        &self,
        to: &str,
        template: Template,
        params: TemplateParams,
    ) -> Result<(), MailError> {
        let channel = self.create_channel().await?;

        let content = Content {
            to,
            from: &self.from,
            template,
            params: &params,
        };
        let payload = serde_json::to_string(&self.create_event(content))?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        tracing::trace!(?template, "mail event enqueued");

        Ok(())
    }
}

/// Fallback sink when no mail broker is configured: events are dropped with
/// a log line so local instances keep working.
#[derive(Debug, Default)]
pub struct NoopMailer;

#[async_trait]
impl MailSink for NoopMailer {
    async fn deliver(
        &self,
        to: &str,
        template: Template,
        _params: TemplateParams,
    ) -> Result<(), MailError> {
        tracing::debug!(%to, ?template, "mail is not configured, event dropped");
        Ok(())
    }
}

/// Records every delivery. Test support.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<(String, Template, TemplateParams)>>,
    /// When set, `deliver` fails, to exercise the soft/hard mail branches.
    pub fail: std::sync::atomic::AtomicBool,
}

impl RecordingMailer {
    pub fn last_for(&self, to: &str) -> Option<(Template, TemplateParams)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(recipient, _, _)| recipient == to)
            .map(|(_, template, params)| (*template, params.clone()))
    }
}

#[async_trait]
impl MailSink for RecordingMailer {
    async fn deliver(
        &self,
        to: &str,
        template: Template,
        params: TemplateParams,
    ) -> Result<(), MailError> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(MailError::Queue(lapin::Error::ChannelsLimitReached));
        }

        self.sent
            .lock()
            .unwrap()
            .push((to.to_owned(), template, params));
        Ok(())
    }
}
