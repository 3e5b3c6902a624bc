//! Notification rendering and delivery.
//!
//! Delivery is fire-and-forget from the reconciler's perspective: send
//! failures are logged by the caller and never block or roll back a
//! membership mutation that already happened.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::debug;

use groupsync_directory::{GroupPath, UserRecord};

use crate::config::SyncEvent;

/// Built-in message templates.
///
/// Placeholders `{username}` and `{group_path}` are expanded for every
/// event; `{source_paths}` additionally for additions.
pub mod templates {
    use crate::config::SyncEvent;

    /// Footer appended to every non-empty notification body.
    pub const MESSAGE_FOOTER: &str = "\n\n\
        This message was generated by the synchronized-group membership robot.\n\
        Please contact your administrator for support.";

    pub const ADDITION_OCCURRED: &str = "{username},\n\n\
        You have been added to group {group_path} because you are a member\n\
        of one of its constituent groups:\n{source_paths}";

    pub const REMOVAL_PENDING: &str = "{username},\n\n\
        You have been scheduled for removal from group {group_path}\n\
        because you are no longer a member of any of its constituent groups.\n\
        Unless you (re)join one of those groups, you will be removed\n\
        after a grace period.";

    pub const REMOVAL_AVERTED: &str = "{username},\n\n\
        You are no longer scheduled for removal from group {group_path}.";

    pub const REMOVAL_OCCURRED: &str = "{username},\n\n\
        You have been removed from group {group_path} because you are\n\
        not a member of any of its constituent groups.";

    /// The default body for an event type.
    #[must_use]
    pub fn default_body(event: SyncEvent) -> &'static str {
        match event {
            SyncEvent::AdditionOccurred => ADDITION_OCCURRED,
            SyncEvent::RemovalPending => REMOVAL_PENDING,
            SyncEvent::RemovalAverted => REMOVAL_AVERTED,
            SyncEvent::RemovalOccurred => REMOVAL_OCCURRED,
        }
    }
}

/// Fixed subject line for an event.
#[must_use]
pub fn subject(event: SyncEvent, group_path: &GroupPath) -> String {
    match event {
        SyncEvent::AdditionOccurred => {
            format!("You have been added to group {group_path}")
        }
        SyncEvent::RemovalPending => {
            format!("You are scheduled for removal from group {group_path}")
        }
        SyncEvent::RemovalAverted => {
            format!("You are no longer scheduled for removal from group {group_path}")
        }
        SyncEvent::RemovalOccurred => {
            format!("You have been removed from group {group_path}")
        }
    }
}

/// Expand template placeholders into a final message body.
#[must_use]
pub fn render(
    template: &str,
    username: &str,
    group_path: &GroupPath,
    source_paths: &[GroupPath],
) -> String {
    let paths = source_paths
        .iter()
        .map(|p| format!("  {p}"))
        .collect::<Vec<_>>()
        .join("\n");
    template
        .replace("{username}", username)
        .replace("{group_path}", group_path.as_str())
        .replace("{source_paths}", &paths)
}

/// Error from notification delivery.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// No usable recipient address could be derived for the user.
    #[error("no recipient address for user {username}")]
    NoRecipient { username: String },

    /// A sender or recipient address failed to parse.
    #[error("invalid address: {address}")]
    InvalidAddress { address: String },

    /// The transport rejected or failed to deliver the message.
    #[error("delivery failed: {message}")]
    Delivery { message: String },
}

/// A channel that can deliver a message to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one message. No delivery confirmation is reported back.
    async fn send(
        &self,
        user: &UserRecord,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError>;
}

/// Notifier that drops every message, used when notifications are not
/// allowed for the run.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(
        &self,
        user: &UserRecord,
        subject: &str,
        _body: &str,
    ) -> Result<(), NotificationError> {
        debug!(user = %user.username, subject, "notifications disabled, dropping message");
        Ok(())
    }
}

/// SMTP delivery configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP relay host.
    pub host: String,
    /// SMTP relay port.
    pub port: u16,
    /// Sender address.
    pub from_address: String,
    /// Domain used to derive `username@domain` when the user record has
    /// no email address.
    pub fallback_domain: Option<String>,
}

/// Notifier delivering plain-text mail through an SMTP relay.
///
/// The transport is unencrypted; point it at a local MTA.
pub struct SmtpNotifier {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    /// Create a notifier for the given relay.
    pub fn new(config: SmtpConfig) -> Result<Self, NotificationError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .build();
        Ok(Self { config, transport })
    }

    /// Derive the recipient address for a user: their directory email
    /// address, else `username@fallback_domain`.
    fn recipient(&self, user: &UserRecord) -> Result<String, NotificationError> {
        if let Some(email) = user.email.as_deref().filter(|e| !e.is_empty()) {
            return Ok(email.to_string());
        }
        match &self.config.fallback_domain {
            Some(domain) => Ok(format!("{}@{domain}", user.username)),
            None => Err(NotificationError::NoRecipient {
                username: user.username.clone(),
            }),
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse()
        .map_err(|_| NotificationError::InvalidAddress {
            address: address.to_string(),
        })
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(
        &self,
        user: &UserRecord,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        let to = self.recipient(user)?;
        let message = Message::builder()
            .from(parse_mailbox(&self.config.from_address)?)
            .to(parse_mailbox(&to)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotificationError::Delivery {
                message: e.to_string(),
            })?;

        debug!(user = %user.username, to = %to, subject, "sending notification");
        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::Delivery {
                message: e.to_string(),
            })?;
        Ok(())
    }
}
