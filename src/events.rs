//! Fire-and-forget audit and mail pipeline.
//!
//! Auth operations push events onto an unbounded channel and never wait
//! for the consumer; a slow or dead worker must not fail a login. The
//! worker drains the channel, writing audit entries through `tracing`
//! and handing mail jobs to the [`MailDispatcher`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What happened, with the internal richness the external error types
/// deliberately collapse: unknown-email and wrong-password are distinct
/// here even though both surface as `InvalidCredentials`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    Registered,
    LoginSucceeded,
    LoginUnknownEmail,
    LoginWrongPassword,
    LoginLockedOut,
    TokenRefreshed,
    RefreshRejected,
    LoggedOut,
    VerificationSent,
    EmailVerified,
    VerificationRejected,
    ResetRequested,
    ResetRequestUnknownEmail,
    PasswordReset,
    ResetRejected,
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event: AuthEvent,
    /// Subject email, when the attempt could be tied to one.
    pub email: Option<String>,
    pub success: bool,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTemplate {
    VerifyEmail,
    ResetPassword,
}

#[derive(Debug, Clone)]
pub struct MailJob {
    pub to: String,
    pub template: MailTemplate,
    pub token: String,
}

#[derive(Debug)]
pub enum Event {
    Audit(AuditRecord),
    Mail(MailJob),
}

/// Cloneable sending half handed to every auth component.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an audit record. A dropped receiver is ignored.
    pub fn audit(&self, record: AuditRecord) {
        let _ = self.tx.send(Event::Audit(record));
    }

    /// Queue an outbound mail. A dropped receiver is ignored.
    pub fn mail(&self, job: MailJob) {
        let _ = self.tx.send(Event::Mail(job));
    }
}

/// Outbound mail contract. Delivery failures are logged, never surfaced
/// to the request that queued the message.
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn send(&self, to: &str, template: MailTemplate, token: &str) -> anyhow::Result<()>;
}

/// Dispatcher that only records the message; real delivery is wired in
/// by the deployment, not this service.
pub struct LogMailer;

#[async_trait]
impl MailDispatcher for LogMailer {
    async fn send(&self, to: &str, template: MailTemplate, token: &str) -> anyhow::Result<()> {
        info!(%to, template = ?template, token_len = token.len(), "mail queued");
        Ok(())
    }
}

pub fn spawn_worker(
    mut rx: mpsc::UnboundedReceiver<Event>,
    mailer: std::sync::Arc<dyn MailDispatcher>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Audit(a) => {
                    info!(
                        event = ?a.event,
                        email = ?a.email,
                        success = a.success,
                        ip = ?a.ip,
                        user_agent = ?a.user_agent,
                        "audit"
                    );
                }
                Event::Mail(m) => {
                    if let Err(e) = mailer.send(&m.to, m.template, &m.token).await {
                        warn!(error = %e, to = %m.to, "mail dispatch failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_survives_dropped_receiver() {
        let (events, rx) = EventSender::channel();
        drop(rx);
        // Must not panic or error: audit/mail are fire-and-forget.
        events.audit(AuditRecord {
            event: AuthEvent::LoginSucceeded,
            email: Some("a@x.com".into()),
            success: true,
            ip: None,
            user_agent: None,
        });
        events.mail(MailJob {
            to: "a@x.com".into(),
            template: MailTemplate::VerifyEmail,
            token: "t".into(),
        });
    }

    #[tokio::test]
    async fn worker_drains_mail_jobs() {
        let (events, rx) = EventSender::channel();
        let handle = spawn_worker(rx, std::sync::Arc::new(LogMailer));
        events.mail(MailJob {
            to: "b@x.com".into(),
            template: MailTemplate::ResetPassword,
            token: "tok".into(),
        });
        drop(events);
        handle.await.expect("worker exits cleanly");
    }
}
