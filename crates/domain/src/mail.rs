//! Outgoing email as explicit message passing.
//!
//! Services enqueue an [`EmailMessage`] and move on. A background worker
//! drains the queue and delivers through an [`EmailSender`], retrying a few
//! times before logging the failure. Callers never observe the outcome.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// An email ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub message: String,
    pub recipient: String,
}

impl EmailMessage {
    pub fn welcome(recipient: &str, first_name: &str) -> Self {
        Self {
            subject: "Welcome to Online shop".to_string(),
            message: format!(
                "Hi {first_name}, Welcome to Online shop. Enjoy products and qualities"
            ),
            recipient: recipient.to_string(),
        }
    }

    pub fn reset_code(recipient: &str, code: &str) -> Self {
        Self {
            subject: "Code for reset password".to_string(),
            message: format!("Your new code is: {code}"),
            recipient: recipient.to_string(),
        }
    }
}

#[derive(Debug, Error)]
#[error("email delivery failed: {0}")]
pub struct MailError(pub String);

/// Delivers a single email.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<(), MailError>;
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, email: &EmailMessage) -> Result<(), MailError> {
        tracing::info!(
            recipient = %email.recipient,
            subject = %email.subject,
            body = %email.message,
            "email sent"
        );
        Ok(())
    }
}

/// Keeps every delivered email in memory. Can be told to fail first.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmailSender {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
    failures_left: Arc<Mutex<usize>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` delivery attempts fail.
    pub fn fail_next(&self, count: usize) {
        *self.failures_left.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Waits until at least `count` emails were delivered, or the timeout passes.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<EmailMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, email: &EmailMessage) -> Result<(), MailError> {
        {
            let mut failures = self.failures_left.lock().unwrap_or_else(|e| e.into_inner());
            if *failures > 0 {
                *failures -= 1;
                return Err(MailError("recording sender told to fail".to_string()));
            }
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email.clone());
        Ok(())
    }
}

/// How the worker retries a failed delivery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Handle for enqueueing emails. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MailQueue {
    tx: mpsc::UnboundedSender<EmailMessage>,
}

impl MailQueue {
    /// Spawns the delivery worker with the default retry policy.
    pub fn start(sender: Arc<dyn EmailSender>) -> (Self, JoinHandle<()>) {
        Self::start_with_policy(sender, RetryPolicy::default())
    }

    /// Spawns the delivery worker. It stops once every handle is dropped.
    pub fn start_with_policy(
        sender: Arc<dyn EmailSender>,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<EmailMessage>();
        let worker = tokio::spawn(async move {
            while let Some(email) = rx.recv().await {
                deliver(sender.as_ref(), &email, policy).await;
            }
            tracing::debug!("mail queue closed");
        });
        (Self { tx }, worker)
    }

    /// Queues an email for delivery. Never fails the caller.
    pub fn enqueue(&self, email: EmailMessage) {
        if let Err(e) = self.tx.send(email) {
            tracing::warn!(recipient = %e.0.recipient, "mail worker stopped, email dropped");
            metrics::counter!("emails_failed_total").increment(1);
        }
    }
}

async fn deliver(sender: &dyn EmailSender, email: &EmailMessage, policy: RetryPolicy) {
    for attempt in 1..=policy.max_attempts {
        match sender.send(email).await {
            Ok(()) => return,
            Err(e) if attempt < policy.max_attempts => {
                tracing::warn!(
                    recipient = %email.recipient,
                    attempt,
                    error = %e,
                    "email delivery failed, retrying"
                );
                tokio::time::sleep(policy.base_delay * 2u32.pow(attempt - 1)).await;
            }
            Err(e) => {
                tracing::error!(
                    recipient = %email.recipient,
                    subject = %email.subject,
                    attempts = attempt,
                    error = %e,
                    "email delivery failed"
                );
                metrics::counter!("emails_failed_total").increment(1);
            }
        }
    }
}
