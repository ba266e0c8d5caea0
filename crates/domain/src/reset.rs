//! Single-use, expiring password reset codes.
//!
//! A code is issued for an email that belongs to an account, mailed out,
//! and consumed by a password change. It is valid while less than
//! [`RESET_CODE_VALIDITY_SECS`] seconds old. When several codes exist for
//! the same email and value, the most recently issued one decides.

use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use store::{PasswordResetCode, Store, StoreError};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::credentials::PasswordHasher;
use crate::mail::{EmailMessage, MailQueue};
use crate::validation::{normalize_email, validate_password};
use crate::DomainError;

pub const RESET_CODE_VALIDITY_SECS: i64 = 400;

fn validity() -> Duration {
    Duration::seconds(RESET_CODE_VALIDITY_SECS)
}

fn no_such_user() -> DomainError {
    DomainError::validation("email", "There is no active user with this email")
}

/// Issues, validates, consumes and sweeps reset codes.
pub struct ResetCodeAuthority<S: Store> {
    store: S,
    clock: Arc<dyn Clock>,
    hasher: PasswordHasher,
    mail: MailQueue,
}

impl<S: Store> ResetCodeAuthority<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, hasher: PasswordHasher, mail: MailQueue) -> Self {
        Self {
            store,
            clock,
            hasher,
            mail,
        }
    }

    /// Issues a fresh code for `email` and queues the email carrying it.
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, email: &str) -> Result<PasswordResetCode, DomainError> {
        let email = normalize_email(email)?;
        if self.store.get_user_by_email(&email).await?.is_none() {
            return Err(no_such_user());
        }

        let code = rand::thread_rng().gen_range(1000..=9999).to_string();
        let record = self
            .store
            .insert_reset_code(&email, &code, self.clock.now())
            .await?;

        self.mail.enqueue(EmailMessage::reset_code(&email, &code));
        metrics::counter!("reset_codes_issued_total").increment(1);
        tracing::info!(code_id = %record.id, "reset code issued");
        Ok(record)
    }

    /// Returns the latest record for the pair if it is still valid.
    #[tracing::instrument(skip(self, code))]
    pub async fn validate(&self, email: &str, code: &str) -> Result<PasswordResetCode, DomainError> {
        let email = normalize_email(email)?;
        let record = self
            .store
            .latest_reset_code(&email, code.trim())
            .await?
            .ok_or(DomainError::InvalidCode)?;

        let age = self.clock.now() - record.created_at;
        if age >= validity() {
            tracing::debug!(code_id = %record.id, age_secs = age.num_seconds(), "reset code expired");
            return Err(DomainError::ExpiredCode);
        }
        Ok(record)
    }

    /// Validates the code and sets the new password.
    ///
    /// The code is deleted in the same transaction as the password update,
    /// so it works exactly once; if the update fails the code stays usable.
    #[tracing::instrument(skip(self, code, new_password))]
    pub async fn consume(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), DomainError> {
        let record = self.validate(email, code).await?;
        validate_password(new_password).map_err(|e| match e {
            DomainError::Validation { message, .. } => {
                DomainError::validation("new_password", message)
            }
            other => other,
        })?;

        let user = self
            .store
            .get_user_by_email(&record.email)
            .await?
            .ok_or_else(no_such_user)?;
        let password_hash = self.hasher.hash(new_password)?;

        match self
            .store
            .consume_reset_code(record.id, user.id, &password_hash)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound {
                entity: "reset code",
                ..
            }) => return Err(DomainError::InvalidCode),
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("password_resets_total").increment(1);
        tracing::info!(user_id = %user.id, "password reset");
        Ok(())
    }

    /// Deletes codes older than the validity window.
    #[tracing::instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<u64, DomainError> {
        let cutoff = self.clock.now() - validity();
        let purged = self.store.purge_reset_codes_before(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, "expired reset codes purged");
        }
        Ok(purged)
    }
}

/// Runs [`ResetCodeAuthority::purge_expired`] every `every`.
pub fn spawn_reset_code_sweeper<S: Store>(
    authority: Arc<ResetCodeAuthority<S>>,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = authority.purge_expired().await {
                tracing::error!(error = %e, "reset code sweep failed");
            }
        }
    })
}
