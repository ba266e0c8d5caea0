//! User accounts: registration, profile management and sign-in.

use common::UserId;
use store::{NewUser, Store, User, UserChanges};

use crate::access::{self, Actor};
use crate::credentials::PasswordHasher;
use crate::mail::{EmailMessage, MailQueue};
use crate::validation::{
    NAME_MAX_LEN, PHONE_MAX_LEN, normalize_email, validate_max_len, validate_password,
    validate_required,
};
use crate::DomainError;

/// Fields of a new account.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
}

/// Changes to an account. `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

fn validate_profile(first_name: &str, last_name: &str, phone_number: &str) -> Result<(), DomainError> {
    validate_max_len("first_name", first_name, NAME_MAX_LEN)?;
    validate_max_len("last_name", last_name, NAME_MAX_LEN)?;
    validate_max_len("phone_number", phone_number, PHONE_MAX_LEN)?;
    Ok(())
}

/// Service for managing user accounts.
pub struct AccountService<S: Store> {
    store: S,
    hasher: PasswordHasher,
    mail: MailQueue,
}

impl<S: Store> AccountService<S> {
    pub fn new(store: S, hasher: PasswordHasher, mail: MailQueue) -> Self {
        Self {
            store,
            hasher,
            mail,
        }
    }

    /// Creates a regular account and queues the welcome email.
    #[tracing::instrument(skip(self, registration), fields(email = %registration.email))]
    pub async fn register(&self, registration: Registration) -> Result<User, DomainError> {
        let email = normalize_email(&registration.email)?;
        validate_password(&registration.password)?;
        validate_required("first_name", &registration.first_name)?;
        validate_required("last_name", &registration.last_name)?;
        validate_required("phone_number", &registration.phone_number)?;
        validate_profile(
            &registration.first_name,
            &registration.last_name,
            &registration.phone_number,
        )?;

        let user = self
            .store
            .create_user(NewUser {
                email,
                password_hash: self.hasher.hash(&registration.password)?,
                first_name: registration.first_name,
                last_name: registration.last_name,
                phone_number: registration.phone_number,
                is_staff: false,
                is_superuser: false,
            })
            .await?;

        tracing::info!(user_id = %user.id, "account registered");
        self.mail
            .enqueue(EmailMessage::welcome(&user.email, &user.first_name));
        Ok(user)
    }

    /// Creates a staff superuser, or returns the existing account with that email.
    #[tracing::instrument(skip(self, password))]
    pub async fn ensure_superuser(&self, email: &str, password: &str) -> Result<User, DomainError> {
        let email = normalize_email(email)?;
        if let Some(existing) = self.store.get_user_by_email(&email).await? {
            if !existing.is_superuser {
                tracing::warn!(user_id = %existing.id, "bootstrap admin email belongs to a regular user");
            }
            return Ok(existing);
        }

        let user = self
            .store
            .create_user(NewUser {
                email,
                password_hash: self.hasher.hash(password)?,
                first_name: String::new(),
                last_name: String::new(),
                phone_number: String::new(),
                is_staff: true,
                is_superuser: true,
            })
            .await?;
        tracing::info!(user_id = %user.id, "superuser created");
        Ok(user)
    }

    /// Checks an email and password pair.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, DomainError> {
        let rejected = || {
            DomainError::Authentication(
                "No active account found with the given credentials".to_string(),
            )
        };
        let email = normalize_email(email).map_err(|_| rejected())?;
        let user = self
            .store
            .get_user_by_email(&email)
            .await?
            .ok_or_else(rejected)?;

        if !self.hasher.verify(&user.password_hash, password) {
            return Err(rejected());
        }
        Ok(user)
    }

    /// Resolves the user behind a verified token.
    pub async fn resolve(&self, user_id: UserId) -> Result<User, DomainError> {
        self.store.get_user(user_id).await?.ok_or_else(|| {
            DomainError::Authentication("User not found".to_string())
        })
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn get(&self, actor: &Actor, user_id: UserId) -> Result<User, DomainError> {
        access::require_authenticated(actor)?;
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("user", user_id))?;
        access::require_owner_or_admin(actor, user, "user", user_id)
    }

    /// Staff see every account, other users only their own.
    #[tracing::instrument(skip(self, actor))]
    pub async fn list(&self, actor: &Actor) -> Result<Vec<User>, DomainError> {
        let caller = access::require_authenticated(actor)?;
        match access::listing_scope(caller) {
            None => Ok(self.store.list_users().await?),
            Some(_) => Ok(vec![caller.clone()]),
        }
    }

    #[tracing::instrument(skip(self, actor, update))]
    pub async fn update(
        &self,
        actor: &Actor,
        user_id: UserId,
        update: AccountUpdate,
    ) -> Result<User, DomainError> {
        let current = self.get(actor, user_id).await?;

        let email = update.email.as_deref().map(normalize_email).transpose()?;
        if let Some(ref password) = update.password {
            validate_password(password)?;
        }
        validate_profile(
            update.first_name.as_deref().unwrap_or(&current.first_name),
            update.last_name.as_deref().unwrap_or(&current.last_name),
            update.phone_number.as_deref().unwrap_or(&current.phone_number),
        )?;
        let password_hash = update
            .password
            .as_deref()
            .map(|password| self.hasher.hash(password))
            .transpose()?;

        let user = self
            .store
            .update_user(
                user_id,
                UserChanges {
                    email,
                    password_hash,
                    first_name: update.first_name,
                    last_name: update.last_name,
                    phone_number: update.phone_number,
                },
            )
            .await?;
        tracing::info!(user_id = %user.id, "account updated");
        Ok(user)
    }

    /// Deletes an account with its cart and orders.
    #[tracing::instrument(skip(self, actor))]
    pub async fn delete(&self, actor: &Actor, user_id: UserId) -> Result<(), DomainError> {
        self.get(actor, user_id).await?;
        if !self.store.delete_user(user_id).await? {
            return Err(DomainError::not_found("user", user_id));
        }
        tracing::info!(%user_id, "account deleted");
        Ok(())
    }
}
