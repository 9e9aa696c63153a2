//! User registry: customers, managers and admins.
use chrono::Utc;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::store::{Store, Tx, TxResult, abort, key, tables};
use crate::types::{TimeStamp, UserId};
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Role {
    #[n(0)]
    Admin,
    #[n(1)]
    Manager,
    #[n(2)]
    Customer,
}

/// Registration input, credential still in plain text.
#[derive(Debug, Clone)]
pub struct Profile {
    pub username: String,
    pub password: String,
    pub contact: String,
    pub address: String,
    pub name: String,
    pub email: String,
}

/// Account fields with the credential already hashed.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AccountDetails {
    #[n(0)]
    pub username: String,
    #[n(1)]
    pub credential: String,
    #[n(2)]
    pub contact: String,
    #[n(3)]
    pub address: String,
    #[n(4)]
    pub name: String,
    #[n(5)]
    pub email: String,
}

impl Profile {
    /// Validates the profile and hashes its credential. Done once, at the edge.
    pub fn seal(self) -> Result<AccountDetails> {
        for (field, value) in [
            ("username", &self.username),
            ("password", &self.password),
            ("name", &self.name),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::InvalidInput(format!("{field} must not be empty")));
            }
        }
        if !self.email.contains('@') {
            return Err(StoreError::InvalidInput(format!(
                "'{}' is not an email address",
                self.email
            )));
        }

        Ok(AccountDetails {
            credential: utils::hash_credential(&self.password),
            username: self.username,
            contact: self.contact,
            address: self.address,
            name: self.name,
            email: self.email,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct User {
    #[n(0)]
    pub id: UserId,
    #[n(1)]
    pub account: AccountDetails,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub active: bool,
    #[n(4)]
    pub created_on: TimeStamp<Utc>,
    #[n(5)]
    pub is_deleted: bool,
    #[n(6)]
    pub deleted_on: Option<TimeStamp<Utc>>,
}

impl User {
    pub fn username(&self) -> &str {
        &self.account.username
    }
    pub fn email(&self) -> &str {
        &self.account.email
    }
    pub fn verify_credential(&self, plain: &str) -> bool {
        utils::verify_credential(&self.account.credential, plain)
    }
}

pub(crate) fn user_key(id: UserId) -> Vec<u8> {
    key(tables::USER, &[id.as_bytes()])
}

pub(crate) fn load_live_user(tx: &Tx<'_>, id: UserId) -> TxResult<User> {
    match tx.get::<User>(&user_key(id))? {
        Some(user) if !user.is_deleted => Ok(user),
        _ => abort(StoreError::not_found("user", id)),
    }
}

/// Inserts a user whose credential is already hashed. Username and email stay unique.
pub(crate) fn create_user_in(tx: &Tx<'_>, account: &AccountDetails, role: Role) -> TxResult<User> {
    let name_key = key(tables::USER_NAME, &[account.username.as_bytes()]);
    if tx.contains(&name_key)? {
        return abort(StoreError::DuplicateName(account.username.clone()));
    }
    let email_key = key(tables::USER_EMAIL, &[account.email.as_bytes()]);
    if tx.contains(&email_key)? {
        return abort(StoreError::DuplicateName(account.email.clone()));
    }

    let user = User {
        id: UserId::new(),
        account: account.clone(),
        role,
        active: true,
        created_on: TimeStamp::new(),
        is_deleted: false,
        deleted_on: None,
    };
    tx.put(&user_key(user.id), &user)?;
    tx.put(&name_key, &user.id)?;
    tx.put(&email_key, &user.id)?;
    Ok(user)
}

pub(crate) fn username_taken(tx: &Tx<'_>, username: &str) -> TxResult<bool> {
    tx.contains(&key(tables::USER_NAME, &[username.as_bytes()]))
}

#[derive(Clone)]
pub struct Users {
    store: Store,
}

impl Users {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn register(&self, profile: Profile, role: Role) -> Result<User> {
        let account = profile.seal()?;
        let user = self
            .store
            .transact(|tx| create_user_in(tx, &account, role))?;

        info!(user_id = %user.id, username = %user.username(), role = ?role, "user registered");
        Ok(user)
    }

    pub fn get(&self, id: UserId) -> Result<User> {
        match self.store.get::<User>(&user_key(id))? {
            Some(user) if !user.is_deleted => Ok(user),
            _ => Err(StoreError::not_found("user", id)),
        }
    }

    pub fn by_username(&self, username: &str) -> Result<User> {
        let id: UserId = self
            .store
            .get(&key(tables::USER_NAME, &[username.as_bytes()]))?
            .ok_or_else(|| StoreError::not_found("user", username))?;
        self.get(id)
    }

    /// The user behind `username` if `password` matches, otherwise `None`.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        match self.by_username(username) {
            Ok(user) if user.active && user.verify_credential(password) => Ok(Some(user)),
            Ok(_) | Err(StoreError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Soft delete. The username and email stay reserved.
    pub fn delete(&self, id: UserId) -> Result<User> {
        let user = self.store.transact(|tx| {
            let mut user = load_live_user(tx, id)?;
            user.is_deleted = true;
            user.active = false;
            user.deleted_on = Some(TimeStamp::new());
            tx.put(&user_key(id), &user)?;
            Ok(user)
        })?;

        info!(user_id = %id, "user deleted");
        Ok(user)
    }

    /// Active, non-deleted users with the customer role.
    pub fn customers(&self) -> Result<Vec<User>> {
        Ok(self
            .store
            .scan::<User>(tables::USER)?
            .into_iter()
            .filter(|u| u.role == Role::Customer && u.active && !u.is_deleted)
            .collect())
    }
}
