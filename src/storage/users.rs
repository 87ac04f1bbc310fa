use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{load, load_all, next_id, store, Database, DatabaseError};
use super::models::{SessionRecord, UserRecord};
use super::tables::*;

/// Input for a new account; the password must already be hashed.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub permissions: BTreeSet<String>,
}

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Create a user. Returns `None` when the username is taken.
    pub fn create_user(&self, new: NewUser) -> Result<Option<UserRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let user = {
            let mut usernames = write_txn.open_table(USERNAMES)?;
            if usernames.get(new.username.as_str())?.is_some() {
                return Ok(None);
            }

            let id = next_id(&write_txn, "users")?;
            let user = UserRecord {
                id,
                username: new.username,
                password_hash: new.password_hash,
                is_active: true,
                is_staff: new.is_staff || new.is_superuser,
                is_superuser: new.is_superuser,
                permissions: new.permissions,
                date_joined: Utc::now(),
                last_login: None,
            };

            let mut users = write_txn.open_table(USERS)?;
            store(&mut users, id, &user)?;
            usernames.insert(user.username.as_str(), id)?;
            user
        };
        write_txn.commit()?;

        tracing::debug!(user_id = user.id, username = %user.username, "Created user");
        Ok(Some(user))
    }

    pub fn get_user(&self, id: u64) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        load(&table, id)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let usernames = read_txn.open_table(USERNAMES)?;
        let id = match usernames.get(username)? {
            Some(id) => id.value(),
            None => return Ok(None),
        };

        let users = read_txn.open_table(USERS)?;
        load(&users, id)
    }

    /// All users ordered by username
    pub fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        let mut users: Vec<UserRecord> = load_all(&table)?;
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    /// Replace a user's permission set
    pub fn set_user_permissions(
        &self,
        id: u64,
        permissions: BTreeSet<String>,
    ) -> Result<Option<UserRecord>, DatabaseError> {
        self.modify_user(id, |user| user.permissions = permissions)
    }

    pub fn record_login(&self, id: u64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.modify_user(id, |user| user.last_login = Some(at))?;
        Ok(())
    }

    fn modify_user(
        &self,
        id: u64,
        change: impl FnOnce(&mut UserRecord),
    ) -> Result<Option<UserRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut users = write_txn.open_table(USERS)?;
            match load::<UserRecord, _>(&users, id)? {
                Some(mut user) => {
                    change(&mut user);
                    store(&mut users, id, &user)?;
                    Some(user)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    // ========================================================================
    // Session operations
    // ========================================================================

    pub fn put_session(&self, digest: &str, session: &SessionRecord) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            let data = rmp_serde::to_vec_named(session)?;
            table.insert(digest, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_session(&self, digest: &str) -> Result<Option<SessionRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        match table.get(digest)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn delete_session(&self, digest: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(SESSIONS)?;
            let removed = table.remove(digest)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(deleted)
    }
}
