//! SQLite-backed [`UserStore`]: a single [`rusqlite::Connection`]
//! behind a pragma/schema bootstrap, held behind a
//! `tokio::sync::Mutex` so every store method can be `async` without
//! hand-rolling a blocking-pool handoff.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use im_core::error::StoreError;
use im_core::model::{User, UserId};
use im_core::user_store::{apply_team_info_op, RegisterOutcome, TeamInfoOp, UserStore};
use rusqlite::{Connection, OptionalExtension, Row};
use thiserror::Error;
use tokio::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.apply_pragmas()?;
        db.apply_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.apply_pragmas()?;
        db.apply_schema()?;
        Ok(db)
    }

    pub fn integrity_check(&self) -> DbResult<()> {
        let result: String = self
            .conn
            .pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(DbError::IntegrityCheckFailed(result));
        }
        Ok(())
    }

    fn apply_pragmas(&self) -> DbResult<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }

    fn apply_schema(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn user_from_row(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            user_id: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
            nickname: row.get(3)?,
            face_type: row.get(4)?,
            custom_face: row.get(5)?,
            gender: row.get(6)?,
            birthday: row.get(7)?,
            signature: row.get(8)?,
            address: row.get(9)?,
            phone_number: row.get(10)?,
            mail: row.get(11)?,
        })
    }

    const USER_COLUMNS: &'static str = "user_id, username, password, nickname, face_type, \
         custom_face, gender, birthday, signature, address, phone_number, mail";

    fn get_user_by_name(&self, name: &str) -> DbResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE username = ?1", Self::USER_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [name], Self::user_from_row)
            .optional()?)
    }

    fn get_user_by_id(&self, id: UserId) -> DbResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE user_id = ?1", Self::USER_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [id], Self::user_from_row)
            .optional()?)
    }

    fn get_friends_of(&self, id: UserId) -> DbResult<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE user_id IN (SELECT friend_id FROM friendships WHERE user_id = ?1)",
            Self::USER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([id], Self::user_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get_team_layout_of(&self, id: UserId) -> DbResult<String> {
        Ok(self
            .conn
            .query_row("SELECT team_layout FROM users WHERE user_id = ?1", [id], |r| r.get(0))
            .optional()?
            .unwrap_or_default())
    }

    fn make_friend_relationship(&self, a: UserId, b: UserId) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO friendships (user_id, friend_id) VALUES (?1, ?2)",
            rusqlite::params![a, b],
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO friendships (user_id, friend_id) VALUES (?1, ?2)",
            rusqlite::params![b, a],
        )?;
        Ok(())
    }

    fn release_friend_relationship(&self, a: UserId, b: UserId) -> DbResult<()> {
        self.conn.execute(
            "DELETE FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
            rusqlite::params![a, b],
        )?;
        self.conn.execute(
            "DELETE FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
            rusqlite::params![b, a],
        )?;
        Ok(())
    }

    fn update_user_team_info_raw(&self, owner: UserId, raw_json: &str) -> DbResult<()> {
        self.conn.execute(
            "UPDATE users SET team_layout = ?1 WHERE user_id = ?2",
            rusqlite::params![raw_json, owner],
        )?;
        Ok(())
    }

    fn update_user_team_info(&self, owner: UserId, other: UserId, op: TeamInfoOp) -> DbResult<()> {
        let raw = self.get_team_layout_of(owner)?;
        match apply_team_info_op(&raw, other, op) {
            Some(updated) => self.update_user_team_info_raw(owner, &updated),
            None => Ok(()),
        }
    }

    fn update_user_profile(&self, id: UserId, profile: &User) -> DbResult<()> {
        self.conn.execute(
            "UPDATE users SET nickname = ?1, face_type = ?2, custom_face = ?3, gender = ?4, \
             birthday = ?5, signature = ?6, address = ?7, phone_number = ?8, mail = ?9 \
             WHERE user_id = ?10",
            rusqlite::params![
                profile.nickname,
                profile.face_type,
                profile.custom_face,
                profile.gender,
                profile.birthday,
                profile.signature,
                profile.address,
                profile.phone_number,
                profile.mail,
                id,
            ],
        )?;
        Ok(())
    }

    fn modify_user_password(&self, id: UserId, new_password: &str) -> DbResult<()> {
        self.conn.execute(
            "UPDATE users SET password = ?1 WHERE user_id = ?2",
            rusqlite::params![new_password, id],
        )?;
        Ok(())
    }

    fn allocate_user_id(&self, group_id_boundary: i32) -> DbResult<UserId> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(user_id) + 1, 1) FROM users WHERE user_id < ?1",
            [group_id_boundary],
            |r| r.get(0),
        )?;
        Ok(next as i32)
    }

    fn allocate_group_id(&self, group_id_boundary: i32) -> DbResult<UserId> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(user_id) + 1, ?1) FROM users WHERE user_id >= ?1",
            [group_id_boundary],
            |r| r.get(0),
        )?;
        Ok(next as i32)
    }

    fn add_group(&self, name: &str, group_id_boundary: i32) -> DbResult<UserId> {
        let group_id = self.allocate_group_id(group_id_boundary)?;
        self.conn.execute(
            "INSERT INTO users (user_id, username, password, nickname, is_group) \
             VALUES (?1, ?2, '', ?2, 1)",
            rusqlite::params![group_id, name],
        )?;
        Ok(group_id)
    }

    fn save_chat_msg(&self, from_id: UserId, to_id: UserId, body_json: &str) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO chat_log (from_id, to_id, body) VALUES (?1, ?2, ?3)",
            rusqlite::params![from_id, to_id, body_json],
        )?;
        Ok(())
    }

    fn register_user(&self, username: &str, password: &str, group_id_boundary: i32) -> DbResult<RegisterOutcome> {
        if self.get_user_by_name(username)?.is_some() {
            return Ok(RegisterOutcome::AlreadyExists);
        }
        let user_id = self.allocate_user_id(group_id_boundary)?;
        self.conn.execute(
            "INSERT INTO users (user_id, username, password, nickname) VALUES (?1, ?2, ?3, ?2)",
            rusqlite::params![user_id, username, password],
        )?;
        let user = self
            .get_user_by_id(user_id)?
            .expect("row was just inserted in this connection");
        Ok(RegisterOutcome::Created(user))
    }

    #[cfg(feature = "device-upload")]
    fn insert_device_info(
        &self,
        user_id: UserId,
        device_id: i32,
        class_type: i32,
        upload_time: i64,
        info: &serde_json::Value,
    ) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO device_info (user_id, device_id, class_type, upload_time, info) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![user_id, device_id, class_type, upload_time, info.to_string()],
        )?;
        Ok(())
    }
}

/// Cloneable `UserStore` handle; every method locks the shared
/// connection for the duration of one statement or transaction.
#[derive(Clone)]
pub struct SqliteUserStore {
    db: Arc<Mutex<Db>>,
    group_id_boundary: i32,
}

impl SqliteUserStore {
    pub fn new(db: Db, group_id_boundary: i32) -> Self {
        Self { db: Arc::new(Mutex::new(db)), group_id_boundary }
    }

    fn map_err(err: DbError) -> StoreError {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        self.db.lock().await.get_user_by_name(name).map_err(Self::map_err)
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.db.lock().await.get_user_by_id(id).map_err(Self::map_err)
    }

    async fn get_friends_of(&self, id: UserId) -> Result<Vec<User>, StoreError> {
        self.db.lock().await.get_friends_of(id).map_err(Self::map_err)
    }

    async fn get_team_layout_of(&self, id: UserId) -> Result<String, StoreError> {
        self.db.lock().await.get_team_layout_of(id).map_err(Self::map_err)
    }

    async fn make_friend_relationship(&self, a: UserId, b: UserId) -> Result<(), StoreError> {
        self.db.lock().await.make_friend_relationship(a, b).map_err(Self::map_err)
    }

    async fn release_friend_relationship(&self, a: UserId, b: UserId) -> Result<(), StoreError> {
        self.db.lock().await.release_friend_relationship(a, b).map_err(Self::map_err)
    }

    async fn update_user_team_info(&self, owner: UserId, other: UserId, op: TeamInfoOp) -> Result<(), StoreError> {
        self.db.lock().await.update_user_team_info(owner, other, op).map_err(Self::map_err)
    }

    async fn update_user_team_info_raw(&self, owner: UserId, raw_json: &str) -> Result<(), StoreError> {
        self.db.lock().await.update_user_team_info_raw(owner, raw_json).map_err(Self::map_err)
    }

    async fn update_user_profile(&self, id: UserId, profile: &User) -> Result<(), StoreError> {
        self.db.lock().await.update_user_profile(id, profile).map_err(Self::map_err)
    }

    async fn modify_user_password(&self, id: UserId, new_password: &str) -> Result<(), StoreError> {
        self.db.lock().await.modify_user_password(id, new_password).map_err(Self::map_err)
    }

    async fn add_group(&self, name: &str, _owner_id: UserId) -> Result<UserId, StoreError> {
        self.db.lock().await.add_group(name, self.group_id_boundary).map_err(Self::map_err)
    }

    async fn save_chat_msg(&self, from_id: UserId, to_id: UserId, body_json: &str) -> Result<(), StoreError> {
        self.db.lock().await.save_chat_msg(from_id, to_id, body_json).map_err(Self::map_err)
    }

    async fn register_user(&self, username: &str, password: &str) -> Result<RegisterOutcome, StoreError> {
        self.db
            .lock()
            .await
            .register_user(username, password, self.group_id_boundary)
            .map_err(Self::map_err)
    }

    async fn members_of(&self, group_id: UserId) -> Result<Vec<User>, StoreError> {
        self.db.lock().await.get_friends_of(group_id).map_err(Self::map_err)
    }

    #[cfg(feature = "device-upload")]
    async fn insert_device_info(
        &self,
        user_id: UserId,
        device_id: i32,
        class_type: i32,
        upload_time: i64,
        info: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.db
            .lock()
            .await
            .insert_device_info(user_id, device_id, class_type, upload_time, info)
            .map_err(Self::map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteUserStore {
        SqliteUserStore::new(Db::open_in_memory().unwrap(), im_protocol::GROUP_ID_BOUNDARY)
    }

    #[tokio::test]
    async fn register_then_lookup_round_trips_the_user() {
        let s = store();
        let outcome = s.register_user("alice", "secret").await.unwrap();
        let RegisterOutcome::Created(user) = outcome else { panic!("expected Created") };
        assert_eq!(user.username, "alice");
        let fetched = s.get_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(fetched.user_id, user.user_id);
    }

    #[tokio::test]
    async fn duplicate_register_reports_already_exists() {
        let s = store();
        s.register_user("bob", "pw").await.unwrap();
        let outcome = s.register_user("bob", "pw2").await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::AlreadyExists));
    }

    #[tokio::test]
    async fn friend_relationship_is_symmetric() {
        let s = store();
        let a = match s.register_user("a", "pw").await.unwrap() {
            RegisterOutcome::Created(u) => u.user_id,
            RegisterOutcome::AlreadyExists => unreachable!(),
        };
        let b = match s.register_user("b", "pw").await.unwrap() {
            RegisterOutcome::Created(u) => u.user_id,
            RegisterOutcome::AlreadyExists => unreachable!(),
        };
        s.make_friend_relationship(a, b).await.unwrap();
        assert_eq!(s.get_friends_of(a).await.unwrap().len(), 1);
        assert_eq!(s.get_friends_of(b).await.unwrap().len(), 1);
        s.release_friend_relationship(a, b).await.unwrap();
        assert!(s.get_friends_of(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adding_a_friend_appends_to_an_existing_custom_team_layout() {
        let s = store();
        let a = match s.register_user("carol", "pw").await.unwrap() {
            RegisterOutcome::Created(u) => u.user_id,
            RegisterOutcome::AlreadyExists => unreachable!(),
        };
        let b = match s.register_user("dave", "pw").await.unwrap() {
            RegisterOutcome::Created(u) => u.user_id,
            RegisterOutcome::AlreadyExists => unreachable!(),
        };
        s.update_user_team_info_raw(
            a,
            r#"[{"teamindex": 0, "teamname": "My Friends", "members": []}]"#,
        )
        .await
        .unwrap();

        s.update_user_team_info(a, b, TeamInfoOp::Add).await.unwrap();
        let layout: serde_json::Value = serde_json::from_str(&s.get_team_layout_of(a).await.unwrap()).unwrap();
        let members = layout[0]["members"].as_array().unwrap();
        assert!(members.iter().any(|m| m["userid"] == b));

        s.update_user_team_info(a, b, TeamInfoOp::Delete).await.unwrap();
        let layout: serde_json::Value = serde_json::from_str(&s.get_team_layout_of(a).await.unwrap()).unwrap();
        assert!(layout[0]["members"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_user_team_info_is_a_no_op_without_a_saved_layout() {
        let s = store();
        let a = match s.register_user("erin", "pw").await.unwrap() {
            RegisterOutcome::Created(u) => u.user_id,
            RegisterOutcome::AlreadyExists => unreachable!(),
        };
        s.update_user_team_info(a, 9999, TeamInfoOp::Add).await.unwrap();
        assert_eq!(s.get_team_layout_of(a).await.unwrap(), "");
    }

    #[tokio::test]
    async fn group_ids_are_allocated_at_or_above_the_boundary() {
        let s = store();
        let group_id = s.add_group("team", 1).await.unwrap();
        assert!(group_id >= im_protocol::GROUP_ID_BOUNDARY);
    }

    #[tokio::test]
    async fn integrity_check_passes_on_a_fresh_database() {
        let db = Db::open_in_memory().unwrap();
        db.integrity_check().unwrap();
    }
}
