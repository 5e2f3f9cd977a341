//! Persistence contract the core consumes. `services/server` provides
//! the concrete implementation; `fakes::InMemoryUserStore` backs the
//! core's own test suite.

use async_trait::async_trait;

use crate::model::{User, UserId};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamInfoOp {
    Add,
    Delete,
}

/// Adds or removes `other` as a member of `owner`'s saved team
/// layout. A blank layout means the owner never called
/// `updateTeamInfo`, so there is nothing to mutate — `GetFriendList`
/// rebuilds a "My Friends" team straight from the friends table in
/// that case and will pick the new friendship up on its own. A
/// non-blank layout must be kept in sync here or the friend never
/// shows up in it, since `GetFriendList` only enriches members the
/// layout already lists, it never appends ones that are missing.
///
/// Returns `None` when there was nothing to change (blank or
/// unparsable layout); callers should leave the stored layout alone
/// in that case rather than writing back `None`'s absence as a value.
pub fn apply_team_info_op(raw_layout: &str, other: UserId, op: TeamInfoOp) -> Option<String> {
    if raw_layout.trim().is_empty() {
        return None;
    }
    let mut teams: serde_json::Value = serde_json::from_str(raw_layout).ok()?;
    let teams_arr = teams.as_array_mut()?;

    match op {
        TeamInfoOp::Add => {
            let already_present = teams_arr.iter().any(|team| {
                team.get("members")
                    .and_then(|m| m.as_array())
                    .is_some_and(|members| {
                        members
                            .iter()
                            .any(|m| m.get("userid").and_then(serde_json::Value::as_i64) == Some(i64::from(other)))
                    })
            });
            if !already_present {
                if let Some(members) = teams_arr
                    .first_mut()
                    .and_then(|team| team.get_mut("members"))
                    .and_then(|m| m.as_array_mut())
                {
                    members.push(serde_json::json!({
                        "userid": other,
                        "username": "",
                        "nickname": "",
                        "facetype": 0,
                        "customface": "",
                        "clienttype": 0,
                        "status": 0,
                    }));
                }
            }
        }
        TeamInfoOp::Delete => {
            for team in teams_arr.iter_mut() {
                if let Some(members) = team.get_mut("members").and_then(|m| m.as_array_mut()) {
                    members.retain(|m| m.get("userid").and_then(serde_json::Value::as_i64) != Some(i64::from(other)));
                }
            }
        }
    }

    serde_json::to_string(&teams).ok()
}

pub enum RegisterOutcome {
    Created(User),
    AlreadyExists,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError>;
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn get_friends_of(&self, id: UserId) -> Result<Vec<User>, StoreError>;
    /// Raw team-layout JSON as the client last saved it via
    /// `updateTeamInfo`. Empty string means no custom layout yet.
    async fn get_team_layout_of(&self, id: UserId) -> Result<String, StoreError>;
    async fn make_friend_relationship(&self, a: UserId, b: UserId) -> Result<(), StoreError>;
    async fn release_friend_relationship(&self, a: UserId, b: UserId) -> Result<(), StoreError>;
    async fn update_user_team_info(
        &self,
        owner: UserId,
        other: UserId,
        op: TeamInfoOp,
    ) -> Result<(), StoreError>;
    async fn update_user_team_info_raw(&self, owner: UserId, raw_json: &str) -> Result<(), StoreError>;
    async fn update_user_profile(&self, id: UserId, profile: &User) -> Result<(), StoreError>;
    async fn modify_user_password(&self, id: UserId, new_password: &str) -> Result<(), StoreError>;
    async fn add_group(&self, name: &str, owner_id: UserId) -> Result<UserId, StoreError>;
    async fn save_chat_msg(&self, from_id: UserId, to_id: UserId, body_json: &str) -> Result<(), StoreError>;
    async fn register_user(&self, username: &str, password: &str) -> Result<RegisterOutcome, StoreError>;
    async fn members_of(&self, group_id: UserId) -> Result<Vec<User>, StoreError>;

    #[cfg(feature = "device-upload")]
    async fn insert_device_info(
        &self,
        user_id: UserId,
        device_id: i32,
        class_type: i32,
        upload_time: i64,
        info: &serde_json::Value,
    ) -> Result<(), StoreError>;
}
