use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::{User, UserId};
use crate::user_store::{apply_team_info_op, RegisterOutcome, TeamInfoOp, UserStore};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    by_name: HashMap<String, UserId>,
    friends: HashMap<UserId, HashSet<UserId>>,
    team_layout: HashMap<UserId, String>,
    next_id: i32,
    chat_log: Vec<(UserId, UserId, String)>,
}

/// An in-memory `UserStore` for unit tests: no I/O, fully
/// deterministic, seeded via [`InMemoryUserStore::seed_user`].
pub struct InMemoryUserStore {
    state: Mutex<State>,
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self { state: Mutex::new(State { next_id: 1000, ..State::default() }) }
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_user(&self, user: User) {
        let mut state = self.state.lock().await;
        state.by_name.insert(user.username.clone(), user.user_id);
        state.users.insert(user.user_id, user);
    }

    pub async fn seed_friendship(&self, a: UserId, b: UserId) {
        let mut state = self.state.lock().await;
        state.friends.entry(a).or_default().insert(b);
        state.friends.entry(b).or_default().insert(a);
    }

    pub async fn chat_log(&self) -> Vec<(UserId, UserId, String)> {
        self.state.lock().await.chat_log.clone()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.by_name.get(name).and_then(|id| state.users.get(id)).cloned())
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_friends_of(&self, id: UserId) -> Result<Vec<User>, StoreError> {
        let state = self.state.lock().await;
        let ids = state.friends.get(&id).cloned().unwrap_or_default();
        Ok(ids.into_iter().filter_map(|fid| state.users.get(&fid).cloned()).collect())
    }

    async fn get_team_layout_of(&self, id: UserId) -> Result<String, StoreError> {
        Ok(self.state.lock().await.team_layout.get(&id).cloned().unwrap_or_default())
    }

    async fn make_friend_relationship(&self, a: UserId, b: UserId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.friends.entry(a).or_default().insert(b);
        state.friends.entry(b).or_default().insert(a);
        Ok(())
    }

    async fn release_friend_relationship(&self, a: UserId, b: UserId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.friends.entry(a).or_default().remove(&b);
        state.friends.entry(b).or_default().remove(&a);
        Ok(())
    }

    async fn update_user_team_info(&self, owner: UserId, other: UserId, op: TeamInfoOp) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let raw = state.team_layout.get(&owner).cloned().unwrap_or_default();
        if let Some(updated) = apply_team_info_op(&raw, other, op) {
            state.team_layout.insert(owner, updated);
        }
        Ok(())
    }

    async fn update_user_team_info_raw(&self, owner: UserId, raw_json: &str) -> Result<(), StoreError> {
        self.state.lock().await.team_layout.insert(owner, raw_json.to_owned());
        Ok(())
    }

    async fn update_user_profile(&self, id: UserId, profile: &User) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.users.insert(id, profile.clone());
        Ok(())
    }

    async fn modify_user_password(&self, id: UserId, new_password: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.get_mut(&id) {
            user.password = new_password.to_owned();
        }
        Ok(())
    }

    async fn add_group(&self, name: &str, owner_id: UserId) -> Result<UserId, StoreError> {
        let mut state = self.state.lock().await;
        let group_id = state.next_id;
        state.next_id += 1;
        state.by_name.insert(name.to_owned(), group_id);
        state.users.insert(
            group_id,
            User {
                user_id: group_id,
                username: name.to_owned(),
                password: String::new(),
                nickname: name.to_owned(),
                face_type: 0,
                custom_face: String::new(),
                gender: 0,
                birthday: String::new(),
                signature: String::new(),
                address: String::new(),
                phone_number: String::new(),
                mail: String::new(),
            },
        );
        let _ = owner_id;
        Ok(group_id)
    }

    async fn save_chat_msg(&self, from_id: UserId, to_id: UserId, body_json: &str) -> Result<(), StoreError> {
        self.state.lock().await.chat_log.push((from_id, to_id, body_json.to_owned()));
        Ok(())
    }

    async fn register_user(&self, username: &str, password: &str) -> Result<RegisterOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if state.by_name.contains_key(username) {
            return Ok(RegisterOutcome::AlreadyExists);
        }
        let user_id = state.next_id;
        state.next_id += 1;
        let user = User {
            user_id,
            username: username.to_owned(),
            password: password.to_owned(),
            nickname: username.to_owned(),
            face_type: 0,
            custom_face: String::new(),
            gender: 0,
            birthday: String::new(),
            signature: String::new(),
            address: String::new(),
            phone_number: String::new(),
            mail: String::new(),
        };
        state.by_name.insert(username.to_owned(), user_id);
        state.users.insert(user_id, user.clone());
        Ok(RegisterOutcome::Created(user))
    }

    async fn members_of(&self, group_id: UserId) -> Result<Vec<User>, StoreError> {
        self.get_friends_of(group_id).await
    }
}
