//! Core-facing domain types. These are distinct from the wire DTOs in
//! `im_protocol::messages`: a `User` here carries the password hash
//! and is never serialised directly onto the wire.

pub type UserId = i32;
pub type ClientKind = i32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub password: String,
    pub nickname: String,
    pub face_type: i32,
    pub custom_face: String,
    pub gender: i32,
    pub birthday: String,
    pub signature: String,
    pub address: String,
    pub phone_number: String,
    pub mail: String,
}

impl User {
    pub fn to_profile(&self) -> im_protocol::messages::UserProfile {
        im_protocol::messages::UserProfile {
            userid: self.user_id,
            username: self.username.clone(),
            nickname: self.nickname.clone(),
            facetype: self.face_type,
            customface: self.custom_face.clone(),
            gender: self.gender,
            birthday: self.birthday.clone(),
            signature: self.signature.clone(),
            address: self.address.clone(),
            phonenumber: self.phone_number.clone(),
            mail: self.mail.clone(),
        }
    }
}

/// `operateFriend` request kind, positional per the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendOp {
    Request,
    Answer,
    Delete,
}

impl TryFrom<i32> for FriendOp {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(FriendOp::Request),
            3 => Ok(FriendOp::Answer),
            4 => Ok(FriendOp::Delete),
            _ => Err(()),
        }
    }
}

/// `userStatusChange`/presence notice kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Online = 1,
    Offline = 2,
    InfoChanged = 3,
}
