//! JSON document shapes carried as packet bodies. Field names match
//! the wire contract clients already speak, which is not
//! `snake_case` throughout — each field is renamed individually
//! rather than forcing a blanket case convention.

use serde::{Deserialize, Serialize};

/// Business error codes returned in the `code` field of a reply body.
/// `0` always means success; every other value pairs with a `msg`.
pub mod error_codes {
    pub const OK: i32 = 0;
    pub const NOT_LOGGED_IN: i32 = 2;
    pub const USERNAME_ALREADY_EXISTS: i32 = 100;
    pub const REGISTER_FAILED: i32 = 101;
    pub const NOT_REGISTERED: i32 = 102;
    pub const INCORRECT_PASSWORD: i32 = 103;
    pub const UPDATE_USER_INFO_FAILED: i32 = 104;
    pub const MODIFY_PASSWORD_ERROR: i32 = 105;
    pub const CREATE_GROUP_ERROR: i32 = 106;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: i32,
    pub msg: String,
}

impl ErrorReply {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self { code, msg: msg.into() }
    }

    pub fn ok() -> Self {
        Self::new(error_codes::OK, "ok")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub clienttype: i32,
    pub status: i32,
}

/// Full profile returned on a successful login or profile update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub userid: i32,
    pub username: String,
    pub nickname: String,
    pub facetype: i32,
    pub customface: String,
    pub gender: i32,
    pub birthday: String,
    pub signature: String,
    pub address: String,
    pub phonenumber: String,
    pub mail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginReply {
    pub code: i32,
    pub msg: String,
    #[serde(flatten)]
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindUserRequest {
    #[serde(rename = "type")]
    pub kind: i32,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundUser {
    pub userid: i32,
    pub username: String,
    pub nickname: String,
    pub facetype: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindUserReply {
    pub code: i32,
    pub msg: String,
    pub userinfo: Vec<FoundUser>,
}

/// `type` discriminates the operation: 1 add-request, 3 answer, 4
/// delete (friend, or group leave when `userid` names a group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperateFriendRequest {
    #[serde(rename = "type")]
    pub kind: i32,
    pub userid: i32,
    pub accept: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendRequestNotice {
    pub userid: i32,
    #[serde(rename = "type")]
    pub kind: i32,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendAnswerSelfAck {
    pub userid: i32,
    #[serde(rename = "type")]
    pub kind: i32,
    pub username: String,
    pub accept: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusChangeRequest {
    #[serde(rename = "type")]
    pub kind: i32,
    pub onlinestatus: i32,
}

/// Presence broadcast. `kind` 1 = online (carries `clienttype`),
/// 2 = offline, 3 = info or group membership changed.
#[derive(Debug, Clone, Serialize)]
pub struct UserStatusChangeNotice {
    #[serde(rename = "type")]
    pub kind: i32,
    pub onlinestatus: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clienttype: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserInfoRequest {
    pub nickname: String,
    pub facetype: i32,
    pub customface: String,
    pub gender: i32,
    pub birthday: String,
    pub signature: String,
    pub address: String,
    pub phonenumber: String,
    pub mail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateUserInfoReply {
    pub code: i32,
    pub msg: String,
    #[serde(flatten)]
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyPasswordRequest {
    pub oldpassword: String,
    pub newpassword: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub groupname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateGroupReply {
    pub code: i32,
    pub msg: String,
    pub groupid: i32,
    pub groupname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGroupMembersRequest {
    pub groupid: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub userid: i32,
    pub username: String,
    pub nickname: String,
    pub facetype: i32,
    pub clienttype: i32,
    pub status: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetGroupMembersReply {
    pub code: i32,
    pub msg: String,
    pub groupid: i32,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendListMember {
    pub userid: i32,
    pub username: String,
    pub nickname: String,
    pub facetype: i32,
    pub customface: String,
    pub clienttype: i32,
    pub status: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendListTeam {
    pub teamindex: i32,
    pub teamname: String,
    pub members: Vec<FriendListMember>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendListReply {
    pub code: i32,
    pub msg: String,
    pub teams: Vec<FriendListTeam>,
}

/// Body of a `chat` packet. The `target` user or group id is not part
/// of the JSON body: it follows as a raw `i32` extra field in the
/// packet, per the wire layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBody {
    pub msg: String,
}

#[cfg(feature = "device-upload")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub info: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_reply_flattens_profile_fields_alongside_code() {
        let reply = LoginReply {
            code: 0,
            msg: "ok".into(),
            profile: UserProfile {
                userid: 1,
                username: "a".into(),
                nickname: "A".into(),
                facetype: 0,
                customface: String::new(),
                gender: 0,
                birthday: String::new(),
                signature: String::new(),
                address: String::new(),
                phonenumber: String::new(),
                mail: String::new(),
            },
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["userid"], 1);
        assert_eq!(json["username"], "a");
    }

    #[test]
    fn operate_friend_request_renames_type_field() {
        let req: OperateFriendRequest =
            serde_json::from_str(r#"{"type":3,"userid":42,"accept":1}"#).unwrap();
        assert_eq!(req.kind, 3);
        assert_eq!(req.userid, 42);
        assert_eq!(req.accept, Some(1));
    }
}
