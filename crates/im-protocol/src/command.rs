//! Command codes carried in every packet header. Values are opaque
//! discriminators agreed with clients; core logic dispatches on the
//! enum, never the raw integer.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Command {
    Heartbeat = 1,
    Register = 2,
    Login = 3,
    KickUser = 4,
    GetFriendList = 5,
    FindUser = 6,
    OperateFriend = 7,
    UserStatusChange = 8,
    UpdateUserInfo = 9,
    ModifyPassword = 10,
    CreateGroup = 11,
    GetGroupMembers = 12,
    Chat = 13,
    MultiChat = 14,
    RemoteDesktop = 15,
    UpdateTeamInfo = 16,
    #[cfg(feature = "device-upload")]
    UploadDeviceInfo = 17,
}

impl Command {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Commands accepted from a session that has not yet logged in.
    pub fn allowed_before_login(self) -> bool {
        matches!(self, Command::Heartbeat | Command::Register | Command::Login)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised command code {0}")]
pub struct UnknownCommand(pub i32);

impl TryFrom<i32> for Command {
    type Error = UnknownCommand;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => Command::Heartbeat,
            2 => Command::Register,
            3 => Command::Login,
            4 => Command::KickUser,
            5 => Command::GetFriendList,
            6 => Command::FindUser,
            7 => Command::OperateFriend,
            8 => Command::UserStatusChange,
            9 => Command::UpdateUserInfo,
            10 => Command::ModifyPassword,
            11 => Command::CreateGroup,
            12 => Command::GetGroupMembers,
            13 => Command::Chat,
            14 => Command::MultiChat,
            15 => Command::RemoteDesktop,
            16 => Command::UpdateTeamInfo,
            #[cfg(feature = "device-upload")]
            17 => Command::UploadDeviceInfo,
            other => return Err(UnknownCommand(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_i32() {
        for cmd in [
            Command::Heartbeat,
            Command::Login,
            Command::Chat,
            Command::UpdateTeamInfo,
        ] {
            assert_eq!(Command::try_from(cmd.code()).unwrap(), cmd);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(Command::try_from(9999).is_err());
    }

    #[test]
    fn only_auth_bootstrap_commands_allowed_before_login() {
        assert!(Command::Heartbeat.allowed_before_login());
        assert!(Command::Register.allowed_before_login());
        assert!(Command::Login.allowed_before_login());
        assert!(!Command::Chat.allowed_before_login());
    }
}
