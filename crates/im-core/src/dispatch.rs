//! Command dispatch table. Each handler receives the calling
//! session's mutable state plus the decoded packet and returns the
//! frames that should be written directly to that session, in order.
//! Side effects reaching other users go through [`FanoutEngine`] and
//! [`OfflineBuffer`] as they happen, not through the return value.

use bytes::Bytes;
use im_protocol::messages::{
    error_codes, ChatBody, CreateGroupReply, CreateGroupRequest, ErrorReply, FindUserReply,
    FindUserRequest, FoundUser, FriendAnswerSelfAck, FriendListMember, FriendListReply,
    FriendListTeam, FriendRequestNotice, GetGroupMembersReply, GetGroupMembersRequest,
    GroupMember, LoginReply, LoginRequest, ModifyPasswordRequest, OperateFriendRequest,
    RegisterRequest, UpdateUserInfoReply, UpdateUserInfoRequest, UserStatusChangeNotice,
    UserStatusChangeRequest,
};
use im_protocol::{Command, Packet, PayloadReader};
use serde::Serialize;

use crate::error::CoreResult;
use crate::fanout::FanoutEngine;
use crate::model::{FriendOp, PresenceKind, User, UserId};
use crate::offline::OfflineBuffer;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::user_store::{RegisterOutcome, TeamInfoOp, UserStore};

pub struct Dispatcher<S: UserStore> {
    registry: SessionRegistry,
    offline: OfflineBuffer,
    fanout: FanoutEngine,
    user_store: S,
}

impl<S: UserStore> Dispatcher<S> {
    pub fn new(registry: SessionRegistry, offline: OfflineBuffer, fanout: FanoutEngine, user_store: S) -> Self {
        Self { registry, offline, fanout, user_store }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn offline(&self) -> &OfflineBuffer {
        &self.offline
    }

    /// Entry point the connection task calls for every decoded
    /// packet. Returns the frames to write to the calling session, in
    /// order. The session's own sequence counter always advances by
    /// one after dispatch, independent of whether this packet
    /// produced a reply.
    pub async fn dispatch(&self, session: &mut Session, packet: Packet) -> CoreResult<Vec<Bytes>> {
        if !packet.cmd.allowed_before_login() && !session.is_logged_in() {
            let reply = error_frame(packet.cmd, packet.seq, &ErrorReply::new(
                error_codes::NOT_LOGGED_IN,
                "not login, please login first!",
            ))?;
            session.next_seq();
            return Ok(vec![reply]);
        }

        let out = match packet.cmd {
            Command::Heartbeat => vec![ok_frame(Command::Heartbeat, packet.seq, &ErrorReply::ok())?],
            Command::Register => vec![self.handle_register(&packet).await?],
            Command::Login => self.handle_login(session, &packet).await?,
            Command::GetFriendList => vec![self.handle_get_friend_list(session.user_id, packet.seq).await?],
            Command::FindUser => vec![self.handle_find_user(&packet).await?],
            Command::OperateFriend => self.handle_operate_friend(session, &packet).await?,
            Command::UserStatusChange => self.handle_user_status_change(session, &packet).await?,
            Command::UpdateUserInfo => self.handle_update_user_info(session, &packet).await?,
            Command::ModifyPassword => vec![self.handle_modify_password(session, &packet).await?],
            Command::CreateGroup => self.handle_create_group(session, &packet).await?,
            Command::GetGroupMembers => vec![self.handle_get_group_members(&packet).await?],
            Command::Chat => {
                self.handle_chat(session, &packet).await?;
                vec![]
            }
            Command::MultiChat => {
                self.handle_multi_chat(session, &packet).await?;
                vec![]
            }
            Command::RemoteDesktop => {
                self.handle_remote_desktop(&packet).await?;
                vec![]
            }
            Command::UpdateTeamInfo => vec![self.handle_update_team_info(session, &packet).await?],
            Command::KickUser => vec![],
            #[cfg(feature = "device-upload")]
            Command::UploadDeviceInfo => {
                self.handle_upload_device_info(session, &packet).await?;
                vec![]
            }
        };

        session.next_seq();
        Ok(out)
    }

    async fn handle_register(&self, packet: &Packet) -> CoreResult<Bytes> {
        let req: RegisterRequest = serde_json::from_slice(&packet.body)?;
        let reply = match self.user_store.register_user(&req.username, &req.password).await {
            Ok(RegisterOutcome::Created(_)) => ErrorReply::ok(),
            Ok(RegisterOutcome::AlreadyExists) => {
                ErrorReply::new(error_codes::USERNAME_ALREADY_EXISTS, "username already exists")
            }
            Err(err) => {
                tracing::error!(error = %err, username = %req.username, "register failed");
                ErrorReply::new(error_codes::REGISTER_FAILED, "register failed")
            }
        };
        ok_frame(Command::Register, packet.seq, &reply)
    }

    async fn handle_login(&self, session: &mut Session, packet: &Packet) -> CoreResult<Vec<Bytes>> {
        let req: LoginRequest = serde_json::from_slice(&packet.body)?;

        let Some(user) = self.user_store.get_user_by_name(&req.username).await? else {
            return Ok(vec![error_frame(
                Command::Login,
                packet.seq,
                &ErrorReply::new(error_codes::NOT_REGISTERED, "not registered"),
            )?]);
        };
        if user.password != req.password {
            return Ok(vec![error_frame(
                Command::Login,
                packet.seq,
                &ErrorReply::new(error_codes::INCORRECT_PASSWORD, "incorrect password"),
            )?]);
        }

        // The insert-then-drain pair below must run as one unit
        // against a concurrent sender's check-then-buffer in
        // `FanoutEngine::deliver_or_buffer`, or a message can land in
        // the gap between the two and sit stranded until the next
        // login even though the user is already back online.
        let user_guard = self.registry.lock_user(user.user_id).await;

        // Steps 4-5: evict any existing (user, clientType) session,
        // become the session of record, and enter the Auth state.
        self.registry.insert(user.user_id, req.clienttype, req.status, session.handle()).await;
        session.complete_login(user.user_id, req.clienttype, req.status);

        // Step 6: the login reply is written before any offline drain.
        let reply = LoginReply { code: error_codes::OK, msg: "ok".into(), profile: user.to_profile() };
        let mut out = vec![ok_frame(Command::Login, packet.seq, &reply)?];

        // Step 7: drain notify then chat.
        out.extend(self.offline.drain(user.user_id).await);
        drop(user_guard);

        // Step 8: tell friends this user is now online.
        let friends = self.user_store.get_friends_of(user.user_id).await?;
        let notice = UserStatusChangeNotice {
            kind: PresenceKind::Online as i32,
            onlinestatus: req.status,
            clienttype: Some(req.clienttype),
        };
        let push = presence_frame(session, user.user_id, &notice)?;
        self.fanout.presence_broadcast(&friends, push).await;

        Ok(out)
    }

    async fn handle_get_friend_list(&self, user_id: UserId, seq: i32) -> CoreResult<Bytes> {
        let reply = self.build_friend_list_reply(user_id).await?;
        ok_frame(Command::GetFriendList, seq, &reply)
    }

    async fn build_friend_list_reply(&self, user_id: UserId) -> CoreResult<FriendListReply> {
        let friends = self.user_store.get_friends_of(user_id).await?;
        let raw_layout = self.user_store.get_team_layout_of(user_id).await?;

        let teams = if raw_layout.trim().is_empty() {
            let mut members = Vec::with_capacity(friends.len());
            for friend in &friends {
                members.push(self.friend_list_member(friend).await);
            }
            vec![FriendListTeam { teamindex: 0, teamname: "My Friends".into(), members }]
        } else {
            let mut parsed: Vec<FriendListTeam> = serde_json::from_str(&raw_layout)?;
            for team in &mut parsed {
                for member in &mut team.members {
                    if let Some(user) = friends.iter().find(|f| f.user_id == member.userid) {
                        self.fill_friend_list_member(member, user).await;
                    }
                }
            }
            parsed
        };

        Ok(FriendListReply { code: error_codes::OK, msg: "ok".into(), teams })
    }

    async fn friend_list_member(&self, user: &User) -> FriendListMember {
        let mut member = FriendListMember {
            userid: user.user_id,
            username: user.username.clone(),
            nickname: user.nickname.clone(),
            facetype: user.face_type,
            customface: user.custom_face.clone(),
            clienttype: 0,
            status: 0,
        };
        self.fill_friend_list_member(&mut member, user).await;
        member
    }

    async fn fill_friend_list_member(&self, member: &mut FriendListMember, user: &User) {
        member.username = user.username.clone();
        member.nickname = user.nickname.clone();
        member.facetype = user.face_type;
        member.customface = user.custom_face.clone();
        if let Some(presence) = self.registry.presence_of(user.user_id).await {
            member.status = presence.status;
            member.clienttype = presence.client_kind;
        } else {
            member.status = 0;
            member.clienttype = 0;
        }
    }

    async fn handle_find_user(&self, packet: &Packet) -> CoreResult<Bytes> {
        let req: FindUserRequest = serde_json::from_slice(&packet.body)?;
        let userinfo = match self.user_store.get_user_by_name(&req.username).await? {
            None => vec![],
            Some(user) => vec![FoundUser {
                userid: user.user_id,
                username: user.username,
                nickname: user.nickname,
                facetype: user.face_type,
            }],
        };
        let reply = FindUserReply { code: error_codes::OK, msg: "ok".into(), userinfo };
        ok_frame(Command::FindUser, packet.seq, &reply)
    }

    async fn handle_operate_friend(&self, session: &mut Session, packet: &Packet) -> CoreResult<Vec<Bytes>> {
        let req: OperateFriendRequest = serde_json::from_slice(&packet.body)?;
        let self_id = session.user_id;
        let target_id = req.userid;

        let Ok(op) = FriendOp::try_from(req.kind) else {
            tracing::warn!(kind = req.kind, "unrecognised operateFriend type");
            return Ok(vec![]);
        };

        if self.fanout.is_group(target_id) {
            return self.handle_group_operation(session, op, target_id).await;
        }

        match op {
            FriendOp::Delete => {
                self.release_friend(self_id, target_id).await?;
            }
            FriendOp::Request => {
                let Some(requester) = self.user_store.get_user_by_id(self_id).await? else {
                    return Ok(vec![]);
                };
                let notice = FriendRequestNotice { userid: self_id, kind: 1, username: requester.username };
                let frame = encode_json(Command::OperateFriend, session.next_seq(), &notice)?;
                self.fanout.deliver_or_buffer(crate::offline::Queue::Notify, target_id, frame).await;
            }
            FriendOp::Answer => {
                let Some(accept) = req.accept else { return Ok(vec![]) };
                if accept == 1 {
                    if let Err(err) = self.make_friendship(self_id, target_id).await {
                        tracing::error!(error = %err, self_id, target_id, "friend answer failed, leaving client without a reply");
                        return Ok(vec![]);
                    }
                }
                let Some(target) = self.user_store.get_user_by_id(target_id).await? else {
                    return Ok(vec![]);
                };
                let self_ack = FriendAnswerSelfAck {
                    userid: target_id,
                    kind: 3,
                    username: target.username.clone(),
                    accept,
                };
                let ack_frame = ok_frame(Command::OperateFriend, packet.seq, &self_ack)?;

                let Some(requester) = self.user_store.get_user_by_id(self_id).await? else {
                    return Ok(vec![ack_frame]);
                };
                let notice = FriendAnswerSelfAck {
                    userid: self_id,
                    kind: 3,
                    username: requester.username,
                    accept,
                };
                let notice_frame = encode_json(Command::OperateFriend, session.next_seq(), &notice)?;
                self.fanout.deliver_or_buffer(crate::offline::Queue::Notify, target_id, notice_frame).await;

                return Ok(vec![ack_frame]);
            }
        }
        Ok(vec![])
    }

    async fn handle_group_operation(
        &self,
        session: &mut Session,
        op: FriendOp,
        group_id: UserId,
    ) -> CoreResult<Vec<Bytes>> {
        let self_id = session.user_id;
        match op {
            FriendOp::Delete => {
                self.release_friend(self_id, group_id).await?;
                let notice = UserStatusChangeNotice {
                    kind: PresenceKind::InfoChanged as i32,
                    onlinestatus: 0,
                    clienttype: None,
                };
                let members = self.user_store.get_friends_of(group_id).await?;
                let frame = presence_frame(session, group_id, &notice)?;
                self.fanout.presence_broadcast(&members, frame).await;
                Ok(vec![])
            }
            _ => self.handle_join_group(session, group_id).await,
        }
    }

    async fn handle_join_group(&self, session: &mut Session, group_id: UserId) -> CoreResult<Vec<Bytes>> {
        self.make_friendship(session.user_id, group_id).await?;
        let Some(group) = self.user_store.get_user_by_id(group_id).await? else {
            return Ok(vec![]);
        };
        let self_ack = FriendAnswerSelfAck {
            userid: group_id,
            kind: 3,
            username: group.username,
            accept: 3,
        };
        let ack_frame = encode_json(Command::OperateFriend, session.next_seq(), &self_ack)?;

        let members = self.user_store.get_friends_of(group_id).await?;
        let notice = UserStatusChangeNotice {
            kind: PresenceKind::InfoChanged as i32,
            onlinestatus: 0,
            clienttype: None,
        };
        let push = presence_frame(session, group_id, &notice)?;
        self.fanout.presence_broadcast(&members, push).await;

        Ok(vec![ack_frame])
    }

    async fn make_friendship(&self, a: UserId, b: UserId) -> CoreResult<()> {
        self.user_store.make_friend_relationship(a, b).await?;
        self.user_store.update_user_team_info(a, b, TeamInfoOp::Add).await?;
        self.user_store.update_user_team_info(b, a, TeamInfoOp::Add).await?;
        Ok(())
    }

    async fn release_friend(&self, a: UserId, b: UserId) -> CoreResult<()> {
        self.user_store.release_friend_relationship(a, b).await?;
        self.user_store.update_user_team_info(a, b, TeamInfoOp::Delete).await?;
        self.user_store.update_user_team_info(b, a, TeamInfoOp::Delete).await?;
        Ok(())
    }

    async fn handle_user_status_change(&self, session: &mut Session, packet: &Packet) -> CoreResult<Vec<Bytes>> {
        let req: UserStatusChangeRequest = serde_json::from_slice(&packet.body)?;
        if req.onlinestatus == session.status {
            return Ok(vec![]);
        }
        session.status = req.onlinestatus;
        self.registry.set_status(session.user_id, req.onlinestatus).await;

        let friends = self.user_store.get_friends_of(session.user_id).await?;
        let notice = UserStatusChangeNotice {
            kind: PresenceKind::Online as i32,
            onlinestatus: req.onlinestatus,
            clienttype: Some(session.client_kind),
        };
        let frame = presence_frame(session, session.user_id, &notice)?;
        self.fanout.presence_broadcast(&friends, frame).await;
        Ok(vec![])
    }

    async fn handle_update_user_info(&self, session: &mut Session, packet: &Packet) -> CoreResult<Vec<Bytes>> {
        let req: UpdateUserInfoRequest = serde_json::from_slice(&packet.body)?;
        let Some(mut user) = self.user_store.get_user_by_id(session.user_id).await? else {
            return Ok(vec![error_frame(
                Command::UpdateUserInfo,
                packet.seq,
                &ErrorReply::new(error_codes::UPDATE_USER_INFO_FAILED, "update user info failed"),
            )?]);
        };
        user.nickname = req.nickname;
        user.face_type = req.facetype;
        user.custom_face = req.customface;
        user.gender = req.gender;
        user.birthday = req.birthday;
        user.signature = req.signature;
        user.address = req.address;
        user.phone_number = req.phonenumber;
        user.mail = req.mail;

        if let Err(err) = self.user_store.update_user_profile(session.user_id, &user).await {
            tracing::error!(error = %err, user_id = session.user_id, "update user info failed");
            return Ok(vec![error_frame(
                Command::UpdateUserInfo,
                packet.seq,
                &ErrorReply::new(error_codes::UPDATE_USER_INFO_FAILED, "update user info failed"),
            )?]);
        }

        let reply = UpdateUserInfoReply { code: error_codes::OK, msg: "ok".into(), profile: user.to_profile() };
        let ack = ok_frame(Command::UpdateUserInfo, packet.seq, &reply)?;

        let friends = self.user_store.get_friends_of(session.user_id).await?;
        let notice = UserStatusChangeNotice {
            kind: PresenceKind::InfoChanged as i32,
            onlinestatus: 0,
            clienttype: None,
        };
        let push = presence_frame(session, session.user_id, &notice)?;
        self.fanout.presence_broadcast(&friends, push).await;

        Ok(vec![ack])
    }

    async fn handle_modify_password(&self, session: &mut Session, packet: &Packet) -> CoreResult<Bytes> {
        let req: ModifyPasswordRequest = serde_json::from_slice(&packet.body)?;
        let Some(user) = self.user_store.get_user_by_id(session.user_id).await? else {
            return error_frame(
                Command::ModifyPassword,
                packet.seq,
                &ErrorReply::new(error_codes::INCORRECT_PASSWORD, "incorrect old password"),
            );
        };
        if user.password != req.oldpassword {
            return error_frame(
                Command::ModifyPassword,
                packet.seq,
                &ErrorReply::new(error_codes::INCORRECT_PASSWORD, "incorrect old password"),
            );
        }
        if let Err(err) = self.user_store.modify_user_password(session.user_id, &req.newpassword).await {
            tracing::error!(error = %err, user_id = session.user_id, "modify password failed");
            return error_frame(
                Command::ModifyPassword,
                packet.seq,
                &ErrorReply::new(error_codes::MODIFY_PASSWORD_ERROR, "modify password error"),
            );
        }
        ok_frame(Command::ModifyPassword, packet.seq, &ErrorReply::ok())
    }

    async fn handle_create_group(&self, session: &mut Session, packet: &Packet) -> CoreResult<Vec<Bytes>> {
        let req: CreateGroupRequest = serde_json::from_slice(&packet.body)?;
        let group_id = match self.user_store.add_group(&req.groupname, session.user_id).await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(error = %err, "create group failed");
                return Ok(vec![error_frame(
                    Command::CreateGroup,
                    packet.seq,
                    &ErrorReply::new(error_codes::CREATE_GROUP_ERROR, "create group error"),
                )?]);
            }
        };

        let reply = CreateGroupReply {
            code: error_codes::OK,
            msg: "ok".into(),
            groupid: group_id,
            groupname: req.groupname.clone(),
        };
        let create_ack = ok_frame(Command::CreateGroup, packet.seq, &reply)?;

        // The creator auto-joins; failures here are logged, not
        // rolled back against the already-reported group creation.
        if let Err(err) = self.make_friendship(session.user_id, group_id).await {
            tracing::error!(error = %err, group_id, "auto-join of group creator failed after group was created");
            return Ok(vec![create_ack]);
        }

        let self_ack = FriendAnswerSelfAck {
            userid: group_id,
            kind: 3,
            username: req.groupname,
            accept: 1,
        };
        let join_ack = encode_json(Command::OperateFriend, session.next_seq(), &self_ack)?;
        Ok(vec![create_ack, join_ack])
    }

    async fn handle_get_group_members(&self, packet: &Packet) -> CoreResult<Bytes> {
        let req: GetGroupMembersRequest = serde_json::from_slice(&packet.body)?;
        let members = self.user_store.members_of(req.groupid).await?;
        let mut out = Vec::with_capacity(members.len());
        for member in members {
            let presence = self.registry.presence_of(member.user_id).await;
            out.push(GroupMember {
                userid: member.user_id,
                username: member.username,
                nickname: member.nickname,
                facetype: member.face_type,
                clienttype: presence.map(|p| p.client_kind).unwrap_or(0),
                status: presence.map(|p| p.status).unwrap_or(0),
            });
        }
        let reply = GetGroupMembersReply { code: error_codes::OK, msg: "ok".into(), groupid: req.groupid, members: out };
        ok_frame(Command::GetGroupMembers, packet.seq, &reply)
    }

    async fn handle_chat(&self, session: &mut Session, packet: &Packet) -> CoreResult<()> {
        let mut extra = PayloadReader::new(&packet.extra);
        let target = extra.read_i32()?;
        self.deliver_chat(session, packet, target).await
    }

    async fn deliver_chat(&self, session: &mut Session, packet: &Packet, target: UserId) -> CoreResult<()> {
        let body: ChatBody = serde_json::from_slice(&packet.body)?;
        if let Err(err) = self.user_store.save_chat_msg(session.user_id, target, &body.msg).await {
            tracing::error!(error = %err, from = session.user_id, target, "chat persistence failed, delivering anyway");
        }

        let frame = Packet::encode(Command::Chat, session.next_seq(), &packet.body, &target.to_le_bytes())
            .into_bytes()
            .freeze();

        if self.fanout.is_group(target) {
            let members = self.user_store.members_of(target).await?;
            self.fanout.chat_groupcast(session.user_id, &members, frame).await;
        } else {
            self.fanout.chat_unicast(target, frame).await;
        }
        Ok(())
    }

    async fn handle_multi_chat(&self, session: &mut Session, packet: &Packet) -> CoreResult<()> {
        let mut extra = PayloadReader::new(&packet.extra);
        let targets_raw = extra.read_str()?;
        for part in targets_raw.split(',').filter(|s| !s.is_empty()) {
            let Ok(target) = part.trim().parse::<i32>() else {
                tracing::warn!(target = part, "multiChat target was not a valid id, skipping");
                continue;
            };
            self.deliver_chat(session, packet, target).await?;
        }
        Ok(())
    }

    async fn handle_remote_desktop(&self, packet: &Packet) -> CoreResult<()> {
        let mut extra = PayloadReader::new(&packet.extra);
        let bmp_header = extra.read_bytes()?;
        let bmp_data = extra.read_bytes()?;
        let target = extra.read_i32()?;

        if self.fanout.is_group(target) {
            return Ok(());
        }

        let mut body = im_protocol::PayloadWriter::new();
        body.write_bytes(&bmp_header).write_bytes(&bmp_data);
        let frame = Packet::encode(Command::RemoteDesktop, 0, &body.into_bytes(), &target.to_le_bytes())
            .into_bytes()
            .freeze();
        self.fanout.deliver_if_online(target, frame).await;
        Ok(())
    }

    async fn handle_update_team_info(&self, session: &mut Session, packet: &Packet) -> CoreResult<Bytes> {
        let raw = std::str::from_utf8(&packet.body).unwrap_or("").to_owned();
        if let Err(err) = self.user_store.update_user_team_info_raw(session.user_id, &raw).await {
            tracing::error!(error = %err, user_id = session.user_id, "updateTeamInfo store write failed");
        }
        let reply = self.build_friend_list_reply(session.user_id).await?;
        ok_frame(Command::UpdateTeamInfo, packet.seq, &reply)
    }

    #[cfg(feature = "device-upload")]
    async fn handle_upload_device_info(&self, session: &mut Session, packet: &Packet) -> CoreResult<()> {
        let mut reader = PayloadReader::new(&packet.body);
        let device_id = reader.read_i32()?;
        let class_type = reader.read_i32()?;
        let upload_time = reader.read_i64()?;
        let info = reader.read_bytes()?;
        let info: serde_json::Value = serde_json::from_slice(&info)?;
        if let Err(err) = self
            .user_store
            .insert_device_info(session.user_id, device_id, class_type, upload_time, &info)
            .await
        {
            tracing::error!(error = %err, user_id = session.user_id, "upload device info failed");
        }
        Ok(())
    }
}

fn encode_json<T: Serialize>(cmd: Command, seq: i32, payload: &T) -> CoreResult<Bytes> {
    let body = serde_json::to_vec(payload)?;
    Ok(Packet::encode(cmd, seq, &body, &[]).into_bytes().freeze())
}

fn ok_frame<T: Serialize>(cmd: Command, seq: i32, payload: &T) -> CoreResult<Bytes> {
    encode_json(cmd, seq, payload)
}

fn error_frame(cmd: Command, seq: i32, reply: &ErrorReply) -> CoreResult<Bytes> {
    encode_json(cmd, seq, reply)
}

fn presence_frame(session: &mut Session, user_id: UserId, notice: &UserStatusChangeNotice) -> CoreResult<Bytes> {
    let body = serde_json::to_vec(notice)?;
    let seq = session.next_seq();
    Ok(Packet::encode(Command::UserStatusChange, seq, &body, &user_id.to_le_bytes())
        .into_bytes()
        .freeze())
}
