//! Wire events, JSON-tagged as `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{presence::UserInfo, store::StoredMessage};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Login {
        username: String,
    },
    SendMessage {
        content: String,
        #[serde(default)]
        room: Option<String>,
    },
    TypingStart {
        #[serde(default)]
        room: Option<String>,
    },
    TypingStop {
        #[serde(default)]
        room: Option<String>,
    },
    JoinRoom {
        room: String,
    },
    OpenDm {
        #[serde(rename = "targetUsername")]
        target_username: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    LoginSuccess {
        username: String,
        #[serde(rename = "connectionId")]
        connection_id: Uuid,
    },
    LoginError {
        message: String,
    },
    MessageHistory {
        messages: Vec<StoredMessage>,
    },
    OnlineUsers {
        users: Vec<UserInfo>,
    },
    UserJoined {
        username: String,
        users: Vec<UserInfo>,
    },
    UserLeft {
        username: String,
        users: Vec<UserInfo>,
    },
    UserTyping {
        username: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    NewMessage(StoredMessage),
    DmOpened {
        room: String,
        with: String,
    },
    DmHistory {
        room: String,
        with: String,
        messages: Vec<StoredMessage>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_parse_from_tagged_json() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"login","data":{"username":"alice"}}"#).unwrap();
        assert!(matches!(ev, ClientEvent::Login { username } if username == "alice"));

        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"open_dm","data":{"targetUsername":"bob"}}"#).unwrap();
        assert!(matches!(ev, ClientEvent::OpenDm { target_username } if target_username == "bob"));

        // room is optional on message and typing events
        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"send_message","data":{"content":"hi"}}"#).unwrap();
        assert!(matches!(ev, ClientEvent::SendMessage { room: None, .. }));

        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"nonsense","data":{}}"#).is_err());
    }

    #[test]
    fn outbound_events_carry_the_wire_field_names() {
        let json = serde_json::to_value(ServerEvent::UserTyping {
            username: "alice".into(),
            is_typing: true,
        })
        .unwrap();
        assert_eq!(json["event"], "user_typing");
        assert_eq!(json["data"]["isTyping"], true);

        let json = serde_json::to_value(ServerEvent::LoginSuccess {
            username: "alice".into(),
            connection_id: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(json["event"], "login_success");
        assert!(json["data"]["connectionId"].is_string());
    }
}
