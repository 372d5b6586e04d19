//! Wire shapes for the real-time event fabric, spec.md §6. Messages are
//! JSON objects with `{id, type, timestamp, ...typeSpecific}`; the
//! `notification.pubsub` field is itself a stringified JSON envelope
//! carrying the legacy PubSub `{topic, message}` pair.

use serde_json::{json, Value};

use crate::json::{decode_optional_property, decode_property, decode_str, decode_u64, DecodeError};

#[derive(Debug, Clone)]
pub enum ServerMessage {
    Welcome {
        keepalive_sec: u64,
        session_id: String,
    },
    Keepalive,
    AuthenticateResponse {
        ok: bool,
        error_code: Option<String>,
    },
    SubscribeResponse {
        request_id: Option<String>,
        ok: bool,
        subscription_id: Option<String>,
    },
    Notification {
        subscription_id: String,
        pubsub: PubsubEnvelope,
    },
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct PubsubEnvelope {
    pub topic: String,
    pub scope: String,
    pub message: String,
}

pub fn parse_server_message(root: &Value) -> Result<ServerMessage, DecodeError> {
    let kind = decode_property(root, "type", decode_str)?;
    Ok(match kind {
        "welcome" => decode_property(root, "welcome", |w| {
            Ok(ServerMessage::Welcome {
                keepalive_sec: decode_property(w, "keepaliveSec", decode_u64)?,
                session_id: decode_property(w, "sessionId", decode_str)?.to_owned(),
            })
        })?,
        "keepalive" => ServerMessage::Keepalive,
        "authenticateResponse" => decode_property(root, "authenticateResponse", |a| {
            let result = decode_property(a, "result", decode_str)?;
            Ok(ServerMessage::AuthenticateResponse {
                ok: result == "ok",
                error_code: (result != "ok").then(|| result.to_owned()),
            })
        })?,
        "subscribeResponse" => {
            let request_id = decode_optional_property(root, "id", decode_str)?.map(str::to_owned);
            decode_property(root, "subscribeResponse", |s| {
                let result = decode_property(s, "result", decode_str)?;
                let subscription_id = decode_optional_property(s, "subscription", |sub| {
                    decode_property(sub, "id", decode_str).map(str::to_owned)
                })?;
                Ok(ServerMessage::SubscribeResponse {
                    request_id: request_id.clone(),
                    ok: result == "ok",
                    subscription_id,
                })
            })?
        }
        "notification" => decode_property(root, "notification", |n| {
            let subscription_id = decode_property(n, "subscription", |sub| {
                decode_property(sub, "id", decode_str)
            })?
            .to_owned();
            let pubsub_str = decode_property(n, "pubsub", decode_str)?.to_owned();
            let pubsub = parse_pubsub_envelope(&pubsub_str)?;
            Ok(ServerMessage::Notification {
                subscription_id,
                pubsub,
            })
        })?,
        "reconnect" => ServerMessage::Reconnect,
        other => {
            return Err(DecodeError::WrongType {
                path: vec![crate::json::PathSegment::Key("type".into())],
                expected: "a known server message type",
                actual: other.to_owned(),
            })
        }
    })
}

fn parse_pubsub_envelope(raw: &str) -> Result<PubsubEnvelope, DecodeError> {
    let v: Value = serde_json::from_str(raw).map_err(|_| DecodeError::WrongType {
        path: vec![crate::json::PathSegment::Key("pubsub".into())],
        expected: "JSON object",
        actual: raw.to_owned(),
    })?;
    let topic_full = decode_property(&v, "topic", decode_str)?.to_owned();
    let message = decode_property(&v, "message", decode_str)?.to_owned();
    let (topic, scope) = topic_full
        .split_once('.')
        .map(|(t, s)| (t.to_owned(), s.to_owned()))
        .unwrap_or((topic_full.clone(), String::new()));
    Ok(PubsubEnvelope {
        topic,
        scope,
        message,
    })
}

pub fn authenticate_message(token: &str) -> Value {
    json!({ "type": "authenticate", "authenticate": { "token": token } })
}

pub fn subscribe_message(id: &str, topic: &str) -> Value {
    json!({ "id": id, "type": "subscribe", "subscribe": { "pubsub": { "topic": topic } } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_message_round_trips() {
        let v = json!({ "type": "welcome", "welcome": { "keepaliveSec": 30, "sessionId": "abc" } });
        match parse_server_message(&v).unwrap() {
            ServerMessage::Welcome { keepalive_sec, session_id } => {
                assert_eq!(keepalive_sec, 30);
                assert_eq!(session_id, "abc");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn notification_splits_topic_and_scope() {
        let inner = json!({ "topic": "community-points-user-v1.42", "message": "{}" }).to_string();
        let v = json!({
            "type": "notification",
            "notification": { "subscription": { "id": "sub1" }, "pubsub": inner }
        });
        match parse_server_message(&v).unwrap() {
            ServerMessage::Notification { subscription_id, pubsub } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(pubsub.topic, "community-points-user-v1");
                assert_eq!(pubsub.scope, "42");
            }
            _ => panic!("wrong variant"),
        }
    }
}
