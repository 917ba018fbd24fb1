//! Request body fixtures.

use serde_json::{json, Value};
use uuid::Uuid;

/// Join body for `device` with a nickname and session derived from it.
pub fn join_body(device: &str) -> Value {
    json!({
        "deviceHash": device,
        "nickname": format!("nick-{device}"),
        "sessionId": format!("session-{device}"),
    })
}

/// Join body with an explicit session id.
pub fn join_body_with_session(device: &str, session_id: &str) -> Value {
    json!({
        "deviceHash": device,
        "nickname": format!("nick-{device}"),
        "sessionId": session_id,
    })
}

/// Join body for a signed-in user.
pub fn join_body_for_user(device: &str, user_id: &str) -> Value {
    let mut body = join_body(device);
    body["userId"] = json!(user_id);
    body
}

/// Presence or leave body.
pub fn member_body(member_id: Uuid) -> Value {
    json!({ "memberId": member_id })
}

/// Send-message body.
pub fn message_body(member_id: Uuid, message: &str) -> Value {
    json!({ "memberId": member_id, "message": message })
}

/// Extract `memberId` from a join response.
pub fn member_id_of(membership: &Value) -> Uuid {
    membership["memberId"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("membership response should carry a memberId")
}
