//! HTTP handlers for the chat service.
//!
//! Handlers are thin: extract, rate limit, call one service, serialize.

pub mod health;
pub mod messages;
pub mod metrics;
pub mod rooms;

pub use health::{health_check, readiness_check};
pub use messages::{fetch_messages, send_message};
pub use metrics::metrics_handler;
pub use rooms::{
    client_ip, get_room_state, get_room_states, get_user_rooms, join_room, leave_room,
    touch_presence,
};
