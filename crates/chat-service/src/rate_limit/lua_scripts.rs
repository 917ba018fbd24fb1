//! Lua scripts for the distributed rate-limit counter.
//!
//! The whole read-modify-write of a window runs inside one script, so
//! concurrent hits from any number of instances are serialized by Redis.

/// Count one hit against a window.
///
/// The window lives in a hash with fields `start` (epoch millis) and `count`,
/// expiring with the window.
///
/// Arguments:
/// - KEYS[1]: Window key (e.g., `ratelimit:chat-send:<member_id>`)
/// - ARGV[1]: Caller's current time in epoch millis
/// - ARGV[2]: Window length in millis
///
/// Returns `{count, window_start_ms}` after counting this hit.
pub const WINDOW_HIT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local start = tonumber(redis.call('HGET', KEYS[1], 'start'))

if start == nil or now >= start + window then
    redis.call('HSET', KEYS[1], 'start', now, 'count', 1)
    redis.call('PEXPIRE', KEYS[1], window)
    return {1, now}
end

local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
local ttl = start + window - now
if ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return {count, start}
"#;
