/// Lua script for an atomic compare-and-increment of a counter.
///
/// Increments the counter only while it is below the limit, and refreshes the
/// expiry together with the increment so the two can never be split.
///
/// KEYS[1] = the counter key
/// ARGV[1] = limit
/// ARGV[2] = expiry in milliseconds
///
/// Returns: [incremented (0/1), count after the call]
pub const INCREMENT_IF_BELOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local ttl_ms = tonumber(ARGV[2])

local current = tonumber(redis.call('GET', key) or '0')

if current >= limit then
    return {0, current}
end

local count = redis.call('INCR', key)
redis.call('PEXPIRE', key, ttl_ms)

return {1, count}
"#;
