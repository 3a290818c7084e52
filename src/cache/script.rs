//! Lua script bodies for the Atomic Cache's script-atomic operations.
//! `redis::Script` handles the `EVALSHA`-with-`NOSCRIPT`-fallback-to-`EVAL`
//! dance internally, so callers only need the script text.

/// `KEYS = [stock:{P}, queue:{P}, user:{U}:product:{P}]`
/// `ARGV = [userId, arrivalMs, ttlSeconds]`
/// Returns `"DUPLICATE_REQUEST" | "SOLD_OUT" | position (integer string)`.
pub const TRY_ADMIT: &str = r#"
local stock_key = KEYS[1]
local queue_key = KEYS[2]
local flight_key = KEYS[3]
local user_id = ARGV[1]
local arrival_ms = ARGV[2]
local ttl_seconds = tonumber(ARGV[3])

if redis.call("EXISTS", flight_key) == 1 then
    return "DUPLICATE_REQUEST"
end

local stock = tonumber(redis.call("GET", stock_key))
if stock == nil or stock <= 0 then
    return "SOLD_OUT"
end

redis.call("DECR", stock_key)
redis.call("ZADD", queue_key, arrival_ms, user_id)
redis.call("SET", flight_key, "1", "EX", ttl_seconds)

local rank = redis.call("ZRANK", queue_key, user_id)
return tostring(rank + 1)
"#;

/// `KEYS = [stock:{P}, queue:{P}, user:{U}:product:{P}]`
/// `ARGV = [userId, initialStock]`
/// Idempotent: repeated calls for the same user are no-ops past the first.
pub const RELEASE_ONE: &str = r#"
local stock_key = KEYS[1]
local queue_key = KEYS[2]
local flight_key = KEYS[3]
local user_id = ARGV[1]
local initial_stock = tonumber(ARGV[2])

local removed = redis.call("ZREM", queue_key, user_id)
redis.call("DEL", flight_key)

if removed == 1 then
    local stock = tonumber(redis.call("GET", stock_key)) or 0
    if stock < initial_stock then
        redis.call("INCR", stock_key)
    end
end

return "OK"
"#;
