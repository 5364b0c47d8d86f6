use lazy_static::lazy_static;

use crate::error::Result;

// KEYS:
//  1. delayed zset
//  2. waiting list
//  3. queue stats hash
// ARGV:
//  1. current time (millis)
//  2. max batch size
//  3. job hash key prefix (e.g. "myapp:job:")
const DRAIN_DELAYED_SCRIPT: &str = r##"
    local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, ARGV[2])
    if #due == 0 then
        return 0
    end

    for _, id in ipairs(due) do
        redis.call("ZREM", KEYS[1], id)
        redis.call("LPUSH", KEYS[2], id)
        redis.call("HSET", ARGV[3] .. id, "status", "waiting", "updated", ARGV[1])
    end

    redis.call("HINCRBY", KEYS[3], "queued", #due)
    redis.call("HINCRBY", KEYS[3], "delayed", -#due)
    return #due
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(DRAIN_DELAYED_SCRIPT);
}

/// Promotes due `delayed` entries to `waiting` (§4.1 "DELAYED | due time reached").
pub struct DrainDelayedScript(&'static redis::Script);

impl DrainDelayedScript {
    pub fn new() -> Self {
        DrainDelayedScript(&SCRIPT)
    }

    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        delayed_key: &str,
        waiting_key: &str,
        stats_key: &str,
        now_millis: i64,
        batch_size: u32,
        job_key_prefix: &str,
    ) -> Result<u32> {
        let moved: u32 = self
            .0
            .key(delayed_key)
            .key(waiting_key)
            .key(stats_key)
            .arg(now_millis)
            .arg(batch_size)
            .arg(job_key_prefix)
            .invoke_async(&mut **conn)
            .await?;

        Ok(moved)
    }
}

impl Default for DrainDelayedScript {
    fn default() -> Self {
        Self::new()
    }
}
