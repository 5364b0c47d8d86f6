use lazy_static::lazy_static;

use crate::error::Result;

/// The already-decided outcome to apply atomically. The *decision* (which of these
/// three, and at what delay) is pure Rust policy living in [`crate::retry`]; this
/// script only applies it, guarded by the same `expected_start` pattern used by
/// [`crate::complete_script`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAction {
    RequeueWaiting,
    Delay,
    Failed,
}

impl FailAction {
    fn as_str(self) -> &'static str {
        match self {
            FailAction::RequeueWaiting => "waiting",
            FailAction::Delay => "delay",
            FailAction::Failed => "failed",
        }
    }
}

// KEYS:
//  1. running zset
//  2. processing list
//  3. waiting list
//  4. delayed zset
//  5. failed zset
//  6. job hash
//  7. queue stats hash
// ARGV:
//  1. job id
//  2. current time (millis)
//  3. expected start score
//  4. action: "waiting" | "delay" | "failed"
//  5. delay-at (millis), only meaningful when action == "delay"
//  6. updated exception history (JSON array, already bounded by the caller)
const FAIL_SCRIPT: &str = r##"
    local score = redis.call("ZSCORE", KEYS[1], ARGV[1])
    if score ~= ARGV[3] then
        return false
    end

    redis.call("ZREM", KEYS[1], ARGV[1])
    redis.call("LREM", KEYS[2], 1, ARGV[1])
    redis.call("HINCRBY", KEYS[7], "running", -1)
    redis.call("HSET", KEYS[6], "updated", ARGV[2], "exception", ARGV[6])
    redis.call("HINCRBY", KEYS[6], "failed_count", 1)

    if ARGV[4] == "waiting" then
        redis.call("LPUSH", KEYS[3], ARGV[1])
        redis.call("HSET", KEYS[6], "status", "waiting")
        redis.call("HINCRBY", KEYS[7], "queued", 1)
    elseif ARGV[4] == "delay" then
        redis.call("ZADD", KEYS[4], ARGV[5], ARGV[1])
        redis.call("HSET", KEYS[6], "status", "delayed", "delayed_until", ARGV[5])
        redis.call("HINCRBY", KEYS[7], "delayed", 1)
        redis.call("HINCRBY", KEYS[7], "fail_retried", 1)
    else
        redis.call("ZADD", KEYS[5], ARGV[2], ARGV[1])
        redis.call("HSET", KEYS[6], "status", "failed", "finished", ARGV[2])
        redis.call("HINCRBY", KEYS[7], "failed", 1)
    end

    return true
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(FAIL_SCRIPT);
}

pub struct FailScript(&'static redis::Script);

impl FailScript {
    pub fn new() -> Self {
        FailScript(&SCRIPT)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        running_key: &str,
        processing_list_key: &str,
        waiting_key: &str,
        delayed_key: &str,
        failed_key: &str,
        job_key: &str,
        stats_key: &str,
        job_id: &str,
        now_millis: i64,
        expected_start: i64,
        action: FailAction,
        delay_at_millis: Option<i64>,
        exception_json: &str,
    ) -> Result<bool> {
        let applied: bool = self
            .0
            .key(running_key)
            .key(processing_list_key)
            .key(waiting_key)
            .key(delayed_key)
            .key(failed_key)
            .key(job_key)
            .key(stats_key)
            .arg(job_id)
            .arg(now_millis)
            .arg(expected_start)
            .arg(action.as_str())
            .arg(delay_at_millis.unwrap_or(0))
            .arg(exception_json)
            .invoke_async(&mut **conn)
            .await?;

        Ok(applied)
    }
}

impl Default for FailScript {
    fn default() -> Self {
        Self::new()
    }
}
