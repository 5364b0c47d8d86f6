use lazy_static::lazy_static;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from one of the live indices and marked cancelled.
    Cancelled,
    /// Already in a terminal state; nothing to do.
    AlreadyTerminal(String),
    /// Unknown job id.
    NotFound,
}

// KEYS:
//  1. waiting list
//  2. delayed zset
//  3. running zset
//  4. processing list
//  5. cancelled zset
//  6. job hash
//  7. queue stats hash
// ARGV:
//  1. job id
//  2. current time (millis)
//  3. override reason
const CANCEL_SCRIPT: &str = r##"
    local was_waiting = redis.call("LREM", KEYS[1], 1, ARGV[1]) > 0
    local was_delayed = redis.call("ZREM", KEYS[2], ARGV[1]) > 0
    local was_running = redis.call("ZREM", KEYS[3], ARGV[1]) > 0
    if was_running then
        redis.call("LREM", KEYS[4], 1, ARGV[1])
    end

    if not (was_waiting or was_delayed or was_running) then
        local status = redis.call("HGET", KEYS[6], "status")
        if status == false then
            return {false, false}
        end
        return {true, status}
    end

    redis.call("ZADD", KEYS[5], ARGV[2], ARGV[1])
    redis.call("HSET", KEYS[6], "status", "cancelled", "finished", ARGV[2], "updated", ARGV[2], "override_reason", ARGV[3])
    redis.call("HINCRBY", KEYS[7], "cancelled", 1)
    if was_waiting then redis.call("HINCRBY", KEYS[7], "queued", -1) end
    if was_delayed then redis.call("HINCRBY", KEYS[7], "delayed", -1) end
    if was_running then redis.call("HINCRBY", KEYS[7], "running", -1) end

    return {true, "cancelled-now"}
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(CANCEL_SCRIPT);
}

pub struct CancelScript(&'static redis::Script);

impl CancelScript {
    pub fn new() -> Self {
        CancelScript(&SCRIPT)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        waiting_key: &str,
        delayed_key: &str,
        running_key: &str,
        processing_list_key: &str,
        cancelled_key: &str,
        job_key: &str,
        stats_key: &str,
        job_id: &str,
        now_millis: i64,
        reason: &str,
    ) -> Result<CancelOutcome> {
        let (found, status): (bool, Option<String>) = self
            .0
            .key(waiting_key)
            .key(delayed_key)
            .key(running_key)
            .key(processing_list_key)
            .key(cancelled_key)
            .key(job_key)
            .key(stats_key)
            .arg(job_id)
            .arg(now_millis)
            .arg(reason)
            .invoke_async(&mut **conn)
            .await?;

        Ok(match (found, status) {
            (false, _) => CancelOutcome::NotFound,
            (true, Some(s)) if s == "cancelled-now" => CancelOutcome::Cancelled,
            (true, Some(s)) => CancelOutcome::AlreadyTerminal(s),
            (true, None) => CancelOutcome::NotFound,
        })
    }
}

impl Default for CancelScript {
    fn default() -> Self {
        Self::new()
    }
}
