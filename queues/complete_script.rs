use lazy_static::lazy_static;

use crate::error::Result;

// KEYS:
//  1. running zset
//  2. processing list
//  3. processed zset
//  4. job hash
//  5. queue stats hash
// ARGV:
//  1. job id
//  2. current time (millis)
//  3. expected start score (guard: someone else, e.g. GC, may have already reclaimed it)
const COMPLETE_SCRIPT: &str = r##"
    local score = redis.call("ZSCORE", KEYS[1], ARGV[1])
    if score ~= ARGV[3] then
        return false
    end

    redis.call("ZREM", KEYS[1], ARGV[1])
    redis.call("LREM", KEYS[2], 1, ARGV[1])
    redis.call("ZADD", KEYS[3], ARGV[2], ARGV[1])
    redis.call("HSET", KEYS[4], "status", "complete", "progress", "100", "finished", ARGV[2], "updated", ARGV[2])
    redis.call("HINCRBY", KEYS[5], "running", -1)
    redis.call("HINCRBY", KEYS[5], "processed", 1)
    return true
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(COMPLETE_SCRIPT);
}

pub struct CompleteScript(&'static redis::Script);

impl CompleteScript {
    pub fn new() -> Self {
        CompleteScript(&SCRIPT)
    }

    /// Returns `false` if the job's running-zset entry no longer matches
    /// `expected_start`, meaning ownership was already reclaimed (a zombie sweep, most
    /// likely) and this completion must not be applied.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        running_key: &str,
        processing_list_key: &str,
        processed_key: &str,
        job_key: &str,
        stats_key: &str,
        job_id: &str,
        now_millis: i64,
        expected_start: i64,
    ) -> Result<bool> {
        let marked_done: bool = self
            .0
            .key(running_key)
            .key(processing_list_key)
            .key(processed_key)
            .key(job_key)
            .key(stats_key)
            .arg(job_id)
            .arg(now_millis)
            .arg(expected_start)
            .invoke_async(&mut **conn)
            .await?;

        Ok(marked_done)
    }
}

impl Default for CompleteScript {
    fn default() -> Self {
        Self::new()
    }
}
