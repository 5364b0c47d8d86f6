use lazy_static::lazy_static;

use crate::error::Result;

// Stamp a payload that BRPOPLPUSH has already moved into the worker's processing
// list. The list move is itself atomic; since only the worker that performed it can
// see the item there, nothing else can race this script for ownership of this id.
//
// KEYS:
//  1. running zset
//  2. job hash
//  3. queue stats hash
// ARGV:
//  1. job id
//  2. current time (millis)
//  3. worker id
const CLAIM_SCRIPT: &str = r##"
    redis.call("ZADD", KEYS[1], ARGV[2], ARGV[1])
    redis.call("HSET", KEYS[2], "status", "running", "started", ARGV[2], "updated", ARGV[2], "worker", ARGV[3])
    redis.call("HINCRBY", KEYS[3], "running", 1)
    redis.call("HINCRBY", KEYS[3], "queued", -1)
    return ARGV[2]
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(CLAIM_SCRIPT);
}

pub struct ClaimScript(&'static redis::Script);

impl ClaimScript {
    pub fn new() -> Self {
        ClaimScript(&SCRIPT)
    }

    /// Returns the start-time stamp now recorded in the running zset; callers must
    /// hold on to it and pass it back as the `expected_start` guard to
    /// [`crate::complete_script::CompleteScript`], [`crate::fail_script::FailScript`],
    /// etc.
    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        running_key: &str,
        job_key: &str,
        stats_key: &str,
        job_id: &str,
        now_millis: i64,
        worker_id: &str,
    ) -> Result<i64> {
        let started: i64 = self
            .0
            .key(running_key)
            .key(job_key)
            .key(stats_key)
            .arg(job_id)
            .arg(now_millis)
            .arg(worker_id)
            .invoke_async(&mut **conn)
            .await?;

        Ok(started)
    }
}

impl Default for ClaimScript {
    fn default() -> Self {
        Self::new()
    }
}
