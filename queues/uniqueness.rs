//! Uniqueness ("mutex signature") admission control (§4.3).

use lazy_static::lazy_static;

use crate::error::Result;

// KEYS:
//  1. unique:job:<signature> lock key
// ARGV:
//  1. job id requesting the lock
//  2. TTL in seconds
//  3. job hash key prefix (e.g. "myapp:job:")
const ACQUIRE_SCRIPT: &str = r##"
    local current = redis.call("GET", KEYS[1])
    if current == false then
        redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[2])
        return true
    end

    if current == ARGV[1] then
        redis.call("EXPIRE", KEYS[1], ARGV[2])
        return true
    end

    local status = redis.call("HGET", ARGV[3] .. current, "status")
    if status == false or status == "complete" or status == "cancelled" or status == "failed" then
        redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[2])
        return true
    end

    return false
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(ACQUIRE_SCRIPT);
}

pub const UNIQUENESS_LOCK_TTL_SECS: i64 = 7200;
pub const DUPLICATES_LIST_CAP: isize = 300;

pub struct AcquireSignatureScript(&'static redis::Script);

impl AcquireSignatureScript {
    pub fn new() -> Self {
        AcquireSignatureScript(&SCRIPT)
    }

    /// `true` if `job_id` now owns (or already owned) the signature lock; `false` if a
    /// different, still-live job holds it.
    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        lock_key: &str,
        job_id: &str,
        job_key_prefix: &str,
    ) -> Result<bool> {
        let acquired: bool = self
            .0
            .key(lock_key)
            .arg(job_id)
            .arg(UNIQUENESS_LOCK_TTL_SECS)
            .arg(job_key_prefix)
            .invoke_async(&mut **conn)
            .await?;

        Ok(acquired)
    }
}

impl Default for AcquireSignatureScript {
    fn default() -> Self {
        Self::new()
    }
}
