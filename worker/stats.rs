//! `jobs:stat:<presentation>` / `jobs:time` / `jobs:count` leaderboards (§4.6),
//! maintained only "when running under worker execution" (`isPerformedOnBot`).

use chrono::Utc;
use redis::AsyncCommands;
use rjob_database::RedisPool;
use rjob_queues::JobStatus;

use crate::error::Result;

pub struct StatsRecorder {
    pool: RedisPool,
}

impl StatsRecorder {
    pub fn new(pool: RedisPool) -> StatsRecorder {
        StatsRecorder { pool }
    }

    pub async fn record(&self, presentation: &str, status: JobStatus, duration_secs: f64) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let stat_key = self.pool.key(&format!("jobs:stat:{}", presentation));

        let (last_ts, count, mean): (Option<i64>, Option<u64>, Option<f64>) = redis::pipe()
            .hget(&stat_key, "last_ts")
            .hget(&stat_key, "count")
            .hget(&stat_key, "mean_interval")
            .query_async(&mut conn)
            .await?;

        let now = Utc::now().timestamp_millis();
        let new_count = count.unwrap_or(0) + 1;
        let new_mean = match last_ts {
            Some(last) => {
                let interval = (now - last) as f64;
                let prior_mean = mean.unwrap_or(0.0);
                (prior_mean * (new_count - 1) as f64 + interval) / new_count as f64
            }
            None => mean.unwrap_or(0.0),
        };

        let mut pipe = redis::pipe();
        pipe.hset(&stat_key, "last_ts", now).ignore();
        pipe.hset(&stat_key, "count", new_count).ignore();
        pipe.hset(&stat_key, "mean_interval", new_mean).ignore();

        let member = format!("{}::{}", status_label(status), presentation);
        pipe.zincr(self.pool.key("jobs:time"), &member, duration_secs).ignore();
        pipe.zincr(self.pool.key("jobs:count"), &member, 1).ignore();

        pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Complete => "complete",
        JobStatus::Cancelled => "cancelled",
        JobStatus::Failed => "failed",
        JobStatus::Waiting => "waiting",
        JobStatus::Delayed => "delayed",
        JobStatus::Running => "running",
    }
}
