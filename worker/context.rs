//! Per-job execution context handed to a [`crate::handler::JobHandler`]: progress
//! reporting and output capture (§4.6).

use redis::AsyncCommands;
use rjob_database::RedisPool;

use crate::error::Result;

const OUTPUT_STREAM_MAXLEN: usize = 1000;
const OUTPUT_STREAM_TTL_SECS: i64 = 86_400;

pub struct JobContext {
    pool: RedisPool,
    job_key: String,
    output_key: String,
    channel: Option<String>,
    aggregated: String,
}

impl JobContext {
    pub fn new(pool: RedisPool, job_key: String, output_key: String, channel: Option<String>) -> JobContext {
        JobContext {
            pool,
            job_key,
            output_key,
            channel,
            aggregated: String::new(),
        }
    }

    /// Forward one flushed line of stdout/stderr to the bounded output stream and the
    /// optional per-job pub/sub channel, and keep it in the aggregate buffer that gets
    /// persisted to the job hash on exit.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.aggregated.push_str(line);
        self.aggregated.push('\n');

        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.cmd("XADD")
            .arg(&self.output_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(OUTPUT_STREAM_MAXLEN)
            .arg("*")
            .arg("line")
            .arg(line)
            .ignore();
        pipe.expire(&self.output_key, OUTPUT_STREAM_TTL_SECS as usize).ignore();
        pipe.hset(&self.job_key, "latest_line", line).ignore();
        pipe.query_async(&mut conn).await?;

        if let Some(channel) = &self.channel {
            conn.publish(format!("bot-channel-{}", channel), line).await?;
        }

        Ok(())
    }

    pub async fn set_progress(&self, percent: u8) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.hset(&self.job_key, "progress", percent.min(100)).await?;
        Ok(())
    }

    pub fn aggregated_output(&self) -> &str {
        &self.aggregated
    }
}
