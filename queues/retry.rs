//! Pure retry/backoff policy (§4.1, §9 open questions). Kept free of Redis so the
//! interesting branching logic is unit-testable without a live connection; the atomic
//! *application* of whatever this module decides happens in `fail_script`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;

use crate::job::UNLIMITED_RETRY_THRESHOLD;

/// A value near this boundary (3 years, in seconds) disambiguates a relative delay
/// from an absolute Unix timestamp. Preserved from the source system's convention
/// even though it conflates a very long relative delay with an absolute epoch.
pub const RETRY_DELAY_ABSOLUTE_BOUNDARY_SECS: i64 = 94_608_000;

pub const MAX_BACKOFF_SECS: i64 = 180;

/// Why the job stopped running.
#[derive(Debug, Clone)]
pub enum FailureKind {
    /// The handler explicitly asked to be retried after `delay` (seconds; relative or
    /// absolute per [`RETRY_DELAY_ABSOLUTE_BOUNDARY_SECS`]). Bypasses the
    /// `failed_count` threshold entirely.
    Retry { delay_secs: i64 },
    /// An uncaught error propagated out of the handler, the child process died
    /// unexpectedly (Dirty), or the GC found the job orphaned (Zombie).
    Unexpected,
}

/// What the state machine should do next, independent of how it's applied to Redis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue directly onto the waiting list with no delay.
    RequeueWaiting,
    /// Requeue onto the delayed zset, to become eligible again at this time.
    Delay(DateTime<Utc>),
    /// Exhausted; terminal FAILED.
    Failed,
}

/// Resolve a `Retry(delay)` value per the relative/absolute heuristic.
pub fn resolve_retry_delay(now: DateTime<Utc>, delay_secs: i64) -> DateTime<Utc> {
    if delay_secs.abs() < RETRY_DELAY_ABSOLUTE_BOUNDARY_SECS {
        now + ChronoDuration::seconds(delay_secs)
    } else {
        DateTime::<Utc>::from_utc(
            chrono::NaiveDateTime::from_timestamp_opt(delay_secs, 0).unwrap_or_else(|| now.naive_utc()),
            Utc,
        )
    }
}

/// Exponential backoff with jitter: `rand(2^n/2, 2^n)` seconds, clamped to
/// [`MAX_BACKOFF_SECS`]. `n` is the failed_count *after* this failure is recorded.
pub fn jittered_backoff_secs(failed_count: u32) -> i64 {
    let upper = 2f64.powi(failed_count as i32);
    let lower = upper / 2.0;
    let upper = upper.min(MAX_BACKOFF_SECS as f64);
    let lower = lower.min(upper);
    if (upper - lower).abs() < f64::EPSILON {
        return upper as i64;
    }
    rand::thread_rng().gen_range(lower..upper).round() as i64
}

/// Decide what happens to a job with the given (already-incremented) `failed_count`
/// and `retry_threshold` after `kind`.
pub fn decide(
    kind: &FailureKind,
    failed_count: u32,
    retry_threshold: i32,
    now: DateTime<Utc>,
) -> RetryDecision {
    if let FailureKind::Retry { delay_secs } = kind {
        return RetryDecision::Delay(resolve_retry_delay(now, *delay_secs));
    }

    if retry_threshold != UNLIMITED_RETRY_THRESHOLD
        && failed_count >= retry_threshold.max(0) as u32
    {
        return RetryDecision::Failed;
    }

    if failed_count < 2 {
        RetryDecision::RequeueWaiting
    } else {
        let backoff = jittered_backoff_secs(failed_count);
        RetryDecision::Delay(now + ChronoDuration::seconds(backoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_requeues_directly() {
        let now = Utc::now();
        let decision = decide(&FailureKind::Unexpected, 1, 3, now);
        assert_eq!(decision, RetryDecision::RequeueWaiting);
    }

    #[test]
    fn second_failure_delays_with_backoff() {
        let now = Utc::now();
        match decide(&FailureKind::Unexpected, 2, 3, now) {
            RetryDecision::Delay(at) => {
                assert!(at > now);
                assert!(at <= now + ChronoDuration::seconds(MAX_BACKOFF_SECS));
            }
            other => panic!("expected Delay, got {:?}", other),
        }
    }

    #[test]
    fn threshold_reached_is_terminal() {
        let now = Utc::now();
        assert_eq!(decide(&FailureKind::Unexpected, 3, 3, now), RetryDecision::Failed);
    }

    #[test]
    fn unlimited_threshold_never_terminates() {
        let now = Utc::now();
        for failed_count in 1..50 {
            let decision = decide(&FailureKind::Unexpected, failed_count, UNLIMITED_RETRY_THRESHOLD, now);
            assert_ne!(decision, RetryDecision::Failed);
        }
    }

    #[test]
    fn retry_bypasses_threshold_even_past_it() {
        let now = Utc::now();
        let decision = decide(&FailureKind::Retry { delay_secs: 30 }, 10, 3, now);
        match decision {
            RetryDecision::Delay(at) => assert_eq!(at, now + ChronoDuration::seconds(30)),
            other => panic!("expected Delay, got {:?}", other),
        }
    }

    #[test]
    fn backoff_is_bounded_by_max() {
        for failed_count in 2..40 {
            let secs = jittered_backoff_secs(failed_count);
            assert!(secs <= MAX_BACKOFF_SECS);
            assert!(secs >= 1);
        }
    }

    #[test]
    fn absolute_delay_boundary_is_respected() {
        let now = Utc::now();
        let relative = resolve_retry_delay(now, 60);
        assert_eq!(relative, now + ChronoDuration::seconds(60));

        let absolute_epoch = now.timestamp() + RETRY_DELAY_ABSOLUTE_BOUNDARY_SECS + 1;
        let absolute = resolve_retry_delay(now, absolute_epoch);
        assert_eq!(absolute.timestamp(), absolute_epoch);
    }
}
