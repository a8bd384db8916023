//! Periodic task loops with overlap protection and graceful shutdown.
//!
//! Each loop runs its task inline, so an iteration that overruns simply
//! delays the next tick; two iterations of one task never overlap. Shutdown
//! uses a `watch` channel exactly like the long-running consumers elsewhere
//! in the workspace: send `true` to stop the loop after the current
//! iteration.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Run `task` every `period` until `shutdown` turns true.
///
/// The first tick fires after one full period, not immediately. Ticks missed
/// while an iteration overruns are delayed, never bursted.
pub async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Consume the immediate first tick.
    ticker.tick().await;

    tracing::info!(task = name, period_ms = period.as_millis(), "periodic task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                task().await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(task = name, "periodic task stopping");
                    break;
                }
            }
        }
    }
}

/// The next UTC midnight strictly after `now`.
#[must_use]
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = (now + ChronoDuration::days(1)).date_naive();
    // Midnight of a valid date always exists.
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map_or(now, |naive| naive.and_utc())
}

/// Run `task` once at every UTC midnight until `shutdown` turns true.
///
/// The task receives the date that just began.
pub async fn run_daily_at_utc_midnight<F, Fut>(
    name: &'static str,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) where
    F: FnMut(chrono::NaiveDate) -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::info!(task = name, "daily task started");

    loop {
        let now = Utc::now();
        let next = next_utc_midnight(now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            () = tokio::time::sleep(wait) => {
                task(next.date_naive()).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(task = name, "daily task stopping");
                    break;
                }
            }
        }
    }
}
