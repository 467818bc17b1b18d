use std::future::Future;

use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use demosync_core::Schedule;

/// Drive `pass` according to `schedule` until shutdown.
///
/// Passes run strictly one after another. A shutdown that arrives during a
/// pass takes effect once that pass returns. Returns the number of passes.
pub async fn run_schedule<F, Fut>(
    schedule: &Schedule,
    mut shutdown: broadcast::Receiver<()>,
    mut pass: F,
) -> usize
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = ()>,
{
    if schedule.run_once {
        pass(1).await;
        return 1;
    }

    let mut passes = 0;
    if schedule.run_on_startup {
        passes += 1;
        pass(passes).await;
    }

    let period = schedule.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    // A pass longer than the period pushes the next one back instead of
    // queueing a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_secs = period.as_secs(), "scheduler started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                passes += 1;
                pass(passes).await;
            }
        }
    }
    tracing::info!(passes, "scheduler stopped");
    passes
}
