//! Timeouts are always a race between the real operation and a timer; the
//! losing operation is dropped, never signalled.

use std::future::Future;
use std::time::Duration;

use futures::future::{select, Either};
use futures::pin_mut;

#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await;
}

/// `Some(output)` if `fut` finished first, `None` if the timer did.
pub async fn race_timeout<F>(fut: F, duration: Duration) -> Option<F::Output>
where
    F: Future,
{
    let timer = sleep(duration);
    pin_mut!(fut);
    pin_mut!(timer);
    match select(fut, timer).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(((), _)) => None,
    }
}
