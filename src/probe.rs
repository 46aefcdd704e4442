// The first-success race behind each byte position.
//
// Up to `concurrency` candidate futures are in flight at once; the race
// resolves at the first one to produce `true`. Tasks past the ceiling are
// never started once a winner is known, and in-flight losers are dropped
// rather than awaited — their outcome can no longer affect anything.

use std::future::Future;

use futures::stream::{self, StreamExt};

use crate::error::Result;

/// Drive `tasks` with bounded concurrency until one yields `Ok(true)`,
/// returning its tag. `Ok(None)` means every task came back false; the
/// first `Err` aborts the whole probe. A concurrency of 1 degrades to
/// strict in-order trial-and-stop.
pub async fn first_truthy<T, Fut>(
    tasks: impl IntoIterator<Item = (T, Fut)>,
    concurrency: usize,
) -> Result<Option<T>>
where
    Fut: Future<Output = Result<bool>>,
{
    let mut in_flight = stream::iter(
        tasks
            .into_iter()
            .map(|(tag, task)| async move { task.await.map(|hit| (tag, hit)) }),
    )
    .buffer_unordered(concurrency.max(1));

    while let Some(completed) = in_flight.next().await {
        let (tag, hit) = completed?;
        if hit {
            return Ok(Some(tag));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::Error;

    #[tokio::test]
    async fn resolves_with_the_first_truthy_tag() {
        let tasks = (0u16..=255).map(|byte| (byte, async move { Ok(byte == 7) }));

        let winner = first_truthy(tasks, 16).await.unwrap();

        assert_eq!(winner, Some(7));
    }

    #[tokio::test]
    async fn resolves_none_when_every_task_is_false() {
        let tasks = (0u8..16).map(|byte| (byte, async move { Ok(false) }));

        assert_eq!(first_truthy(tasks, 4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_ceiling() {
        let current = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0u8..64)
            .map(|byte| {
                let current = current.clone();
                let high_water = high_water.clone();
                (byte, async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(false)
                })
            })
            .collect();

        first_truthy(tasks, 4).await.unwrap();

        assert!(high_water.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn an_early_winner_stops_later_tasks_from_starting() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0u16..256)
            .map(|byte| {
                let started = started.clone();
                (byte, async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if byte == 3 {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        Ok(true)
                    } else {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(false)
                    }
                })
            })
            .collect();

        let winner = first_truthy(tasks, 8).await.unwrap();

        assert_eq!(winner, Some(3));
        assert!(started.load(Ordering::SeqCst) <= 8);
    }

    #[tokio::test]
    async fn a_concurrency_of_one_runs_strictly_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let tasks: Vec<_> = (0u8..8)
            .map(|byte| {
                let order = order.clone();
                (byte, async move {
                    order.lock().push(byte);
                    Ok(byte == 2)
                })
            })
            .collect();

        let winner = first_truthy(tasks, 1).await.unwrap();

        assert_eq!(winner, Some(2));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn task_errors_abort_the_probe() {
        let tasks = (0u8..8).map(|byte| {
            (byte, async move {
                if byte == 2 {
                    Err(Error::OracleFailure { offset: 0 })
                } else {
                    Ok(false)
                }
            })
        });

        let result = first_truthy(tasks, 1).await;

        assert!(matches!(result, Err(Error::OracleFailure { .. })));
    }
}
