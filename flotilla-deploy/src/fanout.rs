//! Scatter/gather over clusters.
//!
//! One unit of work per item, at most `max_concurrency` in flight, each bounded
//! by an optional deadline. The caller gets back exactly one result per item,
//! in completion order.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use flotilla_core::config::FanoutSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutLimits {
    /// `None` runs every item at once.
    pub max_concurrency: Option<usize>,
    pub per_item_timeout: Option<Duration>,
}

impl Default for FanoutLimits {
    fn default() -> Self {
        Self::from(&FanoutSettings::default())
    }
}

impl From<&FanoutSettings> for FanoutLimits {
    fn from(settings: &FanoutSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency,
            per_item_timeout: settings.per_cluster_timeout(),
        }
    }
}

/// The item's deadline passed before its work finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut(pub Duration);

impl std::fmt::Display for TimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timed out after {}s", self.0.as_secs())
    }
}

/// Result for one scattered item.
#[derive(Debug)]
pub struct Gathered<I, T> {
    pub item: I,
    pub outcome: Result<T, TimedOut>,
}

/// Run `op` once per item and collect every outcome.
pub async fn scatter_gather<I, T, F, Fut>(items: Vec<I>, limits: FanoutLimits, op: F) -> Vec<Gathered<I, T>>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T>,
{
    if items.is_empty() {
        return Vec::new();
    }
    let cap = limits.max_concurrency.unwrap_or(items.len()).max(1);
    let deadline = limits.per_item_timeout;

    stream::iter(items)
        .map(|item| {
            let work = op(item.clone());
            async move {
                let outcome = match deadline {
                    Some(limit) => tokio::time::timeout(limit, work)
                        .await
                        .map_err(|_| TimedOut(limit)),
                    None => Ok(work.await),
                };
                Gathered { item, outcome }
            }
        })
        .buffer_unordered(cap)
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn one_result_per_item() {
        let items: Vec<u32> = (0..25).collect();
        let gathered = scatter_gather(items.clone(), FanoutLimits::default(), |n| async move { n * 2 }).await;
        assert_eq!(gathered.len(), items.len());
        let mut doubled: Vec<u32> = gathered
            .into_iter()
            .map(|g| g.outcome.expect("no deadline hit"))
            .collect();
        doubled.sort_unstable();
        assert_eq!(doubled, items.iter().map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        let gathered = scatter_gather(Vec::<u32>::new(), FanoutLimits::default(), |n| async move { n }).await;
        assert!(gathered.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_capped() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let limits = FanoutLimits {
            max_concurrency: Some(3),
            per_item_timeout: None,
        };

        let gathered = scatter_gather((0..10).collect::<Vec<u32>>(), limits, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(gathered.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_items_time_out_without_failing_the_rest() {
        let limits = FanoutLimits {
            max_concurrency: None,
            per_item_timeout: Some(Duration::from_secs(5)),
        };
        let gathered = scatter_gather(vec![1u64, 60], limits, |secs| async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            secs
        })
        .await;

        // Completion order: the fast item first.
        assert_eq!(gathered[0].item, 1);
        assert_eq!(gathered[0].outcome, Ok(1));
        assert_eq!(gathered[1].item, 60);
        assert_eq!(gathered[1].outcome, Err(TimedOut(Duration::from_secs(5))));
        assert_eq!(gathered[1].outcome.unwrap_err().to_string(), "timed out after 5s");
    }
}
