//! Paced, batched handoff of missing tiles to the caching agent.
//!
//! Batches are sent strictly one after another with a pause after each.
//! In [`DeliveryMode::FireAndForget`] the scheduler never waits for the
//! agent: a batch nobody can take is dropped, and the pacing carries on
//! regardless. [`DeliveryMode::Acknowledged`] instead waits for the agent's
//! outcome and retries with a linear backoff.

use std::time::Duration;

use crate::address::TileAddress;
use crate::config::{DeliveryMode, SyncConfig};
use crate::protocol::{AgentLink, BatchOutcome, Command, Envelope};
use crate::sync::{SyncMachine, SyncPhase};

/// What happened to the batches of one call.
///
/// In fire-and-forget mode `batches_sent` only means the agent accepted the
/// envelope, not that anything was stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Number of batches the missing list was split into.
    pub batches_total: usize,
    /// Batches handed to (or, when acknowledged, stored by) the agent.
    pub batches_sent: usize,
    /// Batches that found no reachable agent.
    pub batches_dropped: usize,
    /// Batches the agent reported as failed after every attempt.
    pub batches_failed: usize,
    /// Addresses contained in sent batches.
    pub addresses_sent: usize,
    /// Informational estimate of the call's duration, in whole seconds.
    pub estimated_secs: u64,
}

/// Split `missing` into contiguous batches of at most `batch_size`,
/// preserving order. A `batch_size` of 0 is treated as 1.
#[must_use]
pub fn partition(missing: Vec<TileAddress>, batch_size: usize) -> Vec<Vec<TileAddress>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(missing.len().div_ceil(batch_size));
    let mut iter = missing.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}

/// `ceil(batch_count * delay)` in whole seconds.
#[must_use]
pub fn estimated_duration(batch_count: usize, delay: Duration) -> u64 {
    let total_ms = delay.as_millis() * batch_count as u128;
    u64::try_from(total_ms.div_ceil(1000)).unwrap_or(u64::MAX)
}

enum Delivery {
    Sent,
    Dropped,
    Failed,
}

/// Sends batches of missing addresses to a caching agent.
pub struct BatchScheduler<L> {
    link: L,
    batch_size: usize,
    delay: Duration,
    delivery: DeliveryMode,
}

impl<L: AgentLink> BatchScheduler<L> {
    /// Create a fire-and-forget scheduler.
    #[must_use]
    pub fn new(link: L, batch_size: usize, delay: Duration) -> Self {
        Self {
            link,
            batch_size: batch_size.max(1),
            delay,
            delivery: DeliveryMode::FireAndForget,
        }
    }

    /// Create a scheduler from a synchronization config.
    #[must_use]
    pub fn from_config(link: L, config: &SyncConfig) -> Self {
        Self::new(link, config.batch_size, config.delay).with_delivery(config.delivery)
    }

    /// Change the delivery mode.
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Send `missing` to the agent, starting a fresh state machine at
    /// [`SyncPhase::Diffed`].
    pub async fn schedule(&self, missing: Vec<TileAddress>) -> ScheduleReport {
        let mut machine = SyncMachine::starting_at(SyncPhase::Diffed);
        self.run(missing, &mut machine).await
    }

    /// Send `missing` to the agent, advancing `machine` through the
    /// sending and pausing phases.
    pub async fn run(&self, missing: Vec<TileAddress>, machine: &mut SyncMachine) -> ScheduleReport {
        if missing.is_empty() {
            machine.enter(SyncPhase::Done);
            return ScheduleReport::default();
        }

        let address_count = missing.len();
        let batches = partition(missing, self.batch_size);
        let mut report = ScheduleReport {
            batches_total: batches.len(),
            estimated_secs: estimated_duration(batches.len(), self.delay),
            ..ScheduleReport::default()
        };

        tracing::info!(
            addresses = address_count,
            batches = report.batches_total,
            estimated_secs = report.estimated_secs,
            "sending tiles to caching agent"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            machine.enter(SyncPhase::SendingBatch(index));
            let len = batch.len();

            let delivery = match self.delivery {
                DeliveryMode::FireAndForget => self.post_once(batch),
                DeliveryMode::Acknowledged {
                    max_attempts,
                    backoff,
                } => self.post_acknowledged(batch, max_attempts, backoff).await,
            };

            match delivery {
                Delivery::Sent => {
                    report.batches_sent += 1;
                    report.addresses_sent += len;
                }
                Delivery::Dropped => {
                    tracing::debug!(batch = index, addresses = len, "no caching agent, batch dropped");
                    report.batches_dropped += 1;
                }
                Delivery::Failed => report.batches_failed += 1,
            }

            machine.enter(SyncPhase::Pausing(index));
            tokio::time::sleep(self.delay).await;
        }

        machine.enter(SyncPhase::Done);

        tracing::info!(
            sent = report.batches_sent,
            dropped = report.batches_dropped,
            failed = report.batches_failed,
            "finished sending tiles"
        );

        report
    }

    fn post_once(&self, batch: Vec<TileAddress>) -> Delivery {
        let envelope = Envelope::fire_and_forget(Command::CacheFiles { addresses: batch });
        match self.link.post(envelope) {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Dropped,
        }
    }

    async fn post_acknowledged(
        &self,
        batch: Vec<TileAddress>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Delivery {
        let mut last = Delivery::Dropped;

        for attempt in 1..=max_attempts.max(1) {
            let (envelope, rx) = Envelope::acknowledged(Command::CacheFiles {
                addresses: batch.clone(),
            });

            last = match self.link.post(envelope) {
                Err(_) => Delivery::Dropped,
                Ok(()) => match rx.recv().await {
                    Ok(BatchOutcome::Stored { .. }) => return Delivery::Sent,
                    Ok(BatchOutcome::Failed { reason }) => {
                        tracing::warn!(attempt, %reason, "caching agent failed batch");
                        Delivery::Failed
                    }
                    Err(_) => {
                        tracing::warn!(attempt, "caching agent went away before replying");
                        Delivery::Failed
                    }
                },
            };

            if attempt < max_attempts {
                tokio::time::sleep(backoff * attempt).await;
            }
        }

        last
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::{CachingAgent, spawn_agent, tests::StubFetcher};
    use crate::cache::{Cache, MemoryCache};
    use crate::protocol::{DetachedLink, Undelivered};
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    /// Records every envelope it is given, along with when it arrived.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingLink {
        pub(crate) received: Arc<Mutex<Vec<(tokio::time::Instant, Command)>>>,
    }

    impl RecordingLink {
        pub(crate) fn batches(&self) -> Vec<Vec<TileAddress>> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .map(|(_, command)| command.addresses().to_vec())
                .collect()
        }
    }

    impl AgentLink for RecordingLink {
        fn is_reachable(&self) -> bool {
            true
        }

        fn post(&self, envelope: Envelope) -> Result<(), Undelivered> {
            self.received
                .lock()
                .unwrap()
                .push((tokio::time::Instant::now(), envelope.command));
            Ok(())
        }
    }

    fn addrs(n: usize) -> Vec<TileAddress> {
        (0..n)
            .map(|i| TileAddress::new(format!("https://t/15/{i}/0.png")))
            .collect()
    }

    #[test]
    fn test_partition_sizes() {
        let batches = partition(addrs(7), 3);
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, [3, 3, 1]);
    }

    #[test]
    fn test_partition_empty() {
        assert!(partition(Vec::new(), 4).is_empty());
    }

    #[test]
    fn test_estimated_duration() {
        assert_eq!(estimated_duration(9, Duration::from_millis(1000)), 9);
        assert_eq!(estimated_duration(3, Duration::from_millis(500)), 2);
        assert_eq!(estimated_duration(5, Duration::ZERO), 0);
        assert_eq!(estimated_duration(0, Duration::from_secs(1)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_sends_nothing_and_does_not_pause() {
        let link = RecordingLink::default();
        let scheduler = BatchScheduler::new(link.clone(), 1, Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let report = scheduler.schedule(Vec::new()).await;

        assert_eq!(report, ScheduleReport::default());
        assert!(link.batches().is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_sent_in_order_and_paced() {
        let link = RecordingLink::default();
        let scheduler = BatchScheduler::new(link.clone(), 2, Duration::from_secs(1));

        let start = tokio::time::Instant::now();
        let report = scheduler.schedule(addrs(5)).await;

        assert_eq!(report.batches_total, 3);
        assert_eq!(report.batches_sent, 3);
        assert_eq!(report.addresses_sent, 5);
        assert_eq!(report.estimated_secs, 3);
        assert_eq!(link.batches().concat(), addrs(5));

        let offsets: Vec<_> = link
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|(at, _)| at.duration_since(start))
            .collect();
        assert_eq!(
            offsets,
            [
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
        // Pauses after the last batch too.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_agent_drops_batches_but_keeps_pacing() {
        let scheduler = BatchScheduler::new(DetachedLink, 1, Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        let report = scheduler.schedule(addrs(4)).await;

        assert_eq!(report.batches_total, 4);
        assert_eq!(report.batches_sent, 0);
        assert_eq!(report.batches_dropped, 4);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_machine_walks_forward() {
        let scheduler = BatchScheduler::new(RecordingLink::default(), 1, Duration::ZERO);
        let mut machine = SyncMachine::starting_at(SyncPhase::Diffed);

        scheduler.run(addrs(2), &mut machine).await;

        assert_eq!(
            machine.history(),
            [
                SyncPhase::Diffed,
                SyncPhase::SendingBatch(0),
                SyncPhase::Pausing(0),
                SyncPhase::SendingBatch(1),
                SyncPhase::Pausing(1),
                SyncPhase::Done,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_delivery_waits_for_agent() {
        let cache = MemoryCache::new();
        let agent = spawn_agent(CachingAgent::new(cache.clone(), StubFetcher::default()));
        let scheduler = BatchScheduler::new(agent.link(), 2, Duration::ZERO).with_delivery(
            DeliveryMode::Acknowledged {
                max_attempts: 3,
                backoff: Duration::from_millis(100),
            },
        );

        let report = scheduler.schedule(addrs(3)).await;

        // Every batch was stored before `schedule` returned.
        assert_eq!(report.batches_sent, 2);
        assert_eq!(cache.len(), 3);
        agent.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_delivery_retries_then_reports_failure() {
        let fetcher = StubFetcher::failing_on("/1/");
        let agent = spawn_agent(CachingAgent::new(MemoryCache::new(), fetcher.clone()));
        let scheduler = BatchScheduler::new(agent.link(), 1, Duration::ZERO).with_delivery(
            DeliveryMode::Acknowledged {
                max_attempts: 3,
                backoff: Duration::from_millis(100),
            },
        );

        let start = tokio::time::Instant::now();
        let report = scheduler.schedule(addrs(2)).await;

        assert_eq!(report.batches_sent, 1);
        assert_eq!(report.batches_failed, 1);
        // One fetch for batch 0, three attempts for batch 1.
        assert_eq!(fetcher.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
        // Backoff of 100ms then 200ms between the three attempts.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        agent.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_delivery_without_agent_is_dropped() {
        let scheduler = BatchScheduler::new(DetachedLink, 1, Duration::ZERO).with_delivery(
            DeliveryMode::Acknowledged {
                max_attempts: 2,
                backoff: Duration::from_millis(10),
            },
        );

        let report = scheduler.schedule(addrs(1)).await;
        assert_eq!(report.batches_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_does_not_observe_agent_failure() {
        let cache = MemoryCache::new();
        let agent = spawn_agent(CachingAgent::new(
            cache.clone(),
            StubFetcher::failing_on("/0/"),
        ));
        let scheduler = BatchScheduler::new(agent.link(), 1, Duration::ZERO);

        let report = scheduler.schedule(addrs(2)).await;
        agent.shutdown().await;

        assert_eq!(report.batches_sent, 2);
        assert_eq!(report.batches_failed, 0);
        assert_eq!(cache.keys().await.unwrap(), vec![addrs(2)[1].clone()]);
    }

    proptest! {
        /// Property: partitioning yields ceil(N/B) batches whose concatenation is the input.
        #[test]
        fn prop_partition_law(n in 0usize..200, batch_size in 1usize..20) {
            let missing = addrs(n);
            let batches = partition(missing.clone(), batch_size);

            prop_assert_eq!(batches.len(), n.div_ceil(batch_size));
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= batch_size));
            prop_assert_eq!(batches.concat(), missing);
        }
    }
}
