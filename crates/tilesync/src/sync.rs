//! Synchronization entry points.
//!
//! A call walks a single-shot state machine:
//!
//! ```text
//! Idle → Parsed → TileSetBuilt → Diffed → Done
//!                                       ↘ SendingBatch(0) → Pausing(0) → SendingBatch(1) → … → Done
//! ```
//!
//! A structural error aborts the call wherever it happens; there is no
//! failure state and no way back to an earlier phase.

use std::sync::Arc;

use crate::address::TileTemplate;
use crate::cache::Cache;
use crate::config::SyncConfig;
use crate::coords::GeoPoint;
use crate::diff::diff_against_cache;
use crate::error::Result;
use crate::protocol::AgentLink;
use crate::scheduler::{BatchScheduler, ScheduleReport};
use crate::tileset::build_tile_set;
use crate::track::parse_gpx;

/// Phase of one synchronization call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing has happened yet.
    Idle,
    /// The geographic input has been turned into points.
    Parsed,
    /// The deduplicated tile set has been built.
    TileSetBuilt,
    /// The tile set has been diffed against the cache.
    Diffed,
    /// Batch `i` is being handed to the agent.
    SendingBatch(usize),
    /// Pausing after batch `i`.
    Pausing(usize),
    /// The call has finished.
    Done,
}

impl SyncPhase {
    fn can_enter(self, next: SyncPhase) -> bool {
        use SyncPhase::{Diffed, Done, Idle, Parsed, Pausing, SendingBatch, TileSetBuilt};
        match (self, next) {
            (Idle, Parsed)
            | (Parsed, TileSetBuilt)
            | (TileSetBuilt, Diffed)
            | (Diffed, SendingBatch(0))
            | (Diffed | Pausing(_), Done) => true,
            (SendingBatch(i), Pausing(j)) => i == j,
            (Pausing(i), SendingBatch(j)) => j == i + 1,
            _ => false,
        }
    }
}

/// Tracks the phases one call has been through.
#[derive(Debug, Clone)]
pub struct SyncMachine {
    history: Vec<SyncPhase>,
}

impl SyncMachine {
    /// A machine in [`SyncPhase::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(SyncPhase::Idle)
    }

    /// A machine that starts part-way through a call.
    #[must_use]
    pub fn starting_at(phase: SyncPhase) -> Self {
        Self {
            history: vec![phase],
        }
    }

    /// The current phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.history.last().copied().unwrap_or(SyncPhase::Idle)
    }

    /// Every phase entered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[SyncPhase] {
        &self.history
    }

    pub(crate) fn enter(&mut self, next: SyncPhase) {
        let current = self.phase();
        debug_assert!(
            current.can_enter(next),
            "invalid sync transition {current:?} -> {next:?}"
        );
        tracing::trace!(from = ?current, to = ?next, "sync phase");
        self.history.push(next);
    }
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one synchronization call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Points the tile set was built from.
    pub points: usize,
    /// Unique tiles covering the input.
    pub candidates: usize,
    /// Tiles not yet cached when the call diffed.
    pub missing: usize,
    /// What happened to the batches.
    pub schedule: ScheduleReport,
}

/// Runs synchronization calls against one cache and one caching agent.
///
/// Calls are independent: two calls running at the same time each diff the
/// cache on their own and may both send the same tile. The agent's cache
/// writes are idempotent, so this only costs duplicate downloads.
pub struct Synchronizer<C, L> {
    cache: Arc<C>,
    link: L,
    template: TileTemplate,
    config: SyncConfig,
}

impl<C: Cache, L: AgentLink + Clone> Synchronizer<C, L> {
    /// Create a synchronizer with the default tile template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if
    /// `config` fails validation.
    pub fn new(cache: Arc<C>, link: L, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            link,
            template: TileTemplate::default(),
            config,
        })
    }

    /// Use a different tile server.
    #[must_use]
    pub fn with_template(mut self, template: TileTemplate) -> Self {
        self.template = template;
        self
    }

    /// The configuration every call uses.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Cache the neighbourhood of a single position, e.g. the device's
    /// current location.
    pub async fn sync_around(&self, point: GeoPoint) -> Result<SyncReport> {
        self.sync_points(&[point]).await
    }

    /// Cache the neighbourhood of every point of a GPX track.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Track`](crate::Error::Track) if the GPX text cannot
    /// be parsed, before the cache is touched.
    pub async fn sync_track(&self, gpx: &str) -> Result<SyncReport> {
        let points = parse_gpx(gpx)?;
        self.sync_points(&points).await
    }

    /// Cache the neighbourhood of every point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRangeInput`](crate::Error::OutOfRangeInput) if
    /// a point cannot be projected (before any cache access), or
    /// [`Error::CacheUnavailable`](crate::Error::CacheUnavailable) if the
    /// cache cannot be queried. Delivery problems are reported in the
    /// [`ScheduleReport`], not as errors.
    pub async fn sync_points(&self, points: &[GeoPoint]) -> Result<SyncReport> {
        let mut machine = SyncMachine::new();
        machine.enter(SyncPhase::Parsed);

        let tiles = build_tile_set(points, self.config.zoom, self.config.radius, &self.template)?;
        machine.enter(SyncPhase::TileSetBuilt);

        let missing = diff_against_cache(&tiles, self.cache.as_ref()).await?;
        machine.enter(SyncPhase::Diffed);

        tracing::info!(
            points = points.len(),
            tiles = tiles.len(),
            missing = missing.len(),
            zoom = self.config.zoom,
            radius = self.config.radius,
            "synchronizing tiles"
        );

        let missing_count = missing.len();
        let scheduler = BatchScheduler::from_config(self.link.clone(), &self.config);
        let schedule = scheduler.run(missing, &mut machine).await;

        Ok(SyncReport {
            points: points.len(),
            candidates: tiles.len(),
            missing: missing_count,
            schedule,
        })
    }
}
