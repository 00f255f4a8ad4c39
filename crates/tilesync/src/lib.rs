//! Offline map tile synchronization.
//!
//! Given a position or a recorded track, this crate works out which raster
//! map tiles cover the surrounding area, asks the persistent cache which of
//! them are already stored, and hands the rest to a background caching agent
//! in small, paced batches so that the map can later be shown without a
//! network connection.
//!
//! # Design principles
//!
//! - **Addresses are keys**: A tile is identified by its full URL, so the
//!   diff, the agent messages and the cache all agree on identity
//! - **Fire and forget**: The scheduler does not wait for the agent by
//!   default; lost batches are counted, never raised
//! - **Idempotent**: Storing a tile twice is harmless, so overlapping
//!   synchronizations only cost duplicate downloads
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilesync::{CACHE_NAMESPACE, CachingAgent, FilesystemCache, GeoPoint, HttpFetcher, SyncConfig, Synchronizer};
//!
//! let cache = Arc::new(FilesystemCache::open("./tiles", CACHE_NAMESPACE).await?);
//! let agent = tilesync::spawn_agent(CachingAgent::new(Arc::clone(&cache), HttpFetcher::new()));
//!
//! let sync = Synchronizer::new(cache, agent.link(), SyncConfig::default())?;
//! let report = sync.sync_around(GeoPoint::new(35.681_236, 139.767_125)).await?;
//!
//! // Let the agent finish what it was sent.
//! agent.shutdown().await;
//! ```

pub mod address;
pub mod agent;
pub mod cache;
pub mod config;
pub mod coords;
pub mod diff;
mod error;
pub mod protocol;
pub mod scheduler;
pub mod sync;
pub mod tileset;
pub mod track;

pub use address::{TileAddress, TileTemplate};
pub use agent::{AgentHandle, CachingAgent, Fetcher, HttpFetcher, spawn_agent};
pub use cache::{CACHE_NAMESPACE, Cache, FilesystemCache, MemoryCache, StorageEstimate};
pub use config::{DeliveryMode, SyncConfig};
pub use coords::{GeoPoint, TileCoordinate, map_to_tile, tile_to_lat_lon};
pub use diff::diff_against_cache;
pub use error::{Error, Result};
pub use protocol::{AgentLink, BatchOutcome, ChannelLink, Command, DetachedLink, Envelope};
pub use scheduler::{BatchScheduler, ScheduleReport};
pub use sync::{SyncMachine, SyncPhase, SyncReport, Synchronizer};
pub use tileset::{TileSet, build_tile_set};
pub use track::parse_gpx;
