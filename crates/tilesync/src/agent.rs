//! The caching agent: fetches tiles and writes them into the shared cache.
//!
//! The agent runs as its own task and only talks to the engine through
//! [`Envelope`]s. Each `CACHE_FILES` command is handled atomically: the
//! addresses not yet cached are all fetched first, and only if every fetch
//! succeeded are they stored. A single failed tile discards the whole batch.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinHandle;

use crate::address::TileAddress;
use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::protocol::{BatchOutcome, ChannelLink, Command, Envelope};

/// User agent for tile requests.
const USER_AGENT: &str = concat!("tilesync/", env!("CARGO_PKG_VERSION"));

/// Future type for tile fetches.
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Retrieves tile bytes from wherever tiles come from.
pub trait Fetcher: Send + Sync {
    /// Fetch the tile at `address`.
    fn fetch<'a>(&'a self, address: &'a TileAddress) -> FetchFuture<'a>;
}

/// Fetches tiles over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher with a custom HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, address: &'a TileAddress) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = address.as_str();
            tracing::debug!(url, "fetching");

            let response = self
                .http
                .get(url)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .send()
                .await
                .map_err(|e| Error::Http {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let data = response.bytes().await.map_err(|e| Error::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            Ok(data.to_vec())
        })
    }
}

/// Fetches requested tiles and stores them in the shared cache.
pub struct CachingAgent<C, F> {
    cache: C,
    fetcher: F,
}

impl<C: Cache, F: Fetcher> CachingAgent<C, F> {
    /// Create an agent writing into `cache`.
    #[must_use]
    pub fn new(cache: C, fetcher: F) -> Self {
        Self { cache, fetcher }
    }

    /// Fetch and store every address not already cached.
    ///
    /// The agent checks each address against the cache itself rather than
    /// trusting the sender's diff, since another batch may have stored some
    /// of these tiles in the meantime. Returns the number of tiles newly
    /// stored.
    ///
    /// # Errors
    ///
    /// Fails if the cache cannot be read or written, or if any fetch fails.
    /// In the latter case nothing from this batch is stored.
    pub async fn cache_files(&self, addresses: &[TileAddress]) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut pending: Vec<&TileAddress> = Vec::with_capacity(addresses.len());
        for address in addresses {
            if seen.insert(address) && !self.cache.contains(address).await? {
                pending.push(address);
            }
        }

        let mut fetched = Vec::with_capacity(pending.len());
        for address in pending {
            let data = self.fetcher.fetch(address).await?;
            fetched.push((address, data));
        }

        let mut stored: Vec<&TileAddress> = Vec::with_capacity(fetched.len());
        for (address, data) in fetched {
            if let Err(e) = self.cache.put(address, data).await {
                self.roll_back(&stored).await;
                return Err(e);
            }
            stored.push(address);
        }

        Ok(stored.len())
    }

    async fn roll_back(&self, stored: &[&TileAddress]) {
        for address in stored {
            if let Err(e) = self.cache.remove(address).await {
                tracing::warn!(%address, error = %e, "failed to roll back partially stored batch");
            }
        }
    }

    /// Execute one envelope, replying if the sender asked for it.
    pub async fn handle(&self, envelope: Envelope) {
        let Envelope { command, reply } = envelope;

        let outcome = match &command {
            Command::CacheFiles { addresses } => match self.cache_files(addresses).await {
                Ok(count) => {
                    tracing::debug!(requested = addresses.len(), stored = count, "batch stored");
                    BatchOutcome::Stored { count }
                }
                Err(e) => {
                    tracing::warn!(requested = addresses.len(), error = %e, "batch discarded");
                    BatchOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        };

        if let Some(reply) = reply {
            // The sender may have given up waiting; that is its business.
            let _ = reply.send(outcome).await;
        }
    }

    /// Process envelopes until the channel is closed and drained.
    pub async fn run(self, rx: async_channel::Receiver<Envelope>) {
        while let Ok(envelope) = rx.recv().await {
            self.handle(envelope).await;
        }
        tracing::debug!("caching agent stopped");
    }
}

/// A running caching agent.
pub struct AgentHandle {
    link: ChannelLink,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// A link for posting batches to this agent.
    #[must_use]
    pub fn link(&self) -> ChannelLink {
        self.link.clone()
    }

    /// Stop accepting batches and wait until every queued batch has been
    /// processed.
    pub async fn shutdown(self) {
        self.link.close();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "caching agent task failed");
        }
    }
}

/// Run `agent` as a task on the current tokio runtime.
#[must_use]
pub fn spawn_agent<C, F>(agent: CachingAgent<C, F>) -> AgentHandle
where
    C: Cache + 'static,
    F: Fetcher + 'static,
{
    let (tx, rx) = async_channel::unbounded();
    let task = tokio::spawn(agent.run(rx));
    AgentHandle {
        link: ChannelLink::new(tx),
        task,
    }
}
