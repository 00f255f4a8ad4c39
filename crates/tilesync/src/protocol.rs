//! Messages between the batch scheduler and the caching agent.
//!
//! On the wire a batch is
//!
//! ```json
//! { "command": "CACHE_FILES", "addresses": ["https://…/15/29105/12903.png"] }
//! ```
//!
//! Delivery goes through an [`AgentLink`], the injected handle to "a
//! reachable caching agent". A link that cannot reach an agent refuses the
//! envelope and the scheduler decides what to do with it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::TileAddress;
use crate::error::Result;

/// A command understood by the caching agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Fetch and store every listed address not already cached, all or
    /// nothing.
    CacheFiles {
        /// Addresses in batch order.
        addresses: Vec<TileAddress>,
    },
}

impl Command {
    /// Encode as a JSON message.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`](crate::Error::Protocol) if the message is malformed or names an
    /// unknown command.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Addresses carried by the command.
    #[must_use]
    pub fn addresses(&self) -> &[TileAddress] {
        match self {
            Command::CacheFiles { addresses } => addresses,
        }
    }
}

/// What the agent did with one batch. Only produced when the sender asked
/// for an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every missing address of the batch was fetched and stored.
    Stored {
        /// Number of addresses newly stored (already cached ones excluded).
        count: usize,
    },
    /// Nothing from the batch was stored.
    Failed {
        /// Why the batch failed.
        reason: String,
    },
}

/// A command plus an optional reply channel.
#[derive(Debug)]
pub struct Envelope {
    /// The command to execute.
    pub command: Command,
    /// Where to send the [`BatchOutcome`], if the sender wants one.
    pub reply: Option<async_channel::Sender<BatchOutcome>>,
}

impl Envelope {
    /// An envelope nobody waits on.
    #[must_use]
    pub fn fire_and_forget(command: Command) -> Self {
        Self {
            command,
            reply: None,
        }
    }

    /// An envelope with a reply channel; the receiver yields the outcome.
    #[must_use]
    pub fn acknowledged(command: Command) -> (Self, async_channel::Receiver<BatchOutcome>) {
        let (tx, rx) = async_channel::bounded(1);
        (
            Self {
                command,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Returned by [`AgentLink::post`] when no agent could take the envelope.
#[derive(Debug)]
pub struct Undelivered(pub Envelope);

impl fmt::Display for Undelivered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no caching agent is reachable")
    }
}

impl std::error::Error for Undelivered {}

/// A handle to a caching agent.
pub trait AgentLink: Send + Sync {
    /// Whether an agent would accept an envelope right now.
    fn is_reachable(&self) -> bool;

    /// Hand an envelope to the agent without waiting for it to be processed.
    fn post(&self, envelope: Envelope) -> std::result::Result<(), Undelivered>;
}

impl<L: AgentLink + ?Sized> AgentLink for std::sync::Arc<L> {
    fn is_reachable(&self) -> bool {
        (**self).is_reachable()
    }

    fn post(&self, envelope: Envelope) -> std::result::Result<(), Undelivered> {
        (**self).post(envelope)
    }
}

/// A link backed by the channel of an in-process agent task.
///
/// Reachable while the agent's receiver is alive and the channel has not
/// been closed.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: async_channel::Sender<Envelope>,
}

impl ChannelLink {
    pub(crate) fn new(tx: async_channel::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// Stop accepting envelopes. Envelopes already queued are still
    /// delivered to the agent.
    pub fn close(&self) {
        self.tx.close();
    }
}

impl AgentLink for ChannelLink {
    fn is_reachable(&self) -> bool {
        !self.tx.is_closed()
    }

    fn post(&self, envelope: Envelope) -> std::result::Result<(), Undelivered> {
        self.tx.try_send(envelope).map_err(|e| Undelivered(e.into_inner()))
    }
}

/// A link with no agent behind it. Every post is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLink;

impl AgentLink for DetachedLink {
    fn is_reachable(&self) -> bool {
        false
    }

    fn post(&self, envelope: Envelope) -> std::result::Result<(), Undelivered> {
        Err(Undelivered(envelope))
    }
}
