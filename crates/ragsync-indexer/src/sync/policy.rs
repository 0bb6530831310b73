//! Incremental vs full rebuild decision.

use crate::storage::StoredMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a synchronization run treats existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Incremental,
    Full,
}

/// Why a full rebuild was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FullReason {
    NoPriorState,
    CorruptState { message: String },
    SourceChanged { previous: String, current: String },
    EmbeddingChanged { previous: String, current: String },
    Forced,
}

impl fmt::Display for FullReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FullReason::NoPriorState => write!(f, "no previous index state"),
            FullReason::CorruptState { message } => write!(f, "stored state unreadable: {}", message),
            FullReason::SourceChanged { previous, current } => {
                write!(f, "source changed from {} to {}", previous, current)
            }
            FullReason::EmbeddingChanged { previous, current } => {
                write!(f, "embedding changed from {} to {}", previous, current)
            }
            FullReason::Forced => write!(f, "full rebuild requested"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildDecision {
    Incremental,
    Full(FullReason),
}

impl RebuildDecision {
    pub fn mode(&self) -> BuildMode {
        match self {
            RebuildDecision::Incremental => BuildMode::Incremental,
            RebuildDecision::Full(_) => BuildMode::Full,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, RebuildDecision::Full(_))
    }

    pub fn reason(&self) -> Option<&FullReason> {
        match self {
            RebuildDecision::Full(reason) => Some(reason),
            RebuildDecision::Incremental => None,
        }
    }
}

/// Decides the rebuild mode before any per-file work happens.
#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildPolicy {
    force_full: bool,
}

impl RebuildPolicy {
    pub fn new(force_full: bool) -> Self {
        Self { force_full }
    }

    pub fn decide(
        &self,
        stored: &StoredMap,
        source_fingerprint: &str,
        embed_fingerprint: &str,
    ) -> RebuildDecision {
        let map = match stored {
            StoredMap::Absent => return RebuildDecision::Full(FullReason::NoPriorState),
            StoredMap::Corrupt(message) => {
                return RebuildDecision::Full(FullReason::CorruptState {
                    message: message.clone(),
                })
            }
            StoredMap::Loaded(map) => map,
        };

        if map.source_fingerprint != source_fingerprint {
            return RebuildDecision::Full(FullReason::SourceChanged {
                previous: map.source_fingerprint.clone(),
                current: source_fingerprint.to_string(),
            });
        }

        if map.embed_fingerprint != embed_fingerprint {
            return RebuildDecision::Full(FullReason::EmbeddingChanged {
                previous: map.embed_fingerprint.clone(),
                current: embed_fingerprint.to_string(),
            });
        }

        if self.force_full {
            return RebuildDecision::Full(FullReason::Forced);
        }

        RebuildDecision::Incremental
    }
}
