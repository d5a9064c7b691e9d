//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

use crate::height::{BlockHeight, EventIndex};

/// Block / extrinsic hash as returned by the node (`0x…`).
pub type Hash = String;

// ─── Node-facing types ────────────────────────────────────────────────────────

/// A block header, enough to follow the chain tip and link blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block number.
    pub number: BlockHeight,
    /// Block hash (`0x…`).
    pub hash: Hash,
    /// Parent block hash (`0x…`).
    pub parent_hash: Hash,
}

/// When, relative to block execution, an event was deposited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Emitted while applying the extrinsic at this position in the block.
    ApplyExtrinsic(u32),
    /// Emitted while finalizing the block.
    Finalization,
    /// Emitted while initializing the block.
    Initialization,
}

impl Phase {
    /// Position of the extrinsic that emitted the event, if any.
    pub fn extrinsic_index(&self) -> Option<u32> {
        match self {
            Self::ApplyExtrinsic(i) => Some(*i),
            _ => None,
        }
    }
}

/// A transaction or inherent included in a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extrinsic {
    /// Extrinsic hash.
    pub hash: Hash,
    /// Pallet / module name (e.g. `"balances"`).
    pub section: String,
    /// Call name (e.g. `"transfer"`).
    pub method: String,
    /// Signer account, `None` for inherents and unsigned extrinsics.
    pub signer: Option<String>,
    /// Decoded call arguments.
    pub args: serde_json::Value,
}

/// Decoded event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Pallet / module name (e.g. `"balances"`).
    pub section: String,
    /// Event variant (e.g. `"Transfer"`).
    pub method: String,
    /// Event fields.
    pub data: serde_json::Value,
}

/// One entry of the `System.Events` storage of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub phase: Phase,
    pub event: RawEvent,
    #[serde(default)]
    pub topics: Vec<Hash>,
}

/// A full block: header plus its extrinsics, in block order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub header: Header,
    pub extrinsics: Vec<Extrinsic>,
}

// ─── QueryEvent ───────────────────────────────────────────────────────────────

/// A single on-chain event, reconciled with the extrinsic that produced it.
///
/// Built once by the block producer and handed downstream by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvent {
    /// The event as read from the node.
    pub event_record: EventRecord,
    /// Height of the block the event belongs to.
    pub block_number: BlockHeight,
    /// The extrinsic whose application emitted the event.
    pub extrinsic: Option<Extrinsic>,
    /// Position of the event inside its block.
    pub index: EventIndex,
}

impl QueryEvent {
    pub fn new(
        event_record: EventRecord,
        block_number: BlockHeight,
        index: EventIndex,
        extrinsic: Option<Extrinsic>,
    ) -> Self {
        Self {
            event_record,
            block_number,
            extrinsic,
            index,
        }
    }

    /// Handler lookup key: `"<section>.<method>"`, e.g. `"balances.Transfer"`.
    pub fn event_type(&self) -> String {
        format!(
            "{}.{}",
            self.event_record.event.section, self.event_record.event.method
        )
    }

    pub fn phase(&self) -> Phase {
        self.event_record.phase
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.event_record.event.data
    }

    /// Emit a debug trace describing the event.
    pub fn log(&self) {
        let extrinsic = self
            .extrinsic
            .as_ref()
            .map(|x| format!("{}.{}", x.section, x.method))
            .unwrap_or_else(|| "-".into());
        tracing::debug!(
            block = %self.block_number,
            index = %self.index,
            event = %self.event_type(),
            phase = ?self.event_record.phase,
            %extrinsic,
            "query event"
        );
    }
}

// ─── QueryEventBlock ──────────────────────────────────────────────────────────

/// All (remaining) events of one block, in on-chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEventBlock {
    pub block_number: BlockHeight,
    pub block_hash: Hash,
    pub query_events: Vec<QueryEvent>,
    /// Set on the first block of a run that resumed mid-block: events up to
    /// this index were handled by an earlier run and are not in the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_after: Option<EventIndex>,
}

impl QueryEventBlock {
    pub fn new(block_number: BlockHeight, block_hash: Hash, query_events: Vec<QueryEvent>) -> Self {
        Self {
            block_number,
            block_hash,
            query_events,
            resumed_after: None,
        }
    }

    pub fn len(&self) -> usize {
        self.query_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.query_events.is_empty()
    }

    /// Index of the last event in the batch.
    pub fn last_index(&self) -> Option<&EventIndex> {
        self.query_events.last().map(|e| &e.index)
    }

    /// Index of the last event of this block handled so far, counting events
    /// dropped on resume.
    pub fn handled_through(&self) -> Option<&EventIndex> {
        self.last_index().or(self.resumed_after.as_ref())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
