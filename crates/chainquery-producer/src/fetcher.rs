//! Block fetcher: timeout-bounded access to the query service.
//!
//! The node client carries no timeouts of its own (a dropped WS connection can
//! leave a request pending forever), so every call is raced against
//! `fetch_timeout` and a timeout fails the whole attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chainquery_core::error::{IndexerError, QueryError};
use chainquery_core::height::{BlockHeight, EventIndex};
use chainquery_core::service::{HeaderStream, QueryService};
use chainquery_core::types::{EventRecord, Extrinsic, Hash, Header, QueryEvent};
use tracing::debug;

/// Everything fetched from the node for one block.
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub height: BlockHeight,
    pub hash: Hash,
    pub header: Header,
    pub records: Vec<EventRecord>,
    pub extrinsics: Vec<Extrinsic>,
}

impl FetchedBlock {
    /// Pair every event record with its extrinsic and position.
    pub fn into_query_events(self) -> Vec<QueryEvent> {
        reconcile(&self.height, self.records, &self.extrinsics)
    }
}

/// Wraps a [`QueryService`] and bounds every call by a timeout.
#[derive(Clone)]
pub struct BlockFetcher {
    query: Arc<dyn QueryService>,
    timeout: Duration,
}

impl BlockFetcher {
    pub fn new(query: Arc<dyn QueryService>, timeout: Duration) -> Self {
        Self { query, timeout }
    }

    /// Number of the latest finalized block.
    pub async fn chain_height(&self) -> Result<BlockHeight, QueryError> {
        self.bounded(self.query.finalized_height(), || {
            "failed to fetch the finalized height".into()
        })
        .await
    }

    /// Subscribe to new heads.
    pub async fn subscribe_new_heads(&self) -> Result<HeaderStream, QueryError> {
        self.bounded(self.query.subscribe_new_heads(), || {
            "failed to subscribe to new heads".into()
        })
        .await
    }

    /// Fetch hash, events and full block at `height`.
    ///
    /// Events and the block are requested concurrently once the hash is known.
    #[tracing::instrument(skip_all, fields(height = %height))]
    pub async fn fetch(&self, height: &BlockHeight) -> Result<FetchedBlock, IndexerError> {
        debug!("Fetching block");

        let hash = self
            .bounded(self.query.block_hash(height), || {
                format!("failed to fetch the block hash at height {height}")
            })
            .await?;
        debug!(%hash, "Got block hash");

        let (records, signed) = tokio::try_join!(
            self.bounded(self.query.events_at(&hash), || {
                format!("failed to fetch events for block {height}")
            }),
            self.bounded(self.query.block(&hash), || {
                format!("failed to fetch the block {height}")
            }),
        )?;
        debug!(events = records.len(), extrinsics = signed.extrinsics.len(), "Fetched full block");

        Ok(FetchedBlock {
            height: height.clone(),
            hash,
            header: signed.header,
            records,
            extrinsics: signed.extrinsics,
        })
    }

    async fn bounded<T, F>(&self, fut: F, what: impl FnOnce() -> String) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, QueryError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout {
                what: what(),
                ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Build the ordered [`QueryEvent`]s of a block.
///
/// An event gets `extrinsics[k]` attached only when its phase is
/// `ApplyExtrinsic(k)` and the extrinsic list is non-empty; genesis events
/// report an `ApplyExtrinsic` phase without any extrinsic in the block.
pub fn reconcile(
    height: &BlockHeight,
    records: Vec<EventRecord>,
    extrinsics: &[Extrinsic],
) -> Vec<QueryEvent> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let extrinsic = match record.phase.extrinsic_index() {
                Some(k) if !extrinsics.is_empty() => extrinsics.get(k as usize).cloned(),
                _ => None,
            };
            let event = QueryEvent::new(record, height.clone(), EventIndex::from(index), extrinsic);
            event.log();
            event
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainquery_core::types::{Phase, RawEvent};

    fn record(method: &str, phase: Phase) -> EventRecord {
        EventRecord {
            phase,
            event: RawEvent {
                section: "system".into(),
                method: method.into(),
                data: serde_json::Value::Null,
            },
            topics: vec![],
        }
    }

    fn extrinsic(method: &str) -> Extrinsic {
        Extrinsic {
            hash: format!("0x{method}"),
            section: "balances".into(),
            method: method.into(),
            signer: Some("alice".into()),
            args: serde_json::json!({}),
        }
    }

    #[test]
    fn attaches_extrinsic_by_phase() {
        let records = vec![
            record("NewAccount", Phase::Initialization),
            record("Transfer", Phase::ApplyExtrinsic(1)),
            record("Deposit", Phase::Finalization),
        ];
        let extrinsics = vec![extrinsic("timestamp"), extrinsic("transfer")];

        let events = reconcile(&5u64.into(), records, &extrinsics);
        assert_eq!(events.len(), 3);
        assert!(events[0].extrinsic.is_none());
        assert_eq!(events[1].extrinsic.as_ref(), Some(&extrinsics[1]));
        assert!(events[2].extrinsic.is_none());
        assert!(events.iter().all(|e| e.block_number == 5u64.into()));
    }

    #[test]
    fn no_extrinsic_when_list_empty() {
        let records = vec![record("Genesis", Phase::ApplyExtrinsic(0))];
        let events = reconcile(&0u64.into(), records, &[]);
        assert!(events[0].extrinsic.is_none());
    }

    #[test]
    fn indices_follow_record_order() {
        let records = (0..4).map(|_| record("Remarked", Phase::ApplyExtrinsic(0))).collect();
        let events = reconcile(&1u64.into(), records, &[extrinsic("remark")]);
        let indices: Vec<_> = events.iter().map(|e| e.index.to_u64().unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn out_of_range_extrinsic_is_absent() {
        let records = vec![record("Odd", Phase::ApplyExtrinsic(9))];
        let events = reconcile(&1u64.into(), records, &[extrinsic("only")]);
        assert!(events[0].extrinsic.is_none());
    }
}
