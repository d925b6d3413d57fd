//! Keeps the on-disk chain and the metrics in step with the ledger.
//!
//! One task subscribes to [`LedgerEvent`]s. After every mutation it writes
//! the full chain snapshot; if it falls behind the broadcast channel it
//! writes a snapshot anyway, since the latest state is all that matters.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use quill_protocol::storage::{Chain, Ledger, LedgerDb, LedgerEvent};

use crate::metrics::NodeMetrics;

/// The chain to start from: the stored one if it is present and valid,
/// genesis otherwise.
pub fn restore_chain(db: &LedgerDb) -> Chain {
    match db.load_chain() {
        Ok(Some(blocks)) => {
            let len = blocks.len();
            match Chain::from_blocks(blocks) {
                Ok(chain) => {
                    tracing::info!(len, "restored chain from disk");
                    chain
                }
                Err(err) => {
                    tracing::warn!(%err, len, "stored chain is invalid, starting from genesis");
                    Chain::new()
                }
            }
        }
        Ok(None) => {
            tracing::info!("no stored chain, starting from genesis");
            Chain::new()
        }
        Err(err) => {
            tracing::warn!(%err, "failed to read stored chain, starting from genesis");
            Chain::new()
        }
    }
}

/// Write the current snapshot. sled's batch and flush block, so they run on
/// the blocking pool.
async fn persist(ledger: &Ledger, db: &LedgerDb) {
    let snapshot = ledger.snapshot();
    let len = snapshot.len();
    let db = db.clone();
    match tokio::task::spawn_blocking(move || db.put_chain(&snapshot)).await {
        Ok(Ok(())) => tracing::debug!(len, "chain persisted"),
        Ok(Err(err)) => tracing::error!(%err, "failed to persist chain"),
        Err(err) => tracing::error!(%err, "chain persistence task failed"),
    }
}

/// React to one receive from the event channel. Returns `false` once the
/// channel is closed.
async fn step(
    ledger: &Ledger,
    db: &LedgerDb,
    metrics: &NodeMetrics,
    received: Result<LedgerEvent, RecvError>,
) -> bool {
    match received {
        Ok(event) => {
            metrics.observe(&event, ledger.len());
            if event.is_mutation() {
                persist(ledger, db).await;
            }
            true
        }
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "persistence fell behind ledger events");
            metrics.chain_length.set(ledger.len() as i64);
            persist(ledger, db).await;
            true
        }
        Err(RecvError::Closed) => false,
    }
}

/// Runs until the ledger's event channel closes.
pub async fn run(
    ledger: Ledger,
    db: LedgerDb,
    metrics: Arc<NodeMetrics>,
    mut events: broadcast::Receiver<LedgerEvent>,
) {
    metrics.chain_length.set(ledger.len() as i64);

    while step(&ledger, &db, &metrics, events.recv().await).await {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_protocol::storage::{Block, Payload};
    use std::time::Duration;

    #[test]
    fn restore_falls_back_to_genesis() {
        let db = LedgerDb::open_temporary().unwrap();
        assert_eq!(restore_chain(&db).len(), 1);

        let mut chain = Chain::new();
        chain.append_new("1", Payload::text("a"));
        chain.append_new("2", Payload::text("b"));
        db.put_chain(chain.blocks()).unwrap();
        assert_eq!(restore_chain(&db).blocks(), chain.blocks());

        let mut broken = chain.into_blocks();
        let declared = broken[2].hash().to_string();
        let previous = broken[1].hash().to_string();
        broken[2] = Block::from_parts(2, "2", Payload::text("edited"), previous, declared);
        db.put_chain(&broken).unwrap();
        let restored = restore_chain(&db);
        assert_eq!(restored.len(), 1);
        assert!(restored.tip().is_genesis());
    }

    #[tokio::test]
    async fn mutations_are_written_to_disk() {
        let ledger = Ledger::new();
        let db = LedgerDb::open_temporary().unwrap();
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let task = tokio::spawn(run(
            ledger.clone(),
            db.clone(),
            Arc::clone(&metrics),
            ledger.subscribe(),
        ));

        ledger.submit("1", Payload::text("one"));
        ledger.submit("2", Payload::text("two"));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while db.stored_length().unwrap() != Some(3) {
            assert!(tokio::time::Instant::now() < deadline, "chain never persisted");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(db.load_chain().unwrap(), Some(ledger.snapshot()));
        assert_eq!(metrics.posts_submitted_total.get(), 2);

        task.abort();
    }

    #[tokio::test]
    async fn lag_writes_the_latest_snapshot() {
        let ledger = Ledger::new();
        let db = LedgerDb::open_temporary().unwrap();
        let metrics = NodeMetrics::new().unwrap();
        ledger.submit("1", Payload::text("one"));
        ledger.submit("2", Payload::text("two"));

        assert!(step(&ledger, &db, &metrics, Err(RecvError::Lagged(2))).await);
        assert_eq!(db.stored_length().unwrap(), Some(3));
        assert_eq!(db.load_chain().unwrap(), Some(ledger.snapshot()));
        assert_eq!(metrics.chain_length.get(), 3);

        assert!(!step(&ledger, &db, &metrics, Err(RecvError::Closed)).await);
    }

    #[tokio::test]
    async fn flooded_subscriber_catches_up() {
        use quill_protocol::config::LEDGER_EVENT_CAPACITY;

        let ledger = Ledger::new();
        let db = LedgerDb::open_temporary().unwrap();
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let events = ledger.subscribe();
        for i in 0..=LEDGER_EVENT_CAPACITY {
            ledger.submit(i.to_string(), Payload::text("burst"));
        }

        let task = tokio::spawn(run(ledger.clone(), db.clone(), metrics, events));
        let expected = Some(ledger.len() as u64);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while db.stored_length().unwrap() != expected {
            assert!(tokio::time::Instant::now() < deadline, "chain never persisted");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(db.load_chain().unwrap(), Some(ledger.snapshot()));

        task.abort();
    }
}
