//! Sync engine
//!
//! Owns the ordered collection of datapoints, re-parses every polled
//! buffer into them and routes inbound bus events to the matching point.
//! Points are identified positionally: the Nth record in the block is
//! always the Nth datapoint. Record boundaries are recomputed on every
//! scan because record sizes vary by type.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::codec;
use crate::datapoint::{Datapoint, DatapointSnapshot, PointContext, Rebind};
use crate::error::{BridgeError, Result};
use crate::queue::OutboundQueue;
use crate::registry::TypeRegistry;
use crate::transport::{BusTransport, PlcTransport};

/// Bridge core: point collection, buffer scanning and event routing.
pub struct SyncEngine {
    types: TypeRegistry,
    /// Offset of the first record inside the polled block (the bytes
    /// before it carry the block size header).
    start_offset: usize,
    points: RwLock<Vec<Arc<Mutex<Datapoint>>>>,
    /// Explicit group address -> point index registry. Bindings move with
    /// a point's address; stale addresses never route.
    subscriptions: DashMap<String, usize>,
    ctx: PointContext,
    bus: Arc<dyn BusTransport>,
    generation: AtomicU64,
}

impl SyncEngine {
    pub fn new(
        types: TypeRegistry,
        start_offset: usize,
        queue: Arc<OutboundQueue>,
        plc: Arc<dyn PlcTransport>,
        bus: Arc<dyn BusTransport>,
        db: u16,
    ) -> Self {
        Self {
            types,
            start_offset,
            points: RwLock::new(Vec::new()),
            subscriptions: DashMap::new(),
            ctx: PointContext { queue, plc, db },
            bus,
            generation: AtomicU64::new(0),
        }
    }

    /// Scan one polled buffer and feed every record to its datapoint.
    ///
    /// The scan advances by each record's own declared length. An
    /// unregistered type tag or a truncated record aborts the scan with
    /// `MalformedBuffer`, leaving already-updated points in their
    /// last-known-good state. Per-point value failures are logged and
    /// skipped.
    pub async fn apply_buffer(&self, buffer: &[u8]) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut offset = self.start_offset;
        let mut index = 0usize;

        while offset < buffer.len() {
            let type_code = codec::peek_type_code(buffer, offset)?;
            let layout = *self.types.lookup(type_code).map_err(|e| {
                BridgeError::malformed(format!("record at offset {}: {}", offset, e))
            })?;

            let end = offset + layout.record_length;
            if end > buffer.len() {
                return Err(BridgeError::malformed(format!(
                    "record at offset {} needs {} bytes, buffer ends at {}",
                    offset,
                    layout.record_length,
                    buffer.len()
                )));
            }

            let point = self.point_at_or_create(index, offset).await;
            let outcome = {
                let mut point = point.lock().await;
                point
                    .update(&buffer[offset..end], &layout, offset, generation, &self.ctx)
                    .await?
            };

            if let Some(rebind) = outcome.rebind {
                self.rebind(index, rebind).await;
            }
            if let Some(e) = outcome.value_error {
                warn!("Point {} skipped this cycle: {}", index, e);
            }

            offset = end;
            index += 1;
        }

        self.prune(generation, index).await;
        Ok(())
    }

    /// Route one inbound group write to the point bound to `address`.
    ///
    /// Events for unknown addresses are dropped; a stale binding from a
    /// previous address never reaches a point.
    pub async fn route_event(&self, address: &str, payload: &[u8]) -> Result<()> {
        let Some(index) = self.subscriptions.get(address).map(|entry| *entry) else {
            debug!("Dropping bus event for unbound address {}", address);
            return Ok(());
        };

        let point = {
            let points = self.points.read().await;
            points.get(index).cloned()
        };
        let Some(point) = point else {
            debug!("Binding for {} points at pruned index {}", address, index);
            return Ok(());
        };

        let mut point = point.lock().await;
        point.apply_bus_event(payload, &self.ctx).await
    }

    /// Read-only snapshot of every point, in positional order.
    pub async fn snapshot(&self) -> Vec<DatapointSnapshot> {
        let points = self.points.read().await;
        let mut out = Vec::with_capacity(points.len());
        for point in points.iter() {
            out.push(point.lock().await.snapshot());
        }
        out
    }

    /// Snapshot of one point by positional index.
    pub async fn point(&self, index: usize) -> Option<DatapointSnapshot> {
        let point = {
            let points = self.points.read().await;
            points.get(index).cloned()
        };
        match point {
            Some(point) => Some(point.lock().await.snapshot()),
            None => None,
        }
    }

    pub async fn point_count(&self) -> usize {
        self.points.read().await.len()
    }

    async fn point_at_or_create(&self, index: usize, offset: usize) -> Arc<Mutex<Datapoint>> {
        {
            let points = self.points.read().await;
            if let Some(point) = points.get(index) {
                return point.clone();
            }
        }
        let mut points = self.points.write().await;
        // The scan is strictly sequential, so a missing index is always
        // the next slot.
        if points.len() == index {
            info!("Creating datapoint {} at offset {}", index, offset);
            points.push(Arc::new(Mutex::new(Datapoint::new(index, offset))));
        }
        points[index].clone()
    }

    /// Move a point's registry binding and bus subscription to its new
    /// address. Bind and unbind are idempotent set operations.
    async fn rebind(&self, index: usize, rebind: Rebind) {
        if let Some(old) = rebind.old {
            self.subscriptions.remove_if(&old, |_, bound| *bound == index);
            if let Err(e) = self.bus.unsubscribe(&old).await {
                warn!("Unsubscribe {} failed: {}", old, e);
            }
        }
        if rebind.subscribe {
            self.subscriptions.insert(rebind.new.clone(), index);
            if let Err(e) = self.bus.subscribe(&rebind.new).await {
                warn!("Subscribe {} failed: {}", rebind.new, e);
            }
        } else {
            // Write-only points take no inbound events.
            self.subscriptions
                .remove_if(&rebind.new, |_, bound| *bound == index);
        }
    }

    /// Drop points the latest complete scan did not touch. Runs only
    /// after a fully successful scan, so a malformed buffer never shrinks
    /// the collection.
    async fn prune(&self, generation: u64, live_count: usize) {
        let mut points = self.points.write().await;
        if points.len() <= live_count {
            return;
        }

        let stale = points.split_off(live_count);
        drop(points);

        for point in stale {
            let point = point.lock().await;
            debug_assert!(point.generation() < generation);
            let address = point.group_address().to_string();
            info!(
                "Pruning datapoint {} ({}) absent from the latest poll",
                point.index(),
                address
            );
            self.subscriptions
                .remove_if(&address, |_, bound| *bound == point.index());
            if let Err(e) = self.bus.unsubscribe(&address).await {
                warn!("Unsubscribe {} failed: {}", address, e);
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("start_offset", &self.start_offset)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::GroupValue;
    use crate::queue::OverflowPolicy;
    use crate::transport::mock::{MockBusTransport, MockPlcTransport};

    struct Fixture {
        engine: SyncEngine,
        queue: Arc<OutboundQueue>,
        plc: Arc<MockPlcTransport>,
        bus: Arc<MockBusTransport>,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(OutboundQueue::new(64, OverflowPolicy::default()));
        let plc = Arc::new(MockPlcTransport::with_image(vec![0u8; 128]));
        let bus = Arc::new(MockBusTransport::new());
        let engine = SyncEngine::new(
            TypeRegistry::new(),
            2,
            queue.clone(),
            plc.clone(),
            bus.clone(),
            100,
        );
        Fixture {
            engine,
            queue,
            plc,
            bus,
        }
    }

    fn generic_record(addr: u32, type_code: i16, flag_byte: u8, int: i16, real: f32) -> Vec<u8> {
        let mut record = Vec::with_capacity(14);
        record.extend_from_slice(&addr.to_be_bytes());
        record.extend_from_slice(&type_code.to_be_bytes());
        record.push(flag_byte);
        record.push(0);
        record.extend_from_slice(&int.to_be_bytes());
        record.extend_from_slice(&real.to_be_bytes());
        record
    }

    fn triplet_record(addr: u32, flag_byte: u8, rgb: [u8; 3]) -> Vec<u8> {
        let mut record = Vec::with_capacity(10);
        record.extend_from_slice(&addr.to_be_bytes());
        record.extend_from_slice(&232i16.to_be_bytes());
        record.push(flag_byte);
        record.extend_from_slice(&rgb);
        record
    }

    fn block(records: &[Vec<u8>]) -> Vec<u8> {
        let mut buffer = Vec::new();
        let size: usize = 2 + records.iter().map(Vec::len).sum::<usize>();
        buffer.extend_from_slice(&(size as u16).to_be_bytes());
        for record in records {
            buffer.extend_from_slice(record);
        }
        buffer
    }

    #[tokio::test]
    async fn test_scan_advances_by_declared_length() {
        let f = fixture();
        let buffer = block(&[
            generic_record(1793, 5, 0, 10, 0.0),
            triplet_record(2001, 0, [1, 2, 3]),
        ]);

        f.engine.apply_buffer(&buffer).await.unwrap();

        assert_eq!(f.engine.point_count().await, 2);
        let first = f.engine.point(0).await.unwrap();
        let second = f.engine.point(1).await.unwrap();
        // Offsets relative to the scan start are 0 and 14
        assert_eq!(first.byte_offset, 2);
        assert_eq!(second.byte_offset, 2 + 14);
        assert_eq!(second.type_code, 232);
    }

    #[tokio::test]
    async fn test_unknown_type_mid_buffer_aborts_scan() {
        let f = fixture();
        let buffer = block(&[
            generic_record(1793, 5, 0, 10, 0.0),
            generic_record(1800, 77, 0, 0, 0.0),
        ]);

        let err = f.engine.apply_buffer(&buffer).await.unwrap_err();
        assert!(matches!(err, BridgeError::MalformedBuffer(_)));

        // The first point survived with its last-known-good state
        assert_eq!(f.engine.point_count().await, 1);
        let first = f.engine.point(0).await.unwrap();
        assert_eq!(first.value, Some(GroupValue::Int(10)));
    }

    #[tokio::test]
    async fn test_truncated_record_aborts_scan() {
        let f = fixture();
        let mut buffer = block(&[generic_record(1793, 5, 0, 10, 0.0)]);
        buffer.truncate(buffer.len() - 4);

        let err = f.engine.apply_buffer(&buffer).await.unwrap_err();
        assert!(matches!(err, BridgeError::MalformedBuffer(_)));
        assert_eq!(f.engine.point_count().await, 0);
    }

    #[tokio::test]
    async fn test_value_rule_failure_skips_point_only() {
        let f = fixture();
        // Type 13 has a registered length but no value rule
        let buffer = block(&[
            generic_record(1793, 13, 0, 0, 0.0),
            generic_record(1800, 5, 0, 33, 0.0),
        ]);

        f.engine.apply_buffer(&buffer).await.unwrap();

        assert_eq!(f.engine.point_count().await, 2);
        assert!(f.engine.point(0).await.unwrap().value.is_none());
        assert_eq!(
            f.engine.point(1).await.unwrap().value,
            Some(GroupValue::Int(33))
        );
    }

    #[tokio::test]
    async fn test_subscriptions_follow_address_changes() {
        let f = fixture();

        let buffer = block(&[generic_record(1793, 5, 0, 10, 0.0)]);
        f.engine.apply_buffer(&buffer).await.unwrap();
        assert!(f.bus.subscriptions().contains("0/17/93"));

        // Controller rewrites the packed address
        let buffer = block(&[generic_record(2101, 5, 0, 10, 0.0)]);
        f.engine.apply_buffer(&buffer).await.unwrap();

        let subs = f.bus.subscriptions();
        assert!(!subs.contains("0/17/93"));
        assert!(subs.contains("0/21/1"));

        // The stale address no longer routes
        f.engine
            .route_event("0/17/93", &7i16.to_be_bytes())
            .await
            .unwrap();
        assert!(f.plc.writes().is_empty());
    }

    #[tokio::test]
    async fn test_route_event_reaches_bound_point() {
        let f = fixture();
        let buffer = block(&[generic_record(1793, 5, 0, 10, 0.0)]);
        f.engine.apply_buffer(&buffer).await.unwrap();
        f.plc.clear_writes();

        f.engine
            .route_event("0/17/93", &55i16.to_be_bytes())
            .await
            .unwrap();

        assert_eq!(
            f.engine.point(0).await.unwrap().value,
            Some(GroupValue::Int(55))
        );
        assert_eq!(f.plc.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_after_block_shrinks() {
        let f = fixture();
        let buffer = block(&[
            generic_record(1793, 5, 0, 10, 0.0),
            generic_record(1800, 5, 0, 20, 0.0),
        ]);
        f.engine.apply_buffer(&buffer).await.unwrap();
        assert_eq!(f.engine.point_count().await, 2);

        let buffer = block(&[generic_record(1793, 5, 0, 10, 0.0)]);
        f.engine.apply_buffer(&buffer).await.unwrap();

        assert_eq!(f.engine.point_count().await, 1);
        assert!(!f.bus.subscriptions().contains("0/18/0"));

        // Events for the pruned point's address are dropped
        f.engine
            .route_event("0/18/0", &1i16.to_be_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_scan_does_not_prune() {
        let f = fixture();
        let buffer = block(&[
            generic_record(1793, 5, 0, 10, 0.0),
            generic_record(1800, 5, 0, 20, 0.0),
        ]);
        f.engine.apply_buffer(&buffer).await.unwrap();

        // Second scan aborts at the first record
        let buffer = block(&[generic_record(1793, 42, 0, 10, 0.0)]);
        assert!(f.engine.apply_buffer(&buffer).await.is_err());
        assert_eq!(f.engine.point_count().await, 2);
    }

    #[tokio::test]
    async fn test_write_only_point_gets_no_subscription() {
        let f = fixture();
        let buffer = block(&[generic_record(1793, 5, 0x02, 10, 0.0)]);
        f.engine.apply_buffer(&buffer).await.unwrap();
        assert!(f.bus.subscriptions().is_empty());

        f.engine
            .route_event("0/17/93", &7i16.to_be_bytes())
            .await
            .unwrap();
        assert!(f.plc.writes().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_order() {
        let f = fixture();
        let buffer = block(&[
            generic_record(1793, 5, 0, 10, 0.0),
            triplet_record(2001, 0, [9, 9, 9]),
        ]);
        f.engine.apply_buffer(&buffer).await.unwrap();

        let snapshots = f.engine.snapshot().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].index, 0);
        assert_eq!(snapshots[0].group_address, "0/17/93");
        assert_eq!(snapshots[1].index, 1);
        assert_eq!(snapshots[1].dpt, "DPT232.001");
    }

    #[tokio::test]
    async fn test_unused_queue_is_untouched_by_first_scan() {
        let f = fixture();
        let buffer = block(&[
            generic_record(1793, 5, 0, 10, 0.0),
            triplet_record(2001, 0, [1, 2, 3]),
        ]);
        f.engine.apply_buffer(&buffer).await.unwrap();
        assert!(f.queue.is_empty().await);
    }
}
