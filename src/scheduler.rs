//! Poll scheduler and queue dispatcher
//!
//! Two timing domains drive the bridge: a self-correcting poll loop that
//! reads the controller block and feeds the sync engine, and a fixed-rate
//! dispatcher that drains the outbound queue to the bus one item per
//! tick. Both shut down cooperatively through a shared
//! `CancellationToken`: no new cycles are issued, in-flight ones
//! complete.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::SyncEngine;
use crate::error::{BridgeError, Result};
use crate::queue::OutboundQueue;
use crate::transport::{BusTransport, PlcTransport};

/// Drives the sync engine on a cyclic, self-correcting timer.
///
/// Each cycle sleeps `max(period - elapsed, 0)`, keeping the target
/// cadence approximately constant under variable transport latency. A
/// slow read makes cycles run back-to-back rather than drift.
pub struct PollScheduler {
    engine: Arc<SyncEngine>,
    plc: Arc<dyn PlcTransport>,
    db: u16,
    period: Duration,
    cancel: CancellationToken,
}

impl PollScheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        plc: Arc<dyn PlcTransport>,
        db: u16,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            plc,
            db,
            period,
            cancel,
        }
    }

    /// Run until cancelled. Retryable cycle failures (transport drops,
    /// malformed buffers) are logged and the loop retries after its
    /// normal delay; a non-retryable failure stops the scheduler, since
    /// retrying cannot clear it.
    pub async fn run(self) {
        info!("Poll scheduler started, period {:?}", self.period);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();

            if let Err(e) = self.poll_cycle().await {
                if e.is_retryable() {
                    warn!("Poll cycle failed, retrying next cycle: {}", e);
                } else {
                    error!("Poll cycle failed with a non-retryable error, stopping: {}", e);
                    break;
                }
            }

            let delay = self.period.saturating_sub(started.elapsed());
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {},
            }
        }
        info!("Poll scheduler stopped");
    }

    /// One cycle: read the 2-byte size header, read the full block,
    /// apply it to the engine.
    async fn poll_cycle(&self) -> Result<()> {
        let header = self.plc.read_block(self.db, 0, 2).await?;
        if header.len() < 2 {
            return Err(BridgeError::transport(format!(
                "size header read returned {} bytes",
                header.len()
            )));
        }
        let block_size = u16::from_be_bytes([header[0], header[1]]) as usize;
        debug!("Polling {} bytes from DB {}", block_size, self.db);

        let buffer = self.plc.read_block(self.db, 0, block_size).await?;
        self.engine.apply_buffer(&buffer).await
    }
}

/// Drains the outbound queue to the bus at a constant tick, decoupled
/// from the poll cadence. At most one item leaves per tick.
pub struct QueueDispatcher {
    queue: Arc<OutboundQueue>,
    bus: Arc<dyn BusTransport>,
    tick: Duration,
    cancel: CancellationToken,
}

impl QueueDispatcher {
    pub fn new(
        queue: Arc<OutboundQueue>,
        bus: Arc<dyn BusTransport>,
        tick: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            bus,
            tick,
            cancel,
        }
    }

    /// Run until cancelled. Send failures are logged and the item is
    /// dropped; liveness of the next tick wins over guaranteed delivery.
    pub async fn run(self) {
        info!("Queue dispatcher started, tick {:?}", self.tick);
        let mut interval = tokio::time::interval(self.tick);
        let mut sent = 0u64;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Some(item) = self.queue.dequeue().await {
                        sent += 1;
                        debug!(
                            "Controller -> bus: {} = {} ({} sent)",
                            item.address, item.value, sent
                        );
                        if let Err(e) = self.bus.send(&item.address, &item.value, &item.dpt).await {
                            warn!("Bus send for {} failed, dropping: {}", item.address, e);
                        }
                    }
                },
            }
        }
        info!("Queue dispatcher stopped after {} sends", sent);
    }
}
