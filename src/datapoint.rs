//! Datapoint state and change detection
//!
//! A `Datapoint` owns the live state of one record in the polled block:
//! its group address, type code, control flags, current and last-sent
//! value. `update` runs on every poll cycle and decides whether the value
//! must be forwarded to the bus; `apply_bus_event` runs on inbound group
//! writes and pushes the value back into the controller.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::address;
use crate::codec::{self, ControlFlags, DecodedRecord, GroupValue, FLAG_OFFSET};
use crate::error::{BridgeError, Result};
use crate::queue::{OutboundItem, OutboundQueue};
use crate::registry::{self, RecordLayout};
use crate::transport::PlcTransport;

/// Shared collaborators every datapoint needs for its side effects.
#[derive(Clone)]
pub struct PointContext {
    pub queue: Arc<OutboundQueue>,
    pub plc: Arc<dyn PlcTransport>,
    /// Controller data block number, passed through to every write.
    pub db: u16,
}

/// Subscription change requested by an address move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebind {
    /// Address the point was bound to before, if any.
    pub old: Option<String>,
    pub new: String,
    /// Write-only points get no bus subscription.
    pub subscribe: bool,
}

/// Result of one `update` call.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Set when the packed address changed and the engine must rebind
    /// the event registry and bus subscription.
    pub rebind: Option<Rebind>,
    /// Value decode failure localized to this point; the scan continues.
    pub value_error: Option<BridgeError>,
}

/// Live state of one record in the polled block.
#[derive(Debug)]
pub struct Datapoint {
    index: usize,
    raw_address: Option<u32>,
    group_address: String,
    type_code: i16,
    dpt: String,
    flags: ControlFlags,
    value: Option<GroupValue>,
    /// Last value actually sent to the bus; `None` suppresses the first
    /// observation after startup.
    previous_value: Option<GroupValue>,
    /// Offset of this record inside the polled buffer. Updated every
    /// cycle: record boundaries shift when earlier records vary in length.
    byte_offset: usize,
    /// Poll generation that last touched this point.
    generation: u64,
    /// Unix timestamp of the last update or bus event.
    last_update: i64,
}

/// Read-only view of a datapoint for the inspection surface.
#[derive(Debug, Clone, Serialize)]
pub struct DatapointSnapshot {
    pub index: usize,
    pub group_address: String,
    pub type_code: i16,
    pub dpt: String,
    pub flags: ControlFlags,
    pub value: Option<GroupValue>,
    pub previous_value: Option<GroupValue>,
    pub byte_offset: usize,
    pub last_update: i64,
}

impl Datapoint {
    /// Create an empty point at positional `index`. State fills in on the
    /// first `update`.
    pub fn new(index: usize, byte_offset: usize) -> Self {
        Self {
            index,
            raw_address: None,
            group_address: "0/0/0".to_string(),
            type_code: 0,
            dpt: String::new(),
            flags: ControlFlags::default(),
            value: None,
            previous_value: None,
            byte_offset,
            generation: 0,
            last_update: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn group_address(&self) -> &str {
        &self.group_address
    }

    pub fn type_code(&self) -> i16 {
        self.type_code
    }

    pub fn flags(&self) -> ControlFlags {
        self.flags
    }

    pub fn value(&self) -> Option<GroupValue> {
        self.value
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> DatapointSnapshot {
        DatapointSnapshot {
            index: self.index,
            group_address: self.group_address.clone(),
            type_code: self.type_code,
            dpt: self.dpt.clone(),
            flags: self.flags,
            value: self.value,
            previous_value: self.previous_value,
            byte_offset: self.byte_offset,
            last_update: self.last_update,
        }
    }

    /// Apply one freshly polled record slice.
    pub async fn update(
        &mut self,
        record: &[u8],
        layout: &RecordLayout,
        byte_offset: usize,
        generation: u64,
        ctx: &PointContext,
    ) -> Result<UpdateOutcome> {
        let decoded = codec::decode_record(record, layout)?;
        self.byte_offset = byte_offset;
        self.generation = generation;
        self.last_update = chrono::Utc::now().timestamp();
        self.type_code = decoded.type_code;
        self.flags = decoded.flags;

        let mut outcome = UpdateOutcome::default();

        if self.raw_address != Some(decoded.raw_address) {
            outcome.rebind = Some(self.move_address(&decoded));
        }

        match decoded.value {
            Ok(value) => {
                self.value = Some(value);
                if !self.flags.read_only {
                    self.forward_to_bus(value, ctx).await;
                }
            },
            Err(e) => {
                debug!(
                    "Point {} ({}) has no decodable value: {}",
                    self.index, self.group_address, e
                );
                outcome.value_error = Some(e);
            },
        }

        Ok(outcome)
    }

    /// Recompute the hierarchical address after a packed-address change.
    fn move_address(&mut self, decoded: &DecodedRecord) -> Rebind {
        let old = self.raw_address.map(|_| self.group_address.clone());
        self.raw_address = Some(decoded.raw_address);
        self.group_address = address::to_hierarchical(decoded.raw_address);
        self.dpt = registry::dpt_tag(decoded.type_code);

        debug!(
            "Point {} address changed from {:?} to {} with {}",
            self.index, old, self.group_address, self.dpt
        );

        Rebind {
            old,
            new: self.group_address.clone(),
            subscribe: !self.flags.write_only,
        }
    }

    /// The outbound decision: emit the value to the queue only when it
    /// changed, or when the controller raised a resend request that has
    /// not been acknowledged for the current value yet.
    async fn forward_to_bus(&mut self, value: GroupValue, ctx: &PointContext) {
        // First observation after startup: record, emit nothing.
        let Some(previous) = self.previous_value else {
            self.previous_value = Some(value);
            return;
        };

        let unchanged = value == previous;
        if unchanged && !self.flags.request_resend {
            return;
        }
        // Resend already served for this value.
        if unchanged && self.flags.request_resend && self.flags.acknowledged {
            return;
        }

        let item = OutboundItem {
            address: self.group_address.clone(),
            value,
            dpt: self.dpt.clone(),
        };
        debug!("Enqueue {} = {}", item.address, item.value);
        if let Err(e) = ctx.queue.enqueue(item).await {
            warn!("Point {} enqueue failed: {}", self.index, e);
            return;
        }
        self.previous_value = Some(value);

        if self.flags.request_resend {
            self.acknowledge(ctx).await;
        }
    }

    /// Write the control byte back with the acknowledged bit set,
    /// preserving the other flags and the boolean value bit. Failures are
    /// logged and dropped; the next cycle retries the whole handshake.
    async fn acknowledge(&mut self, ctx: &PointContext) {
        self.flags.acknowledged = true;
        let bool_value = self.value.map(|v| v.as_bool()).unwrap_or(false);
        let byte = self.flags.to_byte(bool_value);
        let offset = self.byte_offset + FLAG_OFFSET;

        if let Err(e) = ctx.plc.write_block(ctx.db, offset, &[byte]).await {
            warn!(
                "Acknowledge write for point {} at offset {} failed: {}",
                self.index, offset, e
            );
        }
    }

    /// Apply an inbound group write from the bus and push the value into
    /// the controller at this record's current offset.
    pub async fn apply_bus_event(&mut self, payload: &[u8], ctx: &PointContext) -> Result<()> {
        let kind = registry::value_kind(self.type_code)?;
        let value = codec::decode_bus_payload(kind, payload)?;

        self.value = Some(value);
        self.last_update = chrono::Utc::now().timestamp();
        // The controller will echo this value on the next poll; recording
        // it as already-sent keeps it off the bus again.
        self.previous_value = Some(value);

        let (relative, bytes) = codec::encode_value(self.flags, &value);
        let offset = self.byte_offset + relative;
        debug!(
            "Bus -> controller: {} = {} at offset {}",
            self.group_address, value, offset
        );

        if let Err(e) = ctx.plc.write_block(ctx.db, offset, &bytes).await {
            // Not retried: the next cycle's state wins over this event.
            warn!(
                "Controller write for point {} at offset {} failed: {}",
                self.index, offset, e
            );
        }
        Ok(())
    }
}
