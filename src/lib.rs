//! S7 PLC to KNX bus synchronization bridge
//!
//! Keeps a fixed-layout data block on an industrial controller consistent
//! with addressable group objects on a KNX-style bus, in both directions:
//!
//! - A cyclic poll reads the block, decodes its typed records into
//!   [`datapoint::Datapoint`]s and emits changed values through a bounded
//!   FIFO to a rate-limited bus dispatcher.
//! - Inbound group writes route through an address registry back into the
//!   matching record's bytes on the controller.
//! - A controller-raised resend request forces emission of an unchanged
//!   value and is completed by writing back an acknowledged flag.
//!
//! The S7 and KNXnet/IP wire protocols themselves live behind the
//! [`transport`] traits; this crate only owns the record codec, the
//! per-point state machines and the scheduling around them.
//!
//! # Data flow
//!
//! ```text
//! controller --poll--> SyncEngine --update--> Datapoint --change--> OutboundQueue
//!                                                                        |
//!      controller <--write-- Datapoint <--route-- SyncEngine <--event-- bus
//!                                                  OutboundQueue --tick--> bus
//! ```

pub mod address;
pub mod codec;
pub mod config;
pub mod datapoint;
pub mod engine;
pub mod error;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use codec::{ControlFlags, GroupValue};
pub use config::BridgeConfig;
pub use datapoint::{Datapoint, DatapointSnapshot};
pub use engine::SyncEngine;
pub use error::{BridgeError, Result};
pub use queue::{OutboundItem, OutboundQueue, OverflowPolicy};
pub use registry::TypeRegistry;
pub use scheduler::{PollScheduler, QueueDispatcher};
