//! Transport layer traits
//!
//! The bridge core never speaks S7 or KNXnet/IP itself; both wire
//! protocols live behind these traits. Real implementations wrap a
//! controller client and a bus gateway connection; the in-memory
//! implementations in [`mock`] back the tests and the simulation mode.
//!
//! All calls are bounded and fallible: they either complete or fail
//! within the timeout enforced by the concrete transport.

pub mod mock;

use async_trait::async_trait;

use crate::codec::GroupValue;
use crate::error::Result;

/// Block-oriented access to the controller's data block.
#[async_trait]
pub trait PlcTransport: Send + Sync + std::fmt::Debug {
    /// Connect to the controller endpoint.
    async fn connect(&self) -> Result<()>;

    /// Disconnect and release the controller connection.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Read `length` bytes from `db` starting at `offset`.
    ///
    /// Used both for the 2-byte size header and for full block reads.
    async fn read_block(&self, db: u16, offset: usize, length: usize) -> Result<Vec<u8>>;

    /// Write `data` into `db` at `offset`.
    async fn write_block(&self, db: u16, offset: usize, data: &[u8]) -> Result<()>;
}

/// Group-addressed access to the bus gateway.
#[async_trait]
pub trait BusTransport: Send + Sync + std::fmt::Debug {
    /// Connect to the bus gateway.
    async fn connect(&self) -> Result<()>;

    /// Disconnect and release the gateway connection.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Send a group write for `address`, tagged with its protocol
    /// data-type. Fire-and-forget from the bridge's perspective.
    async fn send(&self, address: &str, value: &GroupValue, dpt: &str) -> Result<()>;

    /// Register interest in group writes for `address`. Idempotent.
    async fn subscribe(&self, address: &str) -> Result<()>;

    /// Drop interest in group writes for `address`. Idempotent.
    async fn unsubscribe(&self, address: &str) -> Result<()>;
}
