//! In-memory transports
//!
//! `MockPlcTransport` exposes a byte vector as the controller's data
//! block, with a write journal and failure injection. `MockBusTransport`
//! records group writes and the live subscription set. Both back the unit
//! and integration tests as well as the binary's `--sim` mode.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::codec::GroupValue;
use crate::error::{BridgeError, Result};
use crate::transport::{BusTransport, PlcTransport};

/// One controller write captured by the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct PlcWrite {
    pub db: u16,
    pub offset: usize,
    pub data: Vec<u8>,
}

/// In-memory controller transport backed by a plain byte block.
#[derive(Debug, Default)]
pub struct MockPlcTransport {
    memory: Mutex<Vec<u8>>,
    writes: Mutex<Vec<PlcWrite>>,
    connected: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockPlcTransport {
    /// Build a transport whose data block holds `image`. The first two
    /// bytes are expected to carry the big-endian block size, matching
    /// the controller's layout.
    pub fn with_image(image: Vec<u8>) -> Self {
        Self {
            memory: Mutex::new(image),
            connected: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Replace the data block image, simulating the controller changing
    /// its memory between polls.
    pub fn set_image(&self, image: Vec<u8>) {
        *self.memory.lock().expect("mock memory poisoned") = image;
    }

    /// Patch bytes inside the current image.
    pub fn patch(&self, offset: usize, data: &[u8]) {
        let mut memory = self.memory.lock().expect("mock memory poisoned");
        memory[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All writes issued against this transport, in order.
    pub fn writes(&self) -> Vec<PlcWrite> {
        self.writes.lock().expect("mock journal poisoned").clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().expect("mock journal poisoned").clear();
    }
}

#[async_trait]
impl PlcTransport for MockPlcTransport {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_block(&self, _db: u16, offset: usize, length: usize) -> Result<Vec<u8>> {
        if !self.is_connected() {
            return Err(BridgeError::not_connected());
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BridgeError::transport("injected read failure"));
        }
        let memory = self.memory.lock().expect("mock memory poisoned");
        if offset + length > memory.len() {
            return Err(BridgeError::transport(format!(
                "read of {} bytes at offset {} exceeds block size {}",
                length,
                offset,
                memory.len()
            )));
        }
        Ok(memory[offset..offset + length].to_vec())
    }

    async fn write_block(&self, db: u16, offset: usize, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::not_connected());
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::transport("injected write failure"));
        }
        {
            let mut memory = self.memory.lock().expect("mock memory poisoned");
            if offset + data.len() > memory.len() {
                return Err(BridgeError::transport(format!(
                    "write of {} bytes at offset {} exceeds block size {}",
                    data.len(),
                    offset,
                    memory.len()
                )));
            }
            memory[offset..offset + data.len()].copy_from_slice(data);
        }
        self.writes
            .lock()
            .expect("mock journal poisoned")
            .push(PlcWrite {
                db,
                offset,
                data: data.to_vec(),
            });
        Ok(())
    }
}

/// One bus send captured by the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct BusSend {
    pub address: String,
    pub value: GroupValue,
    pub dpt: String,
}

/// In-memory bus transport recording sends and subscriptions.
#[derive(Debug, Default)]
pub struct MockBusTransport {
    sends: Mutex<Vec<BusSend>>,
    subscriptions: Mutex<HashSet<String>>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockBusTransport {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sends(&self) -> Vec<BusSend> {
        self.sends.lock().expect("mock journal poisoned").clone()
    }

    pub fn subscriptions(&self) -> HashSet<String> {
        self.subscriptions
            .lock()
            .expect("mock subscriptions poisoned")
            .clone()
    }
}

#[async_trait]
impl BusTransport for MockBusTransport {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, address: &str, value: &GroupValue, dpt: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::not_connected());
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::transport("injected send failure"));
        }
        self.sends
            .lock()
            .expect("mock journal poisoned")
            .push(BusSend {
                address: address.to_string(),
                value: *value,
                dpt: dpt.to_string(),
            });
        Ok(())
    }

    async fn subscribe(&self, address: &str) -> Result<()> {
        self.subscriptions
            .lock()
            .expect("mock subscriptions poisoned")
            .insert(address.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, address: &str) -> Result<()> {
        self.subscriptions
            .lock()
            .expect("mock subscriptions poisoned")
            .remove(address);
        Ok(())
    }
}
