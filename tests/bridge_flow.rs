//! End-to-end bridge flow over the in-memory transports:
//! poll -> decode -> change detection -> queue -> dispatcher -> bus,
//! and bus event -> engine -> controller write-back.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use knxbridge::scheduler::{PollScheduler, QueueDispatcher};
use knxbridge::transport::mock::{MockBusTransport, MockPlcTransport};
use knxbridge::transport::PlcTransport;
use knxbridge::{GroupValue, OutboundQueue, OverflowPolicy, SyncEngine, TypeRegistry};

const DB: u16 = 100;
const START_OFFSET: usize = 2;

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

fn block_image(records: &[Vec<u8>]) -> Vec<u8> {
    let mut buffer = Vec::new();
    let size: usize = START_OFFSET + records.iter().map(Vec::len).sum::<usize>();
    buffer.extend_from_slice(&(size as u16).to_be_bytes());
    for record in records {
        buffer.extend_from_slice(record);
    }
    buffer
}

struct Bridge {
    engine: Arc<SyncEngine>,
    queue: Arc<OutboundQueue>,
    plc: Arc<MockPlcTransport>,
    bus: Arc<MockBusTransport>,
}

fn bridge(image: Vec<u8>) -> Bridge {
    let queue = Arc::new(OutboundQueue::new(64, OverflowPolicy::default()));
    let plc = Arc::new(MockPlcTransport::with_image(image));
    let bus = Arc::new(MockBusTransport::new());
    let engine = Arc::new(SyncEngine::new(
        TypeRegistry::new(),
        START_OFFSET,
        queue.clone(),
        plc.clone(),
        bus.clone(),
        DB,
    ));
    Bridge {
        engine,
        queue,
        plc,
        bus,
    }
}

#[tokio::test]
async fn controller_change_reaches_bus_once() {
    let b = bridge(block_image(&[generic_record(1793, 9, 0, 0, 20.0)]));

    let cancel = CancellationToken::new();
    let scheduler = PollScheduler::new(
        b.engine.clone(),
        b.plc.clone(),
        DB,
        Duration::from_millis(5),
        cancel.clone(),
    );
    let dispatcher = QueueDispatcher::new(
        b.queue.clone(),
        b.bus.clone(),
        Duration::from_millis(2),
        cancel.clone(),
    );
    let poll = tokio::spawn(scheduler.run());
    let dispatch = tokio::spawn(dispatcher.run());

    // Let the first observation settle, then change the value once
    tokio::time::sleep(Duration::from_millis(30)).await;
    b.plc
        .set_image(block_image(&[generic_record(1793, 9, 0, 0, 21.5)]));
    tokio::time::sleep(Duration::from_millis(50)).await;

    cancel.cancel();
    poll.await.unwrap();
    dispatch.await.unwrap();

    // Startup and repeated polls of the same value stay silent; the one
    // change produced exactly one bus write
    let sends = b.bus.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].address, "0/17/93");
    assert_eq!(sends[0].value, GroupValue::Float(21.5));
    assert_eq!(sends[0].dpt, "DPT9.001");
}

#[tokio::test]
async fn forced_resend_completes_the_handshake() {
    let b = bridge(block_image(&[generic_record(1793, 5, 0, 40, 0.0)]));

    // First poll records the value without emitting
    let image = b.plc.read_block(DB, 0, 2 + 14).await.unwrap();
    b.engine.apply_buffer(&image).await.unwrap();
    assert!(b.queue.is_empty().await);

    // Controller raises request_resend with the value unchanged
    b.plc
        .set_image(block_image(&[generic_record(1793, 5, 0x04, 40, 0.0)]));
    let image = b.plc.read_block(DB, 0, 2 + 14).await.unwrap();
    b.engine.apply_buffer(&image).await.unwrap();

    assert_eq!(b.queue.len().await, 1);
    assert_eq!(b.queue.peek().await.unwrap().value, GroupValue::Int(40));

    // The acknowledge write landed in the controller's flag byte
    let flag = b.plc.read_block(DB, START_OFFSET + 6, 1).await.unwrap();
    assert_eq!(flag[0], 0x04 | 0x08);

    // The controller now reports the acknowledged handshake; nothing more
    // is emitted for the same value
    let image = b.plc.read_block(DB, 0, 2 + 14).await.unwrap();
    b.engine.apply_buffer(&image).await.unwrap();
    assert_eq!(b.queue.len().await, 1);
}

#[tokio::test]
async fn bus_event_lands_in_controller_memory() {
    let b = bridge(block_image(&[generic_record(1793, 5, 0, 40, 0.0)]));

    let image = b.plc.read_block(DB, 0, 2 + 14).await.unwrap();
    b.engine.apply_buffer(&image).await.unwrap();
    assert!(b.bus.subscriptions().contains("0/17/93"));

    b.engine
        .route_event("0/17/93", &75i16.to_be_bytes())
        .await
        .unwrap();

    // The i16 sub-range of the record was rewritten in place
    let bytes = b.plc.read_block(DB, START_OFFSET + 8, 2).await.unwrap();
    assert_eq!(bytes, 75i16.to_be_bytes().to_vec());

    // The next poll sees the value it just wrote and does not echo it
    // back onto the bus
    let image = b.plc.read_block(DB, 0, 2 + 14).await.unwrap();
    b.engine.apply_buffer(&image).await.unwrap();
    assert!(b.queue.is_empty().await);
}

#[tokio::test]
async fn mixed_length_block_round_trip() {
    let mut triplet = Vec::new();
    triplet.extend_from_slice(&2001u32.to_be_bytes());
    triplet.extend_from_slice(&232i16.to_be_bytes());
    triplet.push(0);
    triplet.extend_from_slice(&[10, 20, 30]);

    let b = bridge(block_image(&[
        generic_record(1793, 1, 0x10, 0, 0.0),
        triplet.clone(),
    ]));

    let image = b.plc.read_block(DB, 0, 2 + 14 + 10).await.unwrap();
    b.engine.apply_buffer(&image).await.unwrap();

    assert_eq!(b.engine.point_count().await, 2);
    let rgb = b.engine.point(1).await.unwrap();
    assert_eq!(rgb.byte_offset, START_OFFSET + 14);
    assert_eq!(
        rgb.value,
        Some(GroupValue::Rgb {
            red: 10,
            green: 20,
            blue: 30
        })
    );

    // Color change on the bus routes to the triplet point and rewrites
    // exactly its three component bytes
    b.engine
        .route_event("0/20/1", &[1, 2, 3])
        .await
        .unwrap();
    let bytes = b.plc.read_block(DB, START_OFFSET + 14 + 7, 3).await.unwrap();
    assert_eq!(bytes, vec![1, 2, 3]);
}
