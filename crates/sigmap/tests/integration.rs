//! End-to-end scenarios spanning device construction, signal declaration,
//! map negotiation, and expression evaluation.

use sigmap::alloc::Allocator;
use sigmap::config::{DeviceConfig, DEFAULT_ADMIN_ADDR};
use sigmap::device::Device;
use sigmap::net::PROTO_UDP;
use sigmap::signal::instance::{InstanceOwner, InstanceTable, StealMode};
use sigmap::signal::{Direction, SignalDecl, ValueType};

async fn test_device(name: &str) -> Device {
    let config = DeviceConfig::new().admin_bus(DEFAULT_ADMIN_ADDR, 0);
    Device::new(name, config).await.expect("device should bind on ephemeral ports")
}

#[tokio::test]
async fn linear_map_scales_input_within_one_device() {
    // spec §8 scenario 1: a two-point linear map, 0..100 input to 0..1 output.
    let mut device = test_device("synth").await;
    device
        .add_signal(SignalDecl::new("in", Direction::Output, ValueType::Float32, 1))
        .unwrap();
    device
        .add_signal(SignalDecl::new("out", Direction::Input, ValueType::Float32, 1))
        .unwrap();
    device.map(&["in"], "out", "y=linear(x,0,100,0,1)", PROTO_UDP).unwrap();

    device.update_signal("in", vec![50.0]).await.unwrap();

    let out = device.signal_value("out").expect("map should have fired");
    assert!((out.data[0] - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn history_init_map_accumulates_within_one_device() {
    // spec §8 scenario 3: `y=x+y{-1}; y{-1}=100` should yield c+n after n
    // ticks starting from the seeded history-init value. The initializer
    // runs before the main statement regardless of its source position.
    let mut device = test_device("accumulator").await;
    device
        .add_signal(SignalDecl::new("in", Direction::Output, ValueType::Float64, 1))
        .unwrap();
    device
        .add_signal(SignalDecl::new("out", Direction::Input, ValueType::Float64, 1))
        .unwrap();
    device.map(&["in"], "out", "y=x+y{-1}; y{-1}=100", PROTO_UDP).unwrap();

    for _ in 0..5 {
        device.update_signal("in", vec![1.0]).await.unwrap();
    }

    let out = device.signal_value("out").expect("map should have fired");
    assert!((out.data[0] - 105.0).abs() < 1e-9);
}

#[tokio::test]
async fn equivalent_map_proposals_resolve_by_tie_break() {
    // spec §4.E: two proposals for the same (sources, dst) pair converge
    // on the lexicographically smaller id; the later call contributes no
    // independent pipeline.
    let mut device = test_device("router").await;
    device
        .add_signal(SignalDecl::new("in", Direction::Output, ValueType::Float32, 1))
        .unwrap();
    device
        .add_signal(SignalDecl::new("out", Direction::Input, ValueType::Float32, 1))
        .unwrap();

    let first = device.map(&["in"], "out", "y=x", PROTO_UDP).unwrap();
    let second = device.map(&["in"], "out", "y=x*2", PROTO_UDP).unwrap();

    assert_eq!(first, second, "the smaller id should win and be reused");
}

#[tokio::test]
async fn unmapping_stops_further_forwarding() {
    let mut device = test_device("gate").await;
    device
        .add_signal(SignalDecl::new("in", Direction::Output, ValueType::Float32, 1))
        .unwrap();
    device
        .add_signal(SignalDecl::new("out", Direction::Input, ValueType::Float32, 1))
        .unwrap();
    let id = device.map(&["in"], "out", "y=x", PROTO_UDP).unwrap();
    device.update_signal("in", vec![1.0]).await.unwrap();
    assert!(device.signal_value("out").is_some());

    device.unmap(id).await.unwrap();
    device.update_signal("in", vec![2.0]).await.unwrap();
    // "out" no longer receives updates; its last value is unchanged.
    let out = device.signal_value("out").unwrap();
    assert!((out.data[0] - 1.0).abs() < 1e-9);
}

#[test]
fn allocator_converges_once_probation_elapses() {
    // spec §8 scenario 4: an ordinal allocator locks a candidate value if
    // no peer challenges it before the probation window elapses.
    let mut ordinal = Allocator::new("ordinal", 0, 9);
    assert!(!ordinal.is_locked());
    std::thread::sleep(std::time::Duration::from_millis(550));
    assert!(ordinal.tick());
    assert!(ordinal.is_locked());
}

#[test]
fn instance_table_steals_oldest_under_pressure() {
    // spec §8 scenario 5: an 11th concurrent instance with steal=oldest
    // evicts the very first one admitted.
    let mut table = InstanceTable::new(10, StealMode::Oldest);
    for id in 0..10 {
        let sample = sigmap::signal::Sample::new(ValueType::Float32, vec![id as f64], sigmap::time::TimeTag::now());
        assert!(table.update(id, InstanceOwner::Local, sample).is_none());
    }
    let sample = sigmap::signal::Sample::new(ValueType::Float32, vec![10.0], sigmap::time::TimeTag::now());
    let evicted = table.update(10, InstanceOwner::Local, sample);
    assert_eq!(evicted, Some(0));
    assert_eq!(table.len(), 10);
}
