//! Integration tests for the probe table and timeout scheduler. These need
//! no raw-socket privilege (only table/timer bookkeeping); the end-to-end
//! send/receive scenarios live in `tests/privileged_scenarios.rs` and
//! require `CAP_NET_RAW`/root.

use std::time::{Duration, Instant};

use probed_engine::{MAX_PORT, MAX_PROBES, MIN_PORT};
use probed_engine::probe_table::ProbeTable;

#[test]
fn table_never_allocates_past_capacity() {
    let mut table = ProbeTable::new();
    assert_eq!(table.capacity(), MAX_PROBES);
    for i in 0..MAX_PROBES {
        assert!(table.alloc(i as i64).is_some(), "allocation {i} should succeed");
    }
    assert!(
        table.alloc(9999).is_none(),
        "table should report exhaustion once every slot is used"
    );
}

#[test]
fn freed_slots_are_immediately_available_again() {
    let mut table = ProbeTable::new();
    let mut indices = Vec::new();
    for i in 0..MAX_PROBES {
        indices.push(table.alloc(i as i64).unwrap());
    }
    assert!(table.alloc(0xdead).is_none());

    table.free(indices[0]);
    assert!(table.alloc(0xbeef).is_some());
}

#[test]
fn port_assignment_cycles_through_the_full_range_before_reuse() {
    // A source port is not handed out again until the full
    // configured range has been cycled through.
    let mut table = ProbeTable::new();
    let first_port = {
        let idx = table.alloc(1).unwrap();
        let port = table.get(idx).unwrap().source_port;
        table.free(idx);
        port
    };
    assert_eq!(first_port, MIN_PORT);

    let span = usize::from(MAX_PORT - MIN_PORT);
    for i in 0..span {
        let idx = table.alloc(i as i64).unwrap();
        assert_ne!(
            table.get(idx).unwrap().source_port,
            first_port,
            "port {first_port} reused before cycling the full range"
        );
        table.free(idx);
    }
}

#[test]
fn find_by_port_ignores_freed_slots() {
    let mut table = ProbeTable::new();
    let idx = table.alloc(42).unwrap();
    let port = table.get(idx).unwrap().source_port;
    assert_eq!(table.find_by_port(port), Some(idx));

    table.free(idx);
    assert_eq!(table.find_by_port(port), None);
}

#[test]
fn timeout_deadline_in_the_past_is_detected_by_plain_comparison() {
    // check_probe_timeouts itself needs a NetState (which needs privileged
    // sockets to construct); the comparison it relies on is exercised
    // directly here instead.
    let now = Instant::now();
    let deadline = now + Duration::from_millis(10);
    assert!(deadline > now);
    let later = now + Duration::from_millis(20);
    assert!(deadline <= later);
}
