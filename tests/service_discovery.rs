//! End-to-end SSDP discovery over the loopback broadcast companion socket:
//! a single processor advertises a service and its own subscription
//! overhears the resulting NOTIFY via loopback broadcast (multicast loop is
//! enabled by default, so a lone processor exercises the full
//! advertise -> socket -> parse -> dispatch path without a second bind).

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vsm_core::callback::Callback;
use vsm_core::discovery::{ServiceDiscoveryProcessor, ServiceEvent};

#[test]
fn a_subscriber_observes_its_own_advertised_service_over_loopback() {
    let processor = match ServiceDiscoveryProcessor::new(Ipv4Addr::new(239, 198, 46, 47), 0) {
        Ok(p) => p,
        Err(_) => return, // sandboxed network without multicast support
    };

    let seen = Arc::new(AtomicBool::new(false));
    let seen2 = seen.clone();
    processor.subscribe_for_service(
        "vsm.vehicle",
        Callback::new(ServiceEvent::default(), move |event| {
            if event.name == "drone1" && event.alive {
                seen2.store(true, Ordering::SeqCst);
            }
        }),
    );

    processor.advertise_service("vsm.vehicle", "drone1", "tcp://{local_address}/vsm");

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && !seen.load(Ordering::SeqCst) {
        processor.poll_once();
        std::thread::sleep(Duration::from_millis(20));
    }

    assert!(seen.load(Ordering::SeqCst), "never observed our own advertised service over loopback");
}

#[test]
fn unadvertising_emits_a_byebye_the_same_subscriber_sees() {
    let processor = match ServiceDiscoveryProcessor::new(Ipv4Addr::new(239, 198, 46, 48), 0) {
        Ok(p) => p,
        Err(_) => return,
    };

    let saw_byebye = Arc::new(AtomicBool::new(false));
    let saw_byebye2 = saw_byebye.clone();
    processor.subscribe_for_service(
        "vsm.vehicle",
        Callback::new(ServiceEvent::default(), move |event| {
            if event.name == "drone2" && !event.alive {
                saw_byebye2.store(true, Ordering::SeqCst);
            }
        }),
    );

    let instance_id = processor.advertise_service("vsm.vehicle", "drone2", "tcp://{local_address}/vsm");
    processor.unadvertise_service(instance_id);

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && !saw_byebye.load(Ordering::SeqCst) {
        processor.poll_once();
        std::thread::sleep(Duration::from_millis(20));
    }

    assert!(saw_byebye.load(Ordering::SeqCst), "never observed our own byebye over loopback");
}
