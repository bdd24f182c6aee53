//! `Runtime::initialize` brings up every mandatory processor from a parsed
//! configuration file and tears them down together on drop.

use std::time::Instant;

use vsm_core::properties::Properties;
use vsm_core::runtime::{Runtime, RuntimeConfig};

#[test]
fn a_configuration_without_ucs_disable_stands_up_the_multiplexer() {
    let properties = Properties::parse("connection.tcp_out.vehicle1.address = 127.0.0.1\nconnection.tcp_out.vehicle1.port = 5760\n");
    let config = RuntimeConfig::from_properties(properties);
    let runtime = Runtime::initialize(config).expect("runtime should initialize with no OS resource contention");

    assert!(runtime.ucs.is_some());
    // No ports have been registered with the detector yet, so nothing is due.
    assert!(runtime.detector.tick(Instant::now()).is_empty());
}

#[test]
fn dropping_the_runtime_does_not_panic() {
    let config = RuntimeConfig::from_properties(Properties::new());
    let runtime = Runtime::initialize(config).unwrap();
    drop(runtime);
}
