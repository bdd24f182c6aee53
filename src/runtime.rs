//! Process-scoped bundle of every singleton processor. The core forbids
//! constructing a `Socket_processor`/`File_processor`/etc. directly outside
//! of this bundle: `Runtime::initialize` builds the whole set in one place
//! and `Drop` tears every one of them down in reverse order, so a VSM binary
//! can never end up with two competing reactors racing over the same fds.
//!
//! The shape mirrors mio's top-level `Poll` construction: bundle the
//! registration table and wakeup mechanism behind one handle rather than
//! exposing their parts for ad hoc construction.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::detector::{RuleSet, TransportDetector};
use crate::discovery::ServiceDiscoveryProcessor;
use crate::error::VsmResult;
use crate::io::{FileProcessor, SocketProcessor};
use crate::properties::Properties;
use crate::timer::TimerProcessor;
use crate::ucs::Multiplexer;

pub struct RuntimeConfig {
    pub properties: Properties,
    pub discovery_group: Ipv4Addr,
    pub discovery_port: u16,
    pub peer_id: u32,
    /// Presence of `ucs.disable` in the configuration: skip standing up the
    /// multiplexer entirely.
    pub ucs_disabled: bool,
}

impl RuntimeConfig {
    pub fn from_properties(properties: Properties) -> Self {
        let ucs_disabled = properties.contains("ucs.disable");
        RuntimeConfig {
            properties,
            discovery_group: crate::discovery::DEFAULT_MULTICAST_GROUP,
            discovery_port: crate::discovery::DEFAULT_PORT,
            peer_id: std::process::id(),
            ucs_disabled,
        }
    }
}

/// The live set of singleton processors for one process. There is
/// intentionally no public constructor for any of `socket`, `file`,
/// `timer`, `detector`, `discovery`, or `ucs` — `Runtime::initialize` is the
/// only path that brings them into existence, and dropping the `Runtime`
/// is the only path that tears them down.
pub struct Runtime {
    pub socket: Arc<SocketProcessor>,
    pub file: Arc<FileProcessor>,
    pub timer: Arc<TimerProcessor>,
    pub detector: Arc<TransportDetector>,
    pub discovery: Option<Arc<ServiceDiscoveryProcessor>>,
    pub ucs: Option<Arc<Multiplexer>>,
}

impl Runtime {
    pub fn initialize(config: RuntimeConfig) -> VsmResult<Runtime> {
        let socket = SocketProcessor::new()?;
        let file = FileProcessor::new()?;
        let timer = Arc::new(TimerProcessor::new());
        let rule_set = RuleSet::from_properties(&config.properties);
        let detector = TransportDetector::new(rule_set);

        let discovery = match ServiceDiscoveryProcessor::new(config.discovery_group, config.discovery_port) {
            Ok(processor) => Some(processor),
            Err(err) => {
                log::warn!("service discovery unavailable, continuing without it: {err}");
                None
            }
        };

        let ucs = if config.ucs_disabled { None } else { Some(Arc::new(Multiplexer::new(config.peer_id))) };

        Ok(Runtime { socket, file, timer, detector, discovery, ucs })
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        log::debug!("runtime shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_brings_up_every_mandatory_processor() {
        let config = RuntimeConfig::from_properties(Properties::new());
        let runtime = Runtime::initialize(config).unwrap();
        assert!(runtime.ucs.is_some());
    }

    #[test]
    fn ucs_disable_property_skips_standing_up_the_multiplexer() {
        let mut properties = Properties::new();
        properties.set("ucs.disable", "");
        let config = RuntimeConfig::from_properties(properties);
        let runtime = Runtime::initialize(config).unwrap();
        assert!(runtime.ucs.is_none());
    }
}
