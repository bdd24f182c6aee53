//! Transport Detector: parses declarative connection rules out of a
//! properties file, keeps a rotating cursor of candidate detectors per
//! discovered port, and drives the proxy handshake for `proxy`-family
//! rules. The dispatch shape — one callback slot per registered probe,
//! rotation posts a stream to it — mirrors a `deprecated::Handler` table.

mod proxy;
mod rules;

pub use proxy::{run_proxy_handshake, ProxyOutcome};
pub use rules::{ConnectionRule, RuleFamily, RuleSet};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::callback::Callback;

/// One serial device name or IP endpoint a rule matched against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortKey {
    Serial(String),
    Endpoint { local_address: Option<String>, local_port: Option<u16>, address: Option<String>, port: Option<u16> },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PortState {
    None,
    Opening,
    Owned,
}

struct DetectorEntry {
    rule: ConnectionRule,
    baud: Option<u32>,
    probe: Callback<Result<(), ()>>,
}

struct Port {
    state: PortState,
    entries: Vec<DetectorEntry>,
    cursor: usize,
    last_attempt: Option<Instant>,
    retry_timeout: Duration,
}

/// Rotates through each port's registered detectors on a 1 s watchdog tick.
/// Actually opening a transport and running a probe is left
/// to the caller via [`TransportDetector::tick`]'s returned due ports —
/// keeping this module free of a hard dependency on [`crate::io`] lets it
/// be driven by either the socket or file processor depending on rule
/// family.
pub struct TransportDetector {
    rule_set: RuleSet,
    ports: Mutex<HashMap<PortKey, Port>>,
}

impl TransportDetector {
    pub fn new(rule_set: RuleSet) -> Arc<Self> {
        Arc::new(TransportDetector { ports: Mutex::new(HashMap::new()), rule_set })
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    pub fn register_port(&self, key: PortKey, entries: Vec<(ConnectionRule, Option<u32>, Callback<Result<(), ()>>)>, retry_timeout: Duration) {
        let entries = entries.into_iter().map(|(rule, baud, probe)| DetectorEntry { rule, baud, probe }).collect();
        self.ports.lock().unwrap().insert(key, Port { state: PortState::None, entries, cursor: 0, last_attempt: None, retry_timeout });
    }

    pub fn remove_port(&self, key: &PortKey) {
        self.ports.lock().unwrap().remove(key);
    }

    pub fn state_of(&self, key: &PortKey) -> Option<PortState> {
        self.ports.lock().unwrap().get(key).map(|p| p.state)
    }

    /// Called by a probe once it has determined the stream it was handed
    /// does not speak its protocol; advances that port's cursor so the next
    /// watchdog tick tries the next detector entry.
    pub fn protocol_not_detected(&self, key: &PortKey) {
        let mut ports = self.ports.lock().unwrap();
        if let Some(port) = ports.get_mut(key) {
            port.state = PortState::None;
            port.cursor = (port.cursor + 1) % port.entries.len().max(1);
        }
    }

    pub fn protocol_detected(&self, key: &PortKey) {
        if let Some(port) = self.ports.lock().unwrap().get_mut(key) {
            port.state = PortState::Owned;
        }
    }

    /// Runs one watchdog tick: returns every port that is due for its next
    /// detector attempt, advancing `last_attempt` for each. The caller is
    /// responsible for actually opening the transport and invoking the
    /// matched entry's `probe`.
    pub fn tick(&self, now: Instant) -> Vec<(PortKey, ConnectionRule, Option<u32>, Callback<Result<(), ()>>)> {
        let mut due = Vec::new();
        let mut ports = self.ports.lock().unwrap();
        for (key, port) in ports.iter_mut() {
            if port.state != PortState::None || port.entries.is_empty() {
                continue;
            }
            let elapsed_ok = port.last_attempt.map(|t| now.duration_since(t) >= port.retry_timeout).unwrap_or(true);
            if !elapsed_ok {
                continue;
            }
            port.last_attempt = Some(now);
            port.state = PortState::Opening;
            let entry = &port.entries[port.cursor];
            due.push((key.clone(), entry.rule.clone(), entry.baud, entry.probe.clone()));
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rules::RuleFamily;

    #[test]
    fn rotates_to_the_next_entry_after_protocol_not_detected() {
        let detector = TransportDetector::new(RuleSet::default());
        let key = PortKey::Serial("ttyUSB0".into());
        let rule_a = ConnectionRule { family: Some(RuleFamily::Serial), id: "a".into(), ..Default::default() };
        let rule_b = ConnectionRule { family: Some(RuleFamily::Serial), id: "b".into(), ..Default::default() };
        let cb = Callback::new(Ok(()), |_| {});
        detector.register_port(
            key.clone(),
            vec![(rule_a, Some(57600), cb.clone()), (rule_b, Some(115200), cb.clone())],
            Duration::from_secs(0),
        );

        let due = detector.tick(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].2, Some(57600));

        detector.protocol_not_detected(&key);
        let due2 = detector.tick(Instant::now());
        assert_eq!(due2[0].2, Some(115200));
    }
}
