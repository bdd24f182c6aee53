//! A `.properties` source file parsed end-to-end into transport detector
//! rules, exercising the path `Properties::parse` -> `RuleSet::from_properties`
//! a real configuration file would take.

use vsm_core::detector::{RuleFamily, RuleSet};
use vsm_core::properties::Properties;

const CONFIG: &str = "\
# Primary vehicle link\n\
connection.tcp_out.vehicle1.address = 10.0.0.5\n\
connection.tcp_out.vehicle1.port = 5760\n\
connection.tcp_out.vehicle1.retry_timeout = 5\n\
\n\
# Serial fallback, two candidate baud rates\n\
connection.serial.vehicle1.name = /dev/ttyUSB*\n\
connection.serial.vehicle1.baud.0 = 57600\n\
connection.serial.vehicle1.baud.1 = 115200\n\
connection.serial.exclude = /dev/ttyUSB-modem\n\
\n\
ucs.disable = true\n\
";

#[test]
fn parses_a_full_configuration_file_into_detector_rules() {
    let properties = Properties::parse(CONFIG);
    assert!(properties.contains("ucs.disable"));

    let rules = RuleSet::from_properties(&properties);
    assert_eq!(rules.serial_exclusions, vec!["/dev/ttyUSB-modem".to_string()]);

    let tcp = rules.rules.iter().find(|r| r.family == Some(RuleFamily::TcpOut)).unwrap();
    assert_eq!(tcp.address.as_deref(), Some("10.0.0.5"));
    assert_eq!(tcp.port, Some(5760));
    assert_eq!(tcp.retry_timeout_secs, 5);

    let serial = rules.rules.iter().find(|r| r.family == Some(RuleFamily::Serial)).unwrap();
    assert_eq!(serial.name_pattern.as_deref(), Some("/dev/ttyUSB*"));
    assert_eq!(serial.baud_rates, vec![57600, 115200]);
}

#[test]
fn round_tripping_through_store_preserves_every_rule() {
    let properties = Properties::parse(CONFIG);
    let stored = properties.store();
    let reparsed = Properties::parse(&stored);

    let original_rules = RuleSet::from_properties(&properties);
    let reparsed_rules = RuleSet::from_properties(&reparsed);
    assert_eq!(original_rules.rules.len(), reparsed_rules.rules.len());
    assert_eq!(original_rules.serial_exclusions, reparsed_rules.serial_exclusions);
}
