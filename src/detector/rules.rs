//! Declarative connection rules parsed out of `connection.<family>.<id>.*`
//! property keys.

use std::collections::HashMap;

use crate::properties::Properties;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleFamily {
    Serial,
    TcpOut,
    TcpIn,
    UdpAny,
    UdpIn,
    UdpOut,
    Proxy,
    Can,
}

impl RuleFamily {
    fn parse(name: &str) -> Option<RuleFamily> {
        Some(match name {
            "serial" => RuleFamily::Serial,
            "tcp_out" => RuleFamily::TcpOut,
            "tcp_in" => RuleFamily::TcpIn,
            "udp_any" => RuleFamily::UdpAny,
            "udp_in" => RuleFamily::UdpIn,
            "udp_out" => RuleFamily::UdpOut,
            "proxy" => RuleFamily::Proxy,
            "can" => RuleFamily::Can,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRule {
    pub family: Option<RuleFamily>,
    pub id: String,
    pub name_pattern: Option<String>,
    pub baud_rates: Vec<u32>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub local_address: Option<String>,
    pub local_port: Option<u16>,
    pub retry_timeout_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<ConnectionRule>,
    pub serial_exclusions: Vec<String>,
}

impl RuleSet {
    /// Parses every `connection.<family>.<id>.<key>` property into a
    /// [`ConnectionRule`], grouping by `(family, id)`.
    pub fn from_properties(props: &Properties) -> RuleSet {
        let mut by_key: HashMap<(String, String), ConnectionRule> = HashMap::new();
        let mut exclusions = Vec::new();

        for (key, value) in props.entries() {
            let Some(rest) = key.strip_prefix("connection.") else { continue };
            let mut parts = rest.splitn(3, '.');
            let (Some(family_name), Some(id_or_field), rest_field) = (parts.next(), parts.next(), parts.next()) else { continue };

            if family_name == "serial" && id_or_field == "exclude" {
                exclusions.push(value.as_str().to_string());
                continue;
            }

            let Some(field) = rest_field else { continue };
            let rule = by_key.entry((family_name.to_string(), id_or_field.to_string())).or_insert_with(|| ConnectionRule {
                family: RuleFamily::parse(family_name),
                id: id_or_field.to_string(),
                retry_timeout_secs: 10,
                ..Default::default()
            });
            apply_field(rule, field, value.as_str());
        }

        RuleSet { rules: by_key.into_values().collect(), serial_exclusions: exclusions }
    }
}

fn apply_field(rule: &mut ConnectionRule, field: &str, value: &str) {
    match field {
        "name" => rule.name_pattern = Some(value.to_string()),
        "address" => rule.address = Some(value.to_string()),
        "port" => rule.port = value.parse().ok(),
        "local_address" => rule.local_address = Some(value.to_string()),
        "local_port" => rule.local_port = value.parse().ok(),
        "retry_timeout" => rule.retry_timeout_secs = value.parse().unwrap_or(10),
        f if f.starts_with("baud") => {
            if let Ok(baud) = value.parse() {
                rule.baud_rates.push(baud);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_tcp_out_rule() {
        let mut props = Properties::new();
        props.set("connection.tcp_out.vehicle1.address", "10.0.0.5");
        props.set("connection.tcp_out.vehicle1.port", "5760");
        props.set("connection.tcp_out.vehicle1.retry_timeout", "5");

        let rules = RuleSet::from_properties(&props);
        assert_eq!(rules.rules.len(), 1);
        let rule = &rules.rules[0];
        assert_eq!(rule.family, Some(RuleFamily::TcpOut));
        assert_eq!(rule.address.as_deref(), Some("10.0.0.5"));
        assert_eq!(rule.port, Some(5760));
        assert_eq!(rule.retry_timeout_secs, 5);
    }

    #[test]
    fn collects_serial_exclusions_separately_from_rules() {
        let mut props = Properties::new();
        props.set("connection.serial.exclude.0", "ttyS.*");
        let rules = RuleSet::from_properties(&props);
        assert_eq!(rules.serial_exclusions, vec!["ttyS.*".to_string()]);
        assert!(rules.rules.is_empty());
    }
}
