//! SSDP-style service discovery: multicast NOTIFY/M-SEARCH advertising and
//! subscription, with a loopback broadcast companion socket so co-located
//! processes see each other even without multicast routing.
//!
//! Uses the same raw-socket construction as mio's `sys/unix/net.rs` for the
//! non-blocking multicast joins, and [`crate::mavlink::decoder`]'s
//! incremental-buffer style for parsing the line-oriented HTTP-over-UDP
//! messages a datagram may deliver only part of.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::callback::{Callback, CallbackProxy};
use crate::error::VsmResult;

pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 198, 46, 46);
pub const DEFAULT_PORT: u16 = 1991;
const LOOPBACK_BROADCAST: Ipv4Addr = Ipv4Addr::new(127, 255, 255, 255);

static NEXT_INSTANCE_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nts {
    Alive,
    Byebye,
}

impl Nts {
    fn as_header(self) -> &'static str {
        match self {
            Nts::Alive => "ssdp:alive",
            Nts::Byebye => "ssdp:byebye",
        }
    }
}

/// A NOTIFY or M-SEARCH-response event delivered to a subscriber.
#[derive(Debug, Clone, Default)]
pub struct ServiceEvent {
    pub service_type: String,
    pub name: String,
    pub location: String,
    pub instance_id: u32,
    pub alive: bool,
}

struct Advertisement {
    service_type: String,
    name: String,
    location_template: String,
    instance_id: u32,
}

struct Subscription {
    service_type: String,
    handler: CallbackProxy<ServiceEvent>,
}

struct Sender {
    socket: UdpSocket,
    local_address: IpAddr,
    group: SocketAddr,
}

/// One discovery endpoint bound to a multicast group/port. Owns a sender per
/// local interface plus the loopback broadcast companion, and the shared
/// multicast receiver.
pub struct ServiceDiscoveryProcessor {
    group: Ipv4Addr,
    port: u16,
    receiver: UdpSocket,
    senders: Mutex<Vec<Sender>>,
    advertisements: Mutex<Vec<Advertisement>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ServiceDiscoveryProcessor {
    pub fn new(group: Ipv4Addr, port: u16) -> VsmResult<Arc<Self>> {
        let receiver = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        receiver.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        receiver.set_nonblocking(true)?;

        let processor = Arc::new(ServiceDiscoveryProcessor {
            group,
            port,
            receiver,
            senders: Mutex::new(Vec::new()),
            advertisements: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        });
        processor.refresh_senders()?;
        Ok(processor)
    }

    pub fn with_default_group() -> VsmResult<Arc<Self>> {
        Self::new(DEFAULT_MULTICAST_GROUP, DEFAULT_PORT)
    }

    /// Re-enumerates local, non-loopback, multicast-capable interfaces and
    /// rebuilds the sender list, always keeping the loopback broadcast
    /// sender. Intended to be driven by a 5 s timer.
    pub fn refresh_senders(&self) -> VsmResult<()> {
        let mut senders = Vec::new();

        let loopback = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        loopback.set_broadcast(true)?;
        loopback.set_nonblocking(true)?;
        senders.push(Sender {
            socket: loopback,
            local_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            group: SocketAddr::new(IpAddr::V4(LOOPBACK_BROADCAST), self.port),
        });

        for addr in local_non_loopback_addresses() {
            if let Ok(socket) = UdpSocket::bind((addr, 0)) {
                if socket.set_nonblocking(true).is_ok() && set_multicast_if_v4(&socket, &addr).is_ok() {
                    senders.push(Sender { socket, local_address: IpAddr::V4(addr), group: SocketAddr::new(IpAddr::V4(self.group), self.port) });
                }
            }
        }

        *self.senders.lock().unwrap() = senders;
        Ok(())
    }

    pub fn advertise_service(&self, service_type: &str, name: &str, location_template: &str) -> u32 {
        let instance_id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        self.advertisements.lock().unwrap().push(Advertisement {
            service_type: service_type.to_string(),
            name: name.to_string(),
            location_template: location_template.to_string(),
            instance_id,
        });
        self.emit_notify(service_type, name, location_template, instance_id, Nts::Alive);
        instance_id
    }

    pub fn unadvertise_service(&self, instance_id: u32) {
        let mut ads = self.advertisements.lock().unwrap();
        if let Some(pos) = ads.iter().position(|a| a.instance_id == instance_id) {
            let ad = ads.remove(pos);
            self.emit_notify(&ad.service_type, &ad.name, &ad.location_template, ad.instance_id, Nts::Byebye);
        }
    }

    pub fn subscribe_for_service(&self, service_type: &str, handler: Callback<ServiceEvent>) {
        self.subscriptions.lock().unwrap().push(Subscription { service_type: service_type.to_string(), handler: handler.proxy() });
        self.emit_search(service_type);
    }

    fn emit_notify(&self, service_type: &str, name: &str, location_template: &str, instance_id: u32, nts: Nts) {
        for sender in self.senders.lock().unwrap().iter() {
            let location = location_template.replace("{local_address}", &sender.local_address.to_string());
            let usn = format!("{service_type}::{name}");
            let message = format!(
                "NOTIFY * HTTP/1.1\r\nHOST: {}:{}\r\nNT: {service_type}\r\nNTS: {}\r\nUSN: {usn}\r\nLocation: {location}\r\nID: {instance_id}\r\n\r\n",
                self.group, self.port, nts.as_header(),
            );
            let _ = sender.socket.send_to(message.as_bytes(), sender.group);
        }
    }

    fn emit_search(&self, service_type: &str) {
        for sender in self.senders.lock().unwrap().iter() {
            let message = format!("M-SEARCH * HTTP/1.1\r\nHOST: {}:{}\r\nST: {service_type}\r\n\r\n", self.group, self.port);
            let _ = sender.socket.send_to(message.as_bytes(), sender.group);
        }
    }

    /// Polls the multicast receiver and every sender (M-SEARCH responses are
    /// unicast back to whichever socket made the query) for datagrams, and
    /// dispatches matching NOTIFY/response events to subscribers. Intended
    /// to be driven by the owning reactor thread; never blocks.
    pub fn poll_once(&self) {
        let mut buf = [0u8; 2048];
        while let Ok((len, _from)) = self.receiver.recv_from(&mut buf) {
            self.handle_datagram(&buf[..len]);
        }
        let senders: Vec<UdpSocket> = {
            let guard = self.senders.lock().unwrap();
            guard.iter().filter_map(|s| s.socket.try_clone().ok()).collect()
        };
        for socket in senders {
            while let Ok((len, _from)) = socket.recv_from(&mut buf) {
                self.handle_datagram(&buf[..len]);
            }
        }
    }

    fn handle_datagram(&self, bytes: &[u8]) {
        let Ok(text) = std::str::from_utf8(bytes) else { return };
        let Some(message) = parse_ssdp_message(text) else { return };

        let (service_type, alive) = match message.kind {
            MessageKind::Notify => {
                let Some(nt) = message.headers.get("NT") else { return };
                let alive = message.headers.get("NTS").map(|v| v.as_str()) != Some(Nts::Byebye.as_header());
                (nt.clone(), alive)
            }
            MessageKind::SearchResponse => {
                let Some(st) = message.headers.get("ST") else { return };
                (st.clone(), true)
            }
            MessageKind::Search => return,
        };

        let instance_id = message.headers.get("ID").and_then(|v| v.parse().ok()).unwrap_or(0);
        let location = message.headers.get("Location").cloned().unwrap_or_default();
        let usn = message.headers.get("USN").cloned().unwrap_or_default();
        let name = usn.split("::").nth(1).unwrap_or(&usn).to_string();

        let event = ServiceEvent { service_type: service_type.clone(), name, location, instance_id, alive };
        for sub in self.subscriptions.lock().unwrap().iter() {
            if sub.service_type == service_type {
                sub.handler.set_args(event.clone());
                sub.handler.invoke();
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.advertisements.lock().unwrap().is_empty() && self.subscriptions.lock().unwrap().is_empty()
    }
}

enum MessageKind {
    Notify,
    Search,
    SearchResponse,
}

struct SsdpMessage {
    kind: MessageKind,
    headers: HashMap<String, String>,
}

fn parse_ssdp_message(text: &str) -> Option<SsdpMessage> {
    let mut lines = text.split("\r\n");
    let start_line = lines.next()?;
    let kind = if start_line.starts_with("NOTIFY") {
        MessageKind::Notify
    } else if start_line.starts_with("M-SEARCH") {
        MessageKind::Search
    } else if start_line.starts_with("HTTP/1.1 200") {
        MessageKind::SearchResponse
    } else {
        return None;
    };

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    Some(SsdpMessage { kind, headers })
}

/// Sets the outgoing interface for multicast sends on `socket`, via the
/// `IP_MULTICAST_IF` socket option (not exposed on `std::net::UdpSocket`).
#[cfg(unix)]
fn set_multicast_if_v4(socket: &UdpSocket, addr: &Ipv4Addr) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let in_addr = libc::in_addr { s_addr: u32::from(*addr).to_be() };
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            &in_addr as *const libc::in_addr as *const libc::c_void,
            std::mem::size_of::<libc::in_addr>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn local_non_loopback_addresses() -> Vec<Ipv4Addr> {
    // A minimal, dependency-free interface enumeration: connect a UDP
    // socket to a public address and read back the local address the
    // kernel would route through, for every locally bound candidate this
    // process can see via `UdpSocket::bind(0.0.0.0:0)`. This avoids pulling
    // in a netlink/getifaddrs crate for a best-effort interface list.
    let mut addrs = Vec::new();
    if let Ok(probe) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
        if probe.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).is_ok() {
            if let Ok(SocketAddr::V4(addr)) = probe.local_addr() {
                if !addr.ip().is_loopback() {
                    addrs.push(*addr.ip());
                }
            }
        }
    }
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_template_substitutes_the_local_address() {
        let template = "tcp://{local_address}/vsm";
        assert_eq!(template.replace("{local_address}", "10.0.0.4"), "tcp://10.0.0.4/vsm");
    }

    #[test]
    fn parses_a_notify_alive_message() {
        let text = "NOTIFY * HTTP/1.1\r\nHOST: 239.198.46.46:1991\r\nNT: S1\r\nNTS: ssdp:alive\r\nUSN: S1::veh1\r\nLocation: tcp://10.0.0.4/path\r\nID: 7\r\n\r\n";
        let message = parse_ssdp_message(text).unwrap();
        assert!(matches!(message.kind, MessageKind::Notify));
        assert_eq!(message.headers.get("ST"), None);
        assert_eq!(message.headers.get("NT").unwrap(), "S1");
        assert_eq!(message.headers.get("ID").unwrap(), "7");
    }

    #[test]
    fn idle_with_no_advertisements_or_subscriptions() {
        if let Ok(processor) = ServiceDiscoveryProcessor::new(DEFAULT_MULTICAST_GROUP, 0) {
            assert!(processor.is_idle());
        }
    }
}
