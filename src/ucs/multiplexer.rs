//! Cucs: the UCS multiplexer. Tracks which devices are registered on which
//! connection, caches the last known telemetry/command-availability state
//! per device so a new or re-registering connection starts coherent, and
//! routes inbound/outbound device-scoped messages.
//!
//! Grounded on [`crate::request::container::RequestContainer`] for the
//! "submit now, resolve later via a completion handler" shape applied here
//! to `register_device` responses, and on [`crate::callback::Callback`] for
//! carrying the eventual response back to the registering caller.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::message::{proto::PeerType, DeviceResponse, DeviceStatus, RegisterDevice, ResponseCode, VsmMessage};
use super::peer::{ConnectionId, PeerRegistry};
use crate::callback::Callback;

#[derive(Default)]
struct ConnectionState {
    peer_id: Option<u32>,
    registered_devices: HashSet<u32>,
}

#[derive(Default, Clone)]
struct DeviceCache {
    telemetry: HashMap<u32, super::message::TelemetryField>,
    command_availability: HashMap<u32, bool>,
}

/// What the caller of [`Multiplexer::outbound`] should actually do with a
/// device-scoped message once routing has decided its fate.
pub enum Routed {
    /// Send `message` on the given connections.
    Send(Vec<ConnectionId>),
    /// The device was not registered on any eligible connection; the
    /// message is silently dropped.
    Dropped,
}

pub struct Multiplexer {
    this_peer_id: u32,
    connections: Mutex<HashMap<ConnectionId, ConnectionState>>,
    registry: Mutex<PeerRegistry>,
    device_cache: Mutex<HashMap<u32, DeviceCache>>,
    /// Devices whose cached telemetry/availability changed since the last
    /// flush. `set_telemetry`/`set_command_availability` mark a device
    /// dirty instead of sending immediately; a `device_status` update is
    /// only emitted once per worker tick via `flush_dirty`, coalescing
    /// multiple rapid changes into one wire message.
    dirty: Mutex<HashSet<u32>>,
    next_message_id: AtomicU32,
}

impl Multiplexer {
    pub fn new(this_peer_id: u32) -> Self {
        Multiplexer {
            this_peer_id,
            connections: Mutex::new(HashMap::new()),
            registry: Mutex::new(PeerRegistry::new()),
            device_cache: Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            next_message_id: AtomicU32::new(1),
        }
    }

    /// Records a telemetry field change, marking the device dirty for the
    /// next [`Multiplexer::flush_dirty`] rather than sending immediately.
    pub fn set_telemetry(&self, device_id: u32, field: super::message::TelemetryField) {
        let mut cache = self.device_cache.lock().unwrap();
        let entry = cache.entry(device_id).or_default();
        if field.is_na {
            entry.telemetry.remove(&field.field_id);
        } else {
            entry.telemetry.insert(field.field_id, field);
        }
        self.dirty.lock().unwrap().insert(device_id);
    }

    pub fn set_command_availability(&self, device_id: u32, command_id: u32, available: bool) {
        self.device_cache.lock().unwrap().entry(device_id).or_default().command_availability.insert(command_id, available);
        self.dirty.lock().unwrap().insert(device_id);
    }

    /// Drains the dirty set and builds one coalesced `device_status` burst
    /// per changed device, to be sent to every connection that has it
    /// registered. Intended to be called once per worker tick rather than
    /// once per individual field change.
    pub fn flush_dirty(&self) -> Vec<(u32, VsmMessage)> {
        let dirty: Vec<u32> = self.dirty.lock().unwrap().drain().collect();
        let cache = self.device_cache.lock().unwrap();
        dirty
            .into_iter()
            .filter_map(|device_id| {
                let snapshot = cache.get(&device_id)?.clone();
                Some((
                    device_id,
                    VsmMessage {
                        device_id,
                        device_status: Some(DeviceStatus {
                            telemetry_fields: snapshot.telemetry.into_values().collect(),
                            command_availability: snapshot
                                .command_availability
                                .into_iter()
                                .map(|(command_id, available)| super::message::CommandAvailability { command_id, available })
                                .collect(),
                        }),
                        ..Default::default()
                    },
                ))
            })
            .collect()
    }

    /// The first message a newly accepted socket must send: announce
    /// ourselves before anything else is read.
    pub fn our_register_peer(&self) -> VsmMessage {
        VsmMessage {
            register_peer: Some(super::message::RegisterPeer {
                peer_id: self.this_peer_id,
                peer_type: PeerType::Vsm as i32,
                version_major: 1,
                version_minor: 0,
                version_build: 0,
            }),
            ..Default::default()
        }
    }

    pub fn accept_connection(&self, conn: ConnectionId, remote_addr: std::net::IpAddr) {
        self.connections.lock().unwrap().insert(conn, ConnectionState::default());
        self.registry.lock().unwrap().note_connection_address(conn, remote_addr);
    }

    pub fn remove_connection(&self, conn: ConnectionId) {
        self.connections.lock().unwrap().remove(&conn);
        self.registry.lock().unwrap().remove_connection(conn);
    }

    pub fn next_message_id(&self) -> u32 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Processes one inbound message on `conn`. Until the peer id is known,
    /// only `register_peer` (claiming `peer_type=SERVER`) is accepted;
    /// anything else should cause the caller to close the connection.
    pub fn handle_inbound(&self, conn: ConnectionId, message: &VsmMessage) -> InboundOutcome {
        let mut connections = self.connections.lock().unwrap();
        let Some(state) = connections.get_mut(&conn) else { return InboundOutcome::CloseConnection };

        if state.peer_id.is_none() {
            let Some(register) = &message.register_peer else { return InboundOutcome::CloseConnection };
            if register.peer_type != PeerType::Server as i32 {
                return InboundOutcome::CloseConnection;
            }
            state.peer_id = Some(register.peer_id);
            drop(connections);
            let became_primary = self.registry.lock().unwrap().register(register.peer_id, conn);
            return InboundOutcome::Registered { peer_id: register.peer_id, became_primary };
        }

        if let Some(response) = &message.device_response {
            return InboundOutcome::DeviceResponse { device_id: message.device_id, message_id: message.message_id, response: response.clone() };
        }

        if message.device_id != 0 && !state.registered_devices.is_empty() {
            // Addressed to a device already registered somewhere: caller
            // routes device_commands onward; nothing more to do here.
        }

        InboundOutcome::Forward
    }

    /// Broadcasts `register_device` to every primary connection, requesting
    /// a response. `on_result` is invoked once with the final code (OK or
    /// FAILED-equivalent); IN_PROGRESS reports are logged by the caller and
    /// do not invoke it.
    pub fn register_device(&self, device_id: u32, payload: RegisterDevice, message_id: u32) -> (VsmMessage, Vec<ConnectionId>) {
        let message = VsmMessage { device_id, message_id, response_required: true, register_device: Some(payload), ..Default::default() };
        let targets = self.registry.lock().unwrap().primary_connections();
        (message, targets)
    }

    /// Call once a `register_device` response with code OK arrives: marks
    /// the device registered on that connection and builds the
    /// resynchronization burst of cached telemetry/command-availability.
    pub fn finalize_device_registration(&self, conn: ConnectionId, device_id: u32) -> VsmMessage {
        if let Some(state) = self.connections.lock().unwrap().get_mut(&conn) {
            state.registered_devices.insert(device_id);
        }
        let cache = self.device_cache.lock().unwrap();
        let snapshot = cache.get(&device_id).cloned().unwrap_or_default();
        VsmMessage {
            device_id,
            device_status: Some(DeviceStatus {
                telemetry_fields: snapshot.telemetry.into_values().collect(),
                command_availability: snapshot
                    .command_availability
                    .into_iter()
                    .map(|(command_id, available)| super::message::CommandAvailability { command_id, available })
                    .collect(),
            }),
            ..Default::default()
        }
    }

    pub fn abandon_device_registration(&self, conn: ConnectionId, device_id: u32) {
        if let Some(state) = self.connections.lock().unwrap().get_mut(&conn) {
            state.registered_devices.remove(&device_id);
        }
    }

    pub fn unregister_device(&self, conn: ConnectionId, device_id: u32) {
        self.abandon_device_registration(conn, device_id);
    }

    /// Updates the cached last-known value for a telemetry field or command
    /// availability record, so future re-registrations see current state.
    pub fn cache_device_status(&self, device_id: u32, status: &DeviceStatus) {
        let mut cache = self.device_cache.lock().unwrap();
        let entry = cache.entry(device_id).or_default();
        for field in &status.telemetry_fields {
            if field.is_na {
                entry.telemetry.remove(&field.field_id);
            } else {
                entry.telemetry.insert(field.field_id, field.clone());
            }
        }
        for avail in &status.command_availability {
            entry.command_availability.insert(avail.command_id, avail.available);
        }
    }

    /// Decides where a device-scoped outbound message should go: only
    /// connections that have that device registered.
    pub fn outbound(&self, device_id: u32) -> Routed {
        let connections = self.connections.lock().unwrap();
        let targets: Vec<ConnectionId> =
            connections.iter().filter(|(_, state)| state.registered_devices.contains(&device_id)).map(|(id, _)| *id).collect();
        if targets.is_empty() {
            Routed::Dropped
        } else {
            Routed::Send(targets)
        }
    }

    /// Builds the default-FAILED response template an inbound
    /// response-required message gets, mirroring device_id/message_id, to
    /// be finalized by the addressed device's completion handler.
    pub fn response_template(device_id: u32, message_id: u32) -> VsmMessage {
        VsmMessage {
            device_id,
            message_id,
            device_response: Some(DeviceResponse { code: ResponseCode::Failed as i32, progress: 0, status: String::new() }),
            ..Default::default()
        }
    }

    pub fn invalid_session_response(device_id: u32, message_id: u32) -> VsmMessage {
        VsmMessage {
            device_id,
            message_id,
            device_response: Some(DeviceResponse { code: ResponseCode::InvalidSessionId as i32, progress: 0, status: String::new() }),
            ..Default::default()
        }
    }
}

pub enum InboundOutcome {
    Registered { peer_id: u32, became_primary: bool },
    DeviceResponse { device_id: u32, message_id: u32, response: DeviceResponse },
    Forward,
    CloseConnection,
}

/// Bundles a completion callback with the device id/message id it resolves,
/// used while a `register_device` response is outstanding.
pub struct PendingRegistration {
    pub device_id: u32,
    pub on_result: Callback<ResponseCode>,
}
