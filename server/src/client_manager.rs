//! Transport connection management for the arena server
//!
//! This module tracks every open WebSocket connection, whether it belongs to a
//! controller or to a host display:
//! - Connection lifecycle (accept, close, idle timeout)
//! - Per-connection outbound queues with best-effort delivery
//! - The wire format each peer speaks, so broadcasts are encoded once per format
//! - Capacity limits
//!
//! Connections know nothing about players. Binding a connection to a durable
//! player identity is the session registry's job.

use log::{debug, error, info};
use shared::{encode, ConnectionId, Frame, Packet, WireFormat};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;

/// Represents an open transport connection
#[derive(Debug)]
pub struct Client {
    /// Connection identifier assigned by the server, never reused
    pub id: ConnectionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    /// Last time we received any frame from this peer
    pub last_seen: Instant,
    /// Format of the most recent decodable frame
    pub format: WireFormat,
    /// Bounded queue drained by the connection's writer task
    pub sender: mpsc::Sender<Message>,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            format: WireFormat::default(),
            sender,
        }
    }

    /// Records activity, optionally switching the preferred wire format
    pub fn touch(&mut self, format: Option<WireFormat>) {
        self.last_seen = Instant::now();
        if let Some(format) = format {
            self.format = format;
        }
    }

    /// Checks if the peer has been silent for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Queues a frame without waiting. A full queue drops the frame.
    fn deliver(&self, message: Message) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full for connection {}, dropping", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

pub fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Manages all open connections and fans packets out to them
pub struct ClientManager {
    /// Open connections indexed by their id
    clients: HashMap<ConnectionId, Client>,
    /// Next id handed to an accepted connection
    next_client_id: ConnectionId,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Connection ids start from 1 and increment for each accepted connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers an accepted connection
    ///
    /// Returns Some(connection_id) if successful, None if the server is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::Sender<Message>,
    ) -> Option<ConnectionId> {
        // Enforce server capacity limits
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Connection {} opened from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    /// Forgets a connection. Dropping its sender ends the writer task.
    pub fn remove_client(&mut self, client_id: &ConnectionId) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Connection {} from {} closed", client.id, client.addr);
        Some(client)
    }

    pub fn contains(&self, client_id: &ConnectionId) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn format_of(&self, client_id: &ConnectionId) -> Option<WireFormat> {
        self.clients.get(client_id).map(|client| client.format)
    }

    /// Records inbound activity for a connection
    pub fn touch(&mut self, client_id: ConnectionId, format: Option<WireFormat>) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.touch(format);
                true
            }
            None => false,
        }
    }

    /// Sends a packet to one connection in its own wire format
    pub fn send(&self, client_id: ConnectionId, packet: &Packet) -> bool {
        let Some(client) = self.clients.get(&client_id) else {
            return false;
        };

        match encode(packet, client.format) {
            Ok(frame) => client.deliver(to_message(frame)),
            Err(e) => {
                error!("Failed to encode {} packet: {}", packet.kind(), e);
                false
            }
        }
    }

    /// Sends a packet to every connection, encoding it at most once per format.
    /// Returns how many connections accepted it.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        let mut json: Option<Message> = None;
        let mut binary: Option<Message> = None;
        let mut delivered = 0;

        for client in self.clients.values() {
            let slot = match client.format {
                WireFormat::Json => &mut json,
                WireFormat::Binary => &mut binary,
            };

            if slot.is_none() {
                match encode(packet, client.format) {
                    Ok(frame) => *slot = Some(to_message(frame)),
                    Err(e) => {
                        error!("Failed to encode {} packet: {}", packet.kind(), e);
                        continue;
                    }
                }
            }

            if let Some(message) = slot {
                if client.deliver(message.clone()) {
                    delivered += 1;
                }
            }
        }

        delivered
    }

    /// Sends a WebSocket ping to every connection so idle peers answer with a pong
    pub fn ping_all(&self) {
        for client in self.clients.values() {
            client.deliver(Message::Ping(Vec::new()));
        }
    }

    /// Removes connections that have been silent longer than `timeout`
    ///
    /// Returns the removed ids so their players can enter the grace period.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ConnectionId> {
        let timed_out: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no connections are open
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
