//! Server network layer handling WebSocket connections and game loop coordination
//!
//! One task owns the [`GameState`] and the [`ClientManager`]. Connection tasks,
//! grace timers and the interval timers only ever talk to it through messages,
//! so every state change is applied by a single writer in arrival order.

use crate::client_manager::{to_message, ClientManager};
use crate::config::ServerConfig;
use crate::game::{Effects, GameState, Outbound};
use crate::session::Eviction;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{decode_binary, decode_text, encode, ConnectionId, Packet, WireFormat};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

const STATS_EVERY_TICKS: u64 = 300;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Messages sent from connection tasks and timers to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        connection_id: ConnectionId,
        packet: Packet,
        format: WireFormat,
    },
    /// Any frame that carried no packet (pong, ping, undecodable data)
    Heartbeat {
        connection_id: ConnectionId,
    },
    ConnectionClosed {
        connection_id: ConnectionId,
    },
    GraceExpired {
        eviction: Eviction,
    },
    Shutdown,
}

/// Main server coordinating networking and game simulation
pub struct Server {
    listener: TcpListener,
    clients: ClientManager,
    game_state: GameState,
    config: ServerConfig,
    grace_timers: HashMap<Eviction, JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            clients: ClientManager::new(config.max_connections),
            game_state: GameState::new(config.clone()),
            config,
            grace_timers: HashMap::new(),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for stopping the loop from outside, e.g. on ctrl-c
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Registers a fresh TCP connection and spawns its WebSocket task
    fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue);

        match self.clients.add_client(addr, outbound_tx) {
            Some(connection_id) => {
                self.clients
                    .send(connection_id, &Packet::Connected { connection_id });
                // Late hosts still need to know who is already here
                self.clients.send(connection_id, &self.game_state.roster());

                tokio::spawn(run_connection(
                    stream,
                    connection_id,
                    outbound_rx,
                    self.server_tx.clone(),
                ));
            }
            None => {
                warn!("Rejecting connection from {}: server full", addr);
                tokio::spawn(refuse_connection(stream, "Server full"));
            }
        }
    }

    /// Forgets a closed connection and starts its player's grace period
    fn close_connection(&mut self, connection_id: ConnectionId) {
        if self.clients.remove_client(&connection_id).is_some() {
            let effects = self.game_state.disconnect(connection_id);
            self.apply(effects);
        }
    }

    /// Carries out what the game asked for: timers first, then packets in order
    fn apply(&mut self, effects: Effects) {
        for eviction in effects.cancel {
            if let Some(handle) = self.grace_timers.remove(&eviction) {
                handle.abort();
            }
        }

        for eviction in effects.schedule {
            self.schedule_eviction(eviction);
        }

        for outbound in effects.outbound {
            match outbound {
                Outbound::SendPacket {
                    connection_id,
                    packet,
                } => {
                    if !self.clients.send(connection_id, &packet) {
                        debug!(
                            "Could not deliver {} to connection {}",
                            packet.kind(),
                            connection_id
                        );
                    }
                }
                Outbound::BroadcastPacket { packet } => {
                    self.clients.broadcast(&packet);
                }
            }
        }
    }

    /// Spawns a timer that reports back when the grace period runs out
    fn schedule_eviction(&mut self, eviction: Eviction) {
        let server_tx = self.server_tx.clone();
        let grace_period = self.config.grace_period;
        let key = eviction.clone();

        let handle = tokio::spawn(async move {
            sleep(grace_period).await;
            if let Err(e) = server_tx.send(ServerMessage::GraceExpired { eviction }) {
                debug!("Server loop gone before grace expiry: {}", e);
            }
        });

        if let Some(previous) = self.grace_timers.insert(key, handle) {
            previous.abort();
        }
    }

    fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::PacketReceived {
                connection_id,
                packet,
                format,
            } => {
                if !self.clients.touch(connection_id, Some(format)) {
                    debug!("Dropping packet from closed connection {}", connection_id);
                    return true;
                }
                let effects = self.game_state.handle_packet(connection_id, packet);
                self.apply(effects);
            }
            ServerMessage::Heartbeat { connection_id } => {
                self.clients.touch(connection_id, None);
            }
            ServerMessage::ConnectionClosed { connection_id } => {
                self.close_connection(connection_id);
            }
            ServerMessage::GraceExpired { eviction } => {
                self.grace_timers.remove(&eviction);
                let effects = self.game_state.expire(&eviction);
                self.apply(effects);
            }
            ServerMessage::Shutdown => return false,
        }
        true
    }

    fn run_keepalive(&mut self) {
        self.clients.ping_all();

        if let Some(idle_timeout) = self.config.idle_timeout {
            for connection_id in self.clients.check_timeouts(idle_timeout) {
                warn!("Connection {} timed out", connection_id);
                let effects = self.game_state.disconnect(connection_id);
                self.apply(effects);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut tick_interval = interval(self.config.tick_period);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut snapshot_interval = interval(self.config.snapshot_period);
        snapshot_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut keepalive_interval = interval(self.config.keepalive_interval);
        keepalive_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stats_started = Instant::now();

        info!(
            "Server started: tick {:?}, snapshot {:?}, grace {:?}",
            self.config.tick_period, self.config.snapshot_period, self.config.grace_period
        );

        loop {
            tokio::select! {
                // Accept new transport connections
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept_connection(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                },

                // Handle network and timer events
                message = self.server_rx.recv() => {
                    let keep_running = match message {
                        Some(message) => self.handle_message(message),
                        None => false,
                    };
                    if !keep_running {
                        info!("Server shutting down");
                        break;
                    }
                },

                // Advance the simulation
                _ = tick_interval.tick() => {
                    let effects = self.game_state.step();
                    self.apply(effects);

                    // Periodic performance monitoring
                    if self.game_state.tick % STATS_EVERY_TICKS == 0 {
                        let elapsed = stats_started.elapsed().as_secs_f32();
                        stats_started = Instant::now();
                        let registry = self.game_state.registry();
                        debug!(
                            "Tick {}: {} connections, {} players ({} in grace), {:.1}Hz",
                            self.game_state.tick,
                            self.clients.len(),
                            registry.len(),
                            registry.len() - registry.connection_count(),
                            STATS_EVERY_TICKS as f32 / elapsed.max(f32::EPSILON)
                        );
                    }
                },

                // Publish positions
                _ = snapshot_interval.tick() => {
                    if !self.clients.is_empty() {
                        let snapshot = self.game_state.snapshot();
                        self.clients.broadcast(&snapshot);
                    }
                },

                // Ping peers and drop the silent ones
                _ = keepalive_interval.tick() => {
                    self.run_keepalive();
                },
            }
        }

        for (_, handle) in self.grace_timers.drain() {
            handle.abort();
        }

        Ok(())
    }
}

/// Drives one WebSocket: a writer task drains the outbound queue while this task
/// decodes inbound frames and forwards them to the server loop.
async fn run_connection(
    stream: TcpStream,
    connection_id: ConnectionId,
    mut outbound_rx: mpsc::Receiver<Message>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let websocket = match tokio_tungstenite::accept_async(stream).await {
        Ok(websocket) => websocket,
        Err(e) => {
            warn!("WebSocket handshake failed for connection {}: {}", connection_id, e);
            let _ = server_tx.send(ServerMessage::ConnectionClosed { connection_id });
            return;
        }
    };

    let (mut writer, mut reader) = websocket.split();

    let mut writer_handle = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if writer.send(message).await.is_err() {
                break;
            }
        }
        let _ = timeout(CLOSE_TIMEOUT, writer.close()).await;
    });

    loop {
        // The writer only finishes once the server has dropped this connection
        // (idle timeout) or the socket failed, so stop reading then too
        let result = tokio::select! {
            next = reader.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = &mut writer_handle => {
                debug!("Connection {} writer finished, closing socket", connection_id);
                break;
            }
        };

        let event = match result {
            Ok(Message::Text(text)) => match decode_text(&text) {
                Ok(packet) => ServerMessage::PacketReceived {
                    connection_id,
                    packet,
                    format: WireFormat::Json,
                },
                Err(e) => {
                    warn!("Malformed text frame from connection {}: {}", connection_id, e);
                    ServerMessage::Heartbeat { connection_id }
                }
            },
            Ok(Message::Binary(bytes)) => match decode_binary(&bytes) {
                Ok(packet) => ServerMessage::PacketReceived {
                    connection_id,
                    packet,
                    format: WireFormat::Binary,
                },
                Err(e) => {
                    warn!("Malformed binary frame from connection {}: {}", connection_id, e);
                    ServerMessage::Heartbeat { connection_id }
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => ServerMessage::Heartbeat { connection_id },
            Err(e) => {
                debug!("Connection {} read error: {}", connection_id, e);
                break;
            }
        };

        if let Err(e) = server_tx.send(event) {
            error!("Failed to forward frame to main loop: {}", e);
            break;
        }
    }

    let _ = server_tx.send(ServerMessage::ConnectionClosed { connection_id });
    writer_handle.abort();
    // Dropping the read half with the finished write half releases the socket
    drop(reader);
}

/// Completes the handshake only to tell the peer why it is being turned away
async fn refuse_connection(stream: TcpStream, reason: &str) {
    let Ok(mut websocket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    let packet = Packet::Disconnected {
        reason: reason.to_string(),
    };
    match encode(&packet, WireFormat::Json) {
        Ok(frame) => {
            let _ = websocket.send(to_message(frame)).await;
        }
        Err(e) => error!("Failed to encode rejection: {}", e),
    }
    let _ = websocket.close(None).await;
}
