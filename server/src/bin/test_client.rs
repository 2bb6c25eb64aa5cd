//! Scripted controller for exercising a running server by hand.
//!
//! Joins with a random durable id, wanders with random intents, fires actions,
//! probes round-trip time and then drops its connection to resume on a new one.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use server::client_manager::to_message;
use server::utils::get_timestamp;
use shared::{decode_binary, decode_text, encode, Packet, WireFormat, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::time::{interval, sleep, Instant};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3000")]
    server: String,

    /// Display name to join with
    #[arg(short, long, default_value = "bot")]
    name: String,

    /// Seconds to play before dropping the connection
    #[arg(short, long, default_value = "10")]
    drop_after_secs: u64,

    /// Seconds to stay away before resuming
    #[arg(short, long, default_value = "2")]
    away_secs: u64,

    /// Speak bincode binary frames instead of JSON
    #[arg(short, long)]
    binary: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut rng = StdRng::from_entropy();
    let durable_id = format!("bot-{:08x}", rng.gen::<u32>());
    let format = if args.binary {
        WireFormat::Binary
    } else {
        WireFormat::Json
    };

    info!("Playing as {} ({})", args.name, durable_id);

    let hello = Packet::Join {
        durable_id: durable_id.clone(),
        name: Some(args.name.clone()),
        photo: None,
    };
    play(&args, &hello, format, &mut rng).await?;

    info!("Dropped, resuming in {}s", args.away_secs);
    sleep(Duration::from_secs(args.away_secs)).await;

    let resume = Packet::Resume { durable_id };
    play(&args, &resume, format, &mut rng).await?;

    info!("Test client finished");
    Ok(())
}

/// One connection's worth of play, ending by simply dropping the socket
async fn play(
    args: &Args,
    hello: &Packet,
    format: WireFormat,
    rng: &mut StdRng,
) -> Result<(), Box<dyn std::error::Error>> {
    let (websocket, _) = tokio_tungstenite::connect_async(args.server.as_str()).await?;
    let (mut writer, mut reader) = websocket.split();
    info!("Connected to {}", args.server);

    let connect = Packet::Connect {
        client_version: PROTOCOL_VERSION,
    };
    writer.send(to_message(encode(&connect, format)?)).await?;
    writer.send(to_message(encode(hello, format)?)).await?;

    let mut input_interval = interval(Duration::from_millis(100));
    let mut rtt_interval = interval(Duration::from_secs(1));
    let deadline = sleep(Duration::from_secs(args.drop_after_secs));
    tokio::pin!(deadline);
    let mut snapshots = 0u64;
    let started = Instant::now();

    loop {
        tokio::select! {
            _ = &mut deadline => break,

            _ = input_interval.tick() => {
                let action = rng.gen_bool(0.05).then(|| rng.gen_range(1..=2));
                let input = Packet::Input {
                    dx: Some(rng.gen_range(-1.0..=1.0)),
                    dy: Some(rng.gen_range(-1.0..=1.0)),
                    action,
                };
                writer.send(to_message(encode(&input, format)?)).await?;
            },

            _ = rtt_interval.tick() => {
                let probe = Packet::RttProbe { client_time: get_timestamp() };
                writer.send(to_message(encode(&probe, format)?)).await?;
            },

            message = reader.next() => {
                let packet = match message {
                    Some(Ok(Message::Text(text))) => decode_text(&text)?,
                    Some(Ok(Message::Binary(bytes))) => decode_binary(&bytes)?,
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };

                match packet {
                    Packet::Snapshot { tick, players } => {
                        snapshots += 1;
                        if snapshots % 30 == 0 {
                            info!("Snapshot tick {}: {} players", tick, players.len());
                        }
                    }
                    Packet::RttEcho { client_time, .. } => {
                        info!("RTT {}ms", get_timestamp().saturating_sub(client_time));
                    }
                    Packet::Joined { connection_id, sequence_number } => {
                        info!("Joined as #{} on connection {}", sequence_number, connection_id);
                    }
                    Packet::ResumeRejected { durable_id } => {
                        warn!("Server forgot {}", durable_id);
                        break;
                    }
                    Packet::Disconnected { reason } => {
                        warn!("Disconnected: {}", reason);
                        break;
                    }
                    other => info!("Received {}", other.kind()),
                }
            },
        }
    }

    info!(
        "Leaving after {:.1}s with {} snapshots",
        started.elapsed().as_secs_f32(),
        snapshots
    );
    Ok(())
}
