use clap::Parser;
use client::{Client, ClientResult};
use log::{info, warn};
use rand::Rng;
use shared::{Command, Direction, Packet};
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bot client for the pool server", long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8081")]
    server: String,

    /// Interval between random commands in milliseconds
    #[arg(short = 'i', long, default_value = "500")]
    command_interval_ms: u64,

    /// Disconnect after this many seconds, 0 runs until the server closes
    #[arg(short = 'd', long, default_value = "0")]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> ClientResult<()> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut client = Client::connect(&args.server).await?;
    let id = client.join().await?;
    info!("Playing as {}", id);

    let deadline = async {
        if args.duration_secs == 0 {
            std::future::pending::<()>().await;
        } else {
            sleep(Duration::from_secs(args.duration_secs)).await;
        }
    };
    tokio::pin!(deadline);

    let mut ticker = interval(Duration::from_millis(args.command_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut nonce = 0u64;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Time is up, disconnecting");
                client.close().await?;
                return Ok(());
            }
            _ = ticker.tick() => {
                let command = random_command(&mut nonce);
                client.send(&command).await?;
            }
            packet = client.recv() => match packet? {
                Some(Packet::Playground { tick, snakes, .. }) => {
                    info!("Tick {}: {} snakes", tick, snakes.len());
                }
                Some(Packet::Error { message }) => warn!("Server error: {}", message),
                Some(packet) => info!("{:?}", packet),
                None => {
                    info!("Server closed the connection");
                    return Ok(());
                }
            },
        }
    }
}

/// Mostly turns, with an occasional ping.
fn random_command(nonce: &mut u64) -> Command {
    let mut rng = rand::thread_rng();
    if rng.gen_bool(0.2) {
        *nonce += 1;
        Command::Ping { nonce: *nonce }
    } else {
        Command::Turn(Direction::ALL[rng.gen_range(0..Direction::ALL.len())])
    }
}
