use clap::Parser;
use log::info;
use rudpperf::{ChannelOptions, Client, Config, Network, Server};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rudpperf")]
#[command(about = "Throughput and integrity benchmark for SCTP data channels over UDP and TCP", long_about = None)]
#[command(version)]
struct Cli {
    /// udp, udp4, udp6 (SCTP data channel) or tcp, tcp4, tcp6
    #[arg(long, default_value = "udp4")]
    network: String,

    /// Server address (host:port); runs as client when given
    #[arg(short, long)]
    server: Option<String>,

    /// Port to listen on
    #[arg(short = 'l', long, default_value = "40916")]
    listen_port: u16,

    /// Message size in bytes
    #[arg(short, long, default_value = "32768")]
    message_size: usize,

    /// Number of messages to send
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Socket buffer size in bytes, 0 keeps the defaults
    #[arg(short, long, default_value = "0")]
    buffer_size: usize,

    /// Duration in seconds, 0 for unbounded
    #[arg(short = 't', short_alias = 'k', long, default_value = "30")]
    time: u64,

    /// Use an unordered data channel
    #[arg(long)]
    unordered: bool,

    /// Maximum retransmits per message, negative disables
    #[arg(long, alias = "maxRetransmits", default_value = "-1", allow_negative_numbers = true)]
    max_retransmits: i64,

    /// Maximum packet lifetime in milliseconds, negative disables
    #[arg(long, alias = "maxPacketLifeTime", default_value = "-1", allow_negative_numbers = true)]
    max_packet_life_time: i64,

    /// Interval for throughput samples in seconds
    #[arg(short, long, default_value = "1")]
    interval: u64,

    /// Payload generator seed, must match on both ends
    #[arg(long, default_value = "123")]
    seed: u64,

    /// Print the session summary as JSON
    #[arg(short = 'J', long)]
    json: bool,
}

fn limit(value: i64) -> Option<u32> {
    u32::try_from(value).ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let network: Network = cli.network.parse()?;
    let duration = Some(Duration::from_secs(cli.time));

    let channel = ChannelOptions {
        unordered: cli.unordered,
        max_retransmits: limit(cli.max_retransmits),
        max_packet_life_time: limit(cli.max_packet_life_time),
    };

    let config = match cli.server {
        Some(server_addr) => Config::client(server_addr),
        None => Config::server(cli.listen_port),
    };
    let mut config = config
        .with_network(network)
        .with_message_size(cli.message_size)
        .with_buffer_size(cli.buffer_size)
        .with_duration(duration)
        .with_channel_options(channel)
        .with_interval(Duration::from_secs(cli.interval))
        .with_seed(cli.seed)
        .with_json(cli.json);
    if let Some(count) = cli.count {
        config = config.with_message_count(count);
    }

    match config.mode {
        rudpperf::Mode::Server => {
            let server = Server::new(config);
            let cancel = server.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted");
                    cancel.cancel();
                }
            });
            server.run().await?;
        }
        rudpperf::Mode::Client => {
            let client = Client::new(config)?;
            let cancel = client.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted");
                    cancel.cancel();
                }
            });
            client.run().await?;
        }
    }

    Ok(())
}
