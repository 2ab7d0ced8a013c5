use rudpperf::{Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let network = std::env::args().nth(1).unwrap_or_else(|| "udp4".to_string());
    let config = Config::server(40916)
        .with_network(network.parse()?)
        .with_duration(None);

    Server::new(config).run().await?;
    Ok(())
}
