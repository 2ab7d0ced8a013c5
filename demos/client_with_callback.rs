use rudpperf::{Client, Config, ProgressCallback, ProgressEvent};
use std::time::Duration;

/// Callback that prints progress events
struct PrintingCallback;

impl ProgressCallback for PrintingCallback {
    fn on_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::SessionStarted { remote } => {
                println!("connected to {}", remote);
            }
            ProgressEvent::Throughput {
                elapsed,
                bytes,
                bits_per_second,
            } => {
                println!(
                    "[{:5.1}s] {} bytes @ {:.2} Mbps",
                    elapsed.as_secs_f64(),
                    bytes,
                    bits_per_second / 1_000_000.0
                );
            }
            ProgressEvent::SessionCompleted(summary) => {
                println!(
                    "done: {} bytes in {:.2}s, {} flow-control waits",
                    summary.bytes,
                    summary.duration_secs,
                    summary.gate_waits.unwrap_or_default()
                );
            }
            ProgressEvent::Error(msg) => eprintln!("error: {}", msg),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:40916".to_string());

    let config = Config::client(addr)
        .with_duration(Some(Duration::from_secs(10)))
        .with_buffer_size(512 * 1024)
        .with_interval(Duration::from_secs(2));

    let client = Client::new(config)?.with_callback(PrintingCallback);
    client.run().await?;

    Ok(())
}
