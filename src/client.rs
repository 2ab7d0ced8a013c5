use crate::config::{Config, Mode, Transport, MAX_DATAGRAM_MESSAGE_SIZE};
use crate::measurements::{print_summary, SessionSummary};
use crate::reporter::{notify, CallbackRef, ProgressCallback, ProgressEvent, ThroughputSampler};
use crate::session::{SessionBounds, TransferSession};
use crate::transport::datagram::{self, CHANNEL_ID};
use crate::transport::{self, stream, Channel};
use crate::verifier::drain;
use crate::writer::{run_writer, wait_for_flush, WriteOutcome, WriteReport, WriterParams};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long the client waits for the server to close its side after the
/// write side has been shut down.
pub const PEER_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Benchmark sender.
///
/// Dials the server, pushes generated payload through the flow-controlled
/// writer until the duration or message count bound is reached (or the
/// cancellation token fires), then shuts the connection down in order and
/// reports a [`SessionSummary`].
///
/// # Examples
///
/// ## TCP, count-bounded
///
/// ```no_run
/// use rudpperf::{Client, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100:40916".to_string())
///     .with_network("tcp4".parse()?)
///     .with_duration(None)
///     .with_message_count(10_000);
///
/// let summary = Client::new(config)?.run().await?;
/// println!("{:.2} Mbps", summary.bits_per_second / 1_000_000.0);
/// # Ok(())
/// # }
/// ```
///
/// ## Unordered data channel with a cancellation token
///
/// ```no_run
/// use rudpperf::config::ChannelOptions;
/// use rudpperf::{Client, Config};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100:40916".to_string())
///     .with_channel_options(ChannelOptions {
///         unordered: true,
///         ..Default::default()
///     });
///
/// let client = Client::new(config)?;
/// let cancel = client.cancellation_token().clone();
/// tokio::spawn(async move {
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     cancel.cancel();
/// });
///
/// client.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    callback: Option<CallbackRef>,
    cancellation_token: CancellationToken,
}

impl Client {
    /// Creates a client. Fails if the configuration has no server address or
    /// does not validate.
    ///
    /// ```
    /// use rudpperf::{Client, Config};
    ///
    /// let config = Config::client("127.0.0.1:40916".to_string());
    /// assert!(Client::new(config).is_ok());
    ///
    /// let config = Config::client("127.0.0.1:40916".to_string()).with_message_size(0);
    /// assert!(Client::new(config).is_err());
    /// ```
    pub fn new(config: Config) -> Result<Self> {
        if config.server_addr.is_none() {
            return Err(Error::Config(
                "Server address is required for client mode".to_string(),
            ));
        }
        config.validate()?;

        Ok(Self {
            config,
            callback: None,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Token that stops the run early, following the same path as the duration timer.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Runs one session against the configured server.
    pub async fn run(&self) -> Result<SessionSummary> {
        let result = self.run_inner().await;
        if let Err(e) = &result {
            notify(&self.callback, ProgressEvent::Error(e.to_string()));
        }
        result
    }

    async fn run_inner(&self) -> Result<SessionSummary> {
        let server_addr = self
            .config
            .server_addr
            .as_deref()
            .ok_or_else(|| Error::Config("Server address not set".to_string()))?;

        let remote = transport::resolve(server_addr, self.config.network.family).await?;
        info!("connecting to server {} ...", remote);

        let summary = match self.config.network.transport {
            Transport::Stream => self.run_stream(remote).await?,
            Transport::Datagram => self.run_datagram(remote).await?,
        };

        notify(&self.callback, ProgressEvent::SessionCompleted(summary.clone()));
        print_summary(&summary, self.config.json)?;
        Ok(summary)
    }

    async fn run_stream(&self, remote: SocketAddr) -> Result<SessionSummary> {
        let channel = Arc::new(stream::dial(remote, self.config.buffer_size).await?);
        info!("connected to {}", channel.peer_addr());
        notify(&self.callback, ProgressEvent::SessionStarted { remote });

        let mut transfer = self.start(&channel);
        let report = match self.send(&channel, &transfer.session).await {
            Ok(report) => report,
            Err(e) => {
                transfer.abort(channel.as_ref()).await;
                return Err(e);
            }
        };

        // Half-close, let the peer see EOF and close its side, then drop.
        if let Err(e) = channel.close_write().await {
            debug!("half-close towards {} failed: {}", remote, e);
        }
        transfer.join_reader().await;
        if let Err(e) = channel.close_read().await {
            debug!("closing read side for {} failed: {}", remote, e);
        }

        Ok(transfer.finish(&self.config, remote, report, None).await)
    }

    async fn run_datagram(&self, remote: SocketAddr) -> Result<SessionSummary> {
        let connection = datagram::dial(remote, self.config.buffer_size).await?;
        let channel = Arc::new(
            connection
                .open_channel(CHANNEL_ID, &self.config.channel)
                .await?,
        );
        info!(
            "opened channel {} to {}: {}",
            CHANNEL_ID, remote, self.config.channel
        );
        notify(&self.callback, ProgressEvent::SessionStarted { remote });

        let mut transfer = self.start(&channel);
        let report = match self.send(&channel, &transfer.session).await {
            Ok(report) => report,
            Err(e) => {
                transfer.abort(channel.as_ref()).await;
                if let Err(close_err) = connection.close().await {
                    debug!("closing association with {} failed: {}", remote, close_err);
                }
                return Err(e);
            }
        };

        if let Err(e) = channel.close().await {
            debug!("closing channel to {} failed: {}", remote, e);
        }
        transfer.join_reader().await;
        if let Err(e) = connection.close().await {
            debug!("closing association with {} failed: {}", remote, e);
        }

        let description = Some(self.config.channel.to_string());
        Ok(transfer.finish(&self.config, remote, report, description).await)
    }

    /// Installs the flow-control hooks and starts the drain reader and the sampler.
    fn start<C>(&self, channel: &Arc<C>) -> ActiveTransfer
    where
        C: Channel + 'static,
    {
        let session = Arc::new(TransferSession::new(
            self.config.seed,
            SessionBounds {
                duration: self.config.duration,
                message_count: self.config.message_count,
            },
        ));

        channel.set_buffered_amount_low_threshold(self.config.low_water_mark());
        let gate = session.gate();
        channel.on_buffered_amount_low(Box::new(move || gate.post()));

        let reader = {
            let channel = channel.clone();
            tokio::spawn(async move { drain(channel.as_ref(), MAX_DATAGRAM_MESSAGE_SIZE).await })
        };

        let sampler = ThroughputSampler::spawn(
            session.counter().clone(),
            self.config.interval,
            self.callback.clone(),
        );

        ActiveTransfer {
            session,
            reader: Some(reader),
            received: 0,
            sampler,
        }
    }

    /// Runs the writer until it completes or the deadline or cancellation fires.
    async fn send<C>(&self, channel: &Arc<C>, session: &Arc<TransferSession>) -> Result<WriteReport>
    where
        C: Channel + 'static,
    {
        let params = WriterParams {
            message_size: self.config.message_size,
            message_count: self.config.message_count,
            high_water_mark: self.config.high_water_mark(),
        };

        let mut writer = {
            let channel = channel.clone();
            let session = session.clone();
            tokio::spawn(async move {
                let report = run_writer(channel.as_ref(), &session, &params).await?;
                if report.outcome == WriteOutcome::Completed {
                    wait_for_flush(channel.as_ref(), &session).await;
                }
                Ok::<_, Error>(report)
            })
        };

        let deadline = async {
            match session.remaining() {
                Some(remaining) => tokio::time::sleep(remaining).await,
                None => std::future::pending::<()>().await,
            }
        };

        let joined = tokio::select! {
            joined = &mut writer => Some(joined),
            _ = deadline => {
                info!("duration elapsed, stopping");
                None
            }
            _ = self.cancellation_token.cancelled() => {
                info!("cancelled, stopping");
                None
            }
        };
        session.finish();
        let joined = match joined {
            Some(joined) => joined,
            None => writer.await,
        };

        let report = joined.map_err(|e| Error::Transport(format!("writer task failed: {}", e)))??;
        debug!(
            "writer ended: {:?} after {} messages, {} gate waits",
            report.outcome, report.messages, report.gate_waits
        );
        Ok(report)
    }
}

/// Tasks running alongside the writer for one session.
struct ActiveTransfer {
    session: Arc<TransferSession>,
    reader: Option<JoinHandle<u64>>,
    received: u64,
    sampler: ThroughputSampler,
}

impl ActiveTransfer {
    /// Waits for the drain reader to see the peer close, giving up after
    /// [`PEER_CLOSE_TIMEOUT`].
    async fn join_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            match tokio::time::timeout(PEER_CLOSE_TIMEOUT, &mut reader).await {
                Ok(received) => self.received = received.unwrap_or_default(),
                Err(_) => {
                    warn!(
                        "peer did not close its side within {:?}, dropping connection",
                        PEER_CLOSE_TIMEOUT
                    );
                    reader.abort();
                    let _ = reader.await;
                }
            }
        }
    }

    /// Tears the transfer down after the writer failed.
    async fn abort<C>(mut self, channel: &C)
    where
        C: Channel + ?Sized,
    {
        self.session.finish();
        if let Err(e) = channel.close().await {
            debug!("closing channel after writer failure: {}", e);
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.sampler.stop().await;
    }

    async fn finish(
        self,
        config: &Config,
        remote: SocketAddr,
        report: WriteReport,
        channel: Option<String>,
    ) -> SessionSummary {
        let samples = self.sampler.stop().await;
        if self.received > 0 {
            debug!("peer sent {} bytes back", self.received);
        }

        let mut summary = SessionSummary::new(
            Mode::Client,
            config.network.to_string(),
            remote,
            self.session.counter().get(),
            self.session.elapsed(),
        );
        summary.channel = channel;
        summary.messages = Some(report.messages);
        summary.gate_waits = Some(report.gate_waits);
        summary.samples = samples;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_abort_releases_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Config::client(addr.to_string()).with_network("tcp4".parse().unwrap());
        let client = Client::new(config).unwrap();

        let channel = Arc::new(stream::dial(addr, 0).await.unwrap());
        let (mut peer, _) = listener.accept().await.unwrap();

        let transfer = client.start(&channel);
        transfer.abort(channel.as_ref()).await;

        // The drain task no longer holds the channel and the peer sees EOF.
        assert_eq!(Arc::strong_count(&channel), 1);
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
