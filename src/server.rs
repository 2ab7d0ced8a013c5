use crate::config::{Config, Mode, Transport, MAX_DATAGRAM_MESSAGE_SIZE};
use crate::measurements::{print_summary, SessionSummary};
use crate::reporter::{notify, CallbackRef, ProgressCallback, ProgressEvent, ThroughputSampler};
use crate::session::{SessionBounds, TransferSession};
use crate::transport::datagram::{self, DatagramListener};
use crate::transport::{stream, Channel};
use crate::verifier::run_verifier;
use crate::{Error, Result};
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A bound listening socket of either transport.
pub enum BoundListener {
    Stream(TcpListener),
    Datagram(DatagramListener),
}

impl BoundListener {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            BoundListener::Stream(listener) => Ok(listener.local_addr()?),
            BoundListener::Datagram(listener) => Ok(listener.local_addr()),
        }
    }
}

/// Benchmark receiver.
///
/// Accepts connections without limit and verifies each one in its own task.
/// A data mismatch on any connection stops the whole server with
/// [`Error::Integrity`].
///
/// # Examples
///
/// ```no_run
/// use rudpperf::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::server(40916).with_network("tcp4".parse()?);
/// let server = Server::new(config);
///
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
///
/// Binding first lets the caller learn the port before serving:
///
/// ```no_run
/// use rudpperf::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new(Config::server(0));
/// let listener = server.listen().await?;
/// println!("bound to {}", listener.local_addr()?);
/// server.serve(listener).await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Arc<Config>,
    callback: Option<CallbackRef>,
    cancellation_token: CancellationToken,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            callback: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Token that stops the accept loop. Sessions already running are not interrupted.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Binds the listening socket for the configured network and port.
    pub async fn listen(&self) -> Result<BoundListener> {
        self.config.validate()?;
        let addr = self.config.network.family.unspecified(self.config.listen_port);

        let listener = match self.config.network.transport {
            Transport::Stream => BoundListener::Stream(stream::bind(addr).await?),
            Transport::Datagram => BoundListener::Datagram(
                DatagramListener::bind(addr, self.config.buffer_size).await?,
            ),
        };

        info!(
            "listening on {}:{} ...",
            self.config.network,
            listener.local_addr()?
        );
        Ok(listener)
    }

    pub async fn run(&self) -> Result<()> {
        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// Accept loop. Returns when cancelled, when the listener fails, or on the
    /// first data integrity fault reported by a connection.
    pub async fn serve(&self, listener: BoundListener) -> Result<()> {
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel::<Error>();

        loop {
            tokio::select! {
                Some(fault) = fault_rx.recv() => {
                    error!("stopping server: {}", fault);
                    notify(&self.callback, ProgressEvent::Error(fault.to_string()));
                    return Err(fault);
                }
                _ = self.cancellation_token.cancelled() => {
                    info!("server stopped");
                    return Ok(());
                }
                accepted = accept(&listener) => {
                    match accepted {
                        Ok(incoming) => self.spawn_connection(incoming, fault_tx.clone()),
                        Err(e) if matches!(listener, BoundListener::Stream(_)) => {
                            error!("Error accepting connection: {}", e);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn spawn_connection(&self, incoming: Incoming, faults: mpsc::UnboundedSender<Error>) {
        let remote = incoming.remote();
        info!("new connection from {} ...", remote);

        let config = self.config.clone();
        let callback = self.callback.clone();

        tokio::spawn(async move {
            let result = match incoming {
                Incoming::Stream(channel, remote) => {
                    handle_stream(channel, remote, &config, &callback).await
                }
                Incoming::Datagram(conn, remote) => {
                    handle_datagram(conn, remote, &config, &callback).await
                }
            };

            match result {
                Ok(summary) => {
                    notify(&callback, ProgressEvent::SessionCompleted(summary.clone()));
                    if let Err(e) = print_summary(&summary, config.json) {
                        error!("Error printing summary for {}: {}", remote, e);
                    }
                }
                Err(e) => {
                    error!("Error handling client {}: {}", remote, e);
                    notify(&callback, ProgressEvent::Error(e.to_string()));
                    if e.is_fatal_fault() {
                        let _ = faults.send(e);
                    }
                }
            }
        });
    }
}

enum Incoming {
    Stream(stream::StreamChannel, SocketAddr),
    Datagram(Arc<dyn webrtc_util::Conn + Send + Sync>, SocketAddr),
}

impl Incoming {
    fn remote(&self) -> SocketAddr {
        match self {
            Incoming::Stream(_, remote) | Incoming::Datagram(_, remote) => *remote,
        }
    }
}

async fn accept(listener: &BoundListener) -> Result<Incoming> {
    match listener {
        BoundListener::Stream(listener) => {
            let (channel, remote) = stream::accept(listener).await?;
            Ok(Incoming::Stream(channel, remote))
        }
        BoundListener::Datagram(listener) => {
            let (conn, remote) = listener.accept().await?;
            Ok(Incoming::Datagram(conn, remote))
        }
    }
}

async fn handle_stream(
    channel: stream::StreamChannel,
    remote: SocketAddr,
    config: &Config,
    callback: &Option<CallbackRef>,
) -> Result<SessionSummary> {
    let summary = verify_session(&channel, remote, true, config, callback).await;
    if let Err(e) = channel.close().await {
        debug!("closing connection for {} failed: {}", remote, e);
    }
    info!("closed connection for {}", remote);
    summary
}

async fn handle_datagram(
    conn: Arc<dyn webrtc_util::Conn + Send + Sync>,
    remote: SocketAddr,
    config: &Config,
    callback: &Option<CallbackRef>,
) -> Result<SessionSummary> {
    let connection = datagram::server_handshake(conn, remote, config.buffer_size).await?;
    let channel = connection.accept_channel().await?;
    let options = channel.options();
    info!("new channel: {}", options);

    // Partially reliable or unordered channels may drop or reorder messages.
    let verify = options.preserves_stream();
    let result = verify_session(&channel, remote, verify, config, callback).await;

    if let Err(e) = channel.close().await {
        debug!("closing channel for {} failed: {}", remote, e);
    }
    if let Err(e) = connection.close().await {
        debug!("closing association for {} failed: {}", remote, e);
    }
    info!("closed connection for {}", remote);

    let mut summary = result?;
    summary.channel = Some(options.to_string());
    Ok(summary)
}

async fn verify_session<C>(
    channel: &C,
    remote: SocketAddr,
    verify: bool,
    config: &Config,
    callback: &Option<CallbackRef>,
) -> Result<SessionSummary>
where
    C: Channel + ?Sized,
{
    let session = TransferSession::new(
        config.seed,
        SessionBounds {
            duration: config.duration,
            message_count: None,
        },
    );
    notify(callback, ProgressEvent::SessionStarted { remote });

    let sampler = ThroughputSampler::spawn(
        session.counter().clone(),
        config.interval,
        callback.clone(),
    );
    let result = run_verifier(channel, &session, MAX_DATAGRAM_MESSAGE_SIZE, verify).await;
    let samples = sampler.stop().await;
    let report = result?;

    debug!(
        "{}: {} reads, {} verified, {} bytes",
        remote, report.reads, report.verified_reads, report.bytes
    );

    let mut summary = SessionSummary::new(
        Mode::Server,
        config.network.to_string(),
        remote,
        session.counter().get(),
        session.elapsed(),
    );
    summary.reads = Some(report.reads);
    summary.verified_reads = Some(report.verified_reads);
    summary.samples = samples;
    Ok(summary)
}
