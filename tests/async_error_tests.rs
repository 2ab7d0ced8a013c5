use rudpperf::config::MAX_DATAGRAM_MESSAGE_SIZE;
use rudpperf::{Client, Config, Error, Network};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

#[test]
fn test_invalid_network_rejected() {
    let result = "sctp".parse::<Network>();
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_client_requires_valid_config() {
    let mut config = Config::server(0);
    config.mode = rudpperf::Mode::Client;
    assert!(matches!(Client::new(config), Err(Error::Config(_))));

    let oversized = Config::client("127.0.0.1:40916".to_string())
        .with_message_size(MAX_DATAGRAM_MESSAGE_SIZE * 2);
    assert!(matches!(Client::new(oversized), Err(Error::Config(_))));
}

#[tokio::test]
async fn test_unresolvable_host() {
    let config = Config::client("no-such-host.invalid:40916".to_string())
        .with_network("tcp4".parse().unwrap());
    let result = Client::new(config).unwrap().run().await;
    assert!(matches!(result, Err(Error::Resolve(_))));
}

#[tokio::test]
async fn test_family_mismatch_fails_resolution() {
    let config = Config::client("127.0.0.1:40916".to_string())
        .with_network("tcp6".parse().unwrap());
    let result = Client::new(config).unwrap().run().await;
    assert!(matches!(result, Err(Error::Resolve(_))));
}

/// A peer that closes right after accepting ends the session without an error.
#[tokio::test]
async fn test_premature_connection_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.shutdown().await;
        }
    });

    let config = Config::client(format!("127.0.0.1:{}", port))
        .with_network("tcp4".parse().unwrap())
        .with_duration(Some(Duration::from_secs(5)));
    let summary = tokio::time::timeout(Duration::from_secs(10), Client::new(config).unwrap().run())
        .await
        .expect("client hung on a closed peer")
        .unwrap();

    assert!(summary.duration_secs < 5.0);
}

#[test]
fn test_fatal_fault_classification() {
    let integrity = Error::Integrity {
        offset: 1,
        expected: 0,
        actual: 1,
    };
    assert!(integrity.is_fatal_fault());
    assert_eq!(
        integrity.to_string(),
        "data mismatch at offset 1: expected 0x00, got 0x01"
    );

    assert!(!Error::Transport("reset".to_string()).is_fatal_fault());
    assert!(Error::Generator("exhausted".to_string()).is_fatal_fault());
}
