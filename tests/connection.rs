use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::Duration;

use lettercount::config::FramingConfig;
use lettercount::connection::Connection;
use lettercount::frame::{self, Frame};

/// Returns a client stream plus a channel whose messages are written, one write each, by the
/// server side of the connection. Dropping the sender closes the server side.
async fn create_tcp_connection() -> Result<(UnboundedSender<Vec<u8>>, TcpStream), std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let local_addr = listener.local_addr()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            while let Some(data) = rx.recv().await {
                // Write the received channel data to the socket.
                if socket.write_all(&data).await.is_err() {
                    break;
                }
            }
        }
    });

    // Connect to the server as a client to complete the setup.
    let stream = TcpStream::connect(local_addr).await?;

    Ok((tx, stream))
}

/// Returns both ends of a loopback TCP connection.
async fn create_tcp_pair() -> Result<(TcpStream, TcpStream), std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let client = TcpStream::connect(listener.local_addr()?).await?;
    let (server, _) = listener.accept().await?;

    Ok((client, server))
}

fn small_buffers() -> FramingConfig {
    FramingConfig {
        buffer_size: 3,
        ..FramingConfig::default()
    }
}

#[tokio::test]
async fn test_read_frame() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream, &FramingConfig::default());

    tcp_stream_tx.send(b"\x00\x00\x00\x05hello".to_vec()).unwrap();

    let actual = connection.read_frame().await.unwrap();

    assert_eq!(actual, Frame::from("hello"));
}

#[tokio::test]
async fn test_read_empty_frame() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream, &FramingConfig::default());

    tcp_stream_tx.send(b"\x00\x00\x00\x00".to_vec()).unwrap();

    let actual = connection.read_frame().await.unwrap();

    assert!(actual.is_empty());
}

#[tokio::test]
async fn test_read_frames_sequentially() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream, &small_buffers());

    // Both frames arrive in one write.
    tcp_stream_tx
        .send(b"\x00\x00\x00\x03one\x00\x00\x00\x05three".to_vec())
        .unwrap();

    assert_eq!(connection.read_frame().await.unwrap(), Frame::from("one"));
    assert_eq!(connection.read_frame().await.unwrap(), Frame::from("three"));
}

#[tokio::test]
async fn test_read_incomplete_frame() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream, &FramingConfig::default());

    // Frame split into parts to simulate a slow network, header included.
    let part1 = b"\x00\x00".to_vec();
    let part2 = b"\x00\x0bHel".to_vec();
    let part3 = b"lo W".to_vec();
    let part4 = b"orld".to_vec();

    tokio::spawn(async move {
        for part in [part1, part2, part3, part4] {
            tcp_stream_tx.send(part).unwrap();
            // Simulate a delay in sending/receiving the data.
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
    });

    let actual = connection.read_frame().await.unwrap();

    assert_eq!(actual, Frame::from("Hello World"));
}

#[tokio::test]
async fn test_read_frame_byte_by_byte() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream, &small_buffers());

    let payload: Vec<u8> = (0..=255u8).collect();
    let bytes = Frame::new(payload.clone()).serialize().unwrap();

    tokio::spawn(async move {
        for byte in bytes {
            tcp_stream_tx.send(vec![byte]).unwrap();
            tokio::task::yield_now().await;
        }
    });

    let actual = connection.read_frame().await.unwrap();

    assert_eq!(actual.payload(), &payload[..]);
}

#[tokio::test]
async fn test_closed_mid_payload() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream, &FramingConfig::default());

    // Declares 10 bytes but only sends 5 before closing.
    tcp_stream_tx.send(b"\x00\x00\x00\x0ahello".to_vec()).unwrap();
    drop(tcp_stream_tx);

    let actual = connection.read_frame().await;

    assert!(matches!(actual, Err(frame::Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_closed_mid_header() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream, &FramingConfig::default());

    tcp_stream_tx.send(b"\x00\x00".to_vec()).unwrap();
    drop(tcp_stream_tx);

    let actual = connection.read_frame().await;

    assert!(matches!(actual, Err(frame::Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_closed_before_any_data() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let mut connection = Connection::new(tcp_stream, &FramingConfig::default());

    drop(tcp_stream_tx);

    let actual = connection.read_frame().await;

    assert!(matches!(actual, Err(frame::Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_read_frame_times_out_on_silent_peer() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let config = FramingConfig {
        io_timeout: Some(Duration::from_millis(50)),
        ..FramingConfig::default()
    };
    let mut connection = Connection::new(tcp_stream, &config);

    // Half a header, then nothing while the sender stays open.
    tcp_stream_tx.send(b"\x00\x00".to_vec()).unwrap();

    let actual = connection.read_frame().await;

    assert!(matches!(
        actual,
        Err(frame::Error::Timeout(limit)) if limit == Duration::from_millis(50)
    ));
    drop(tcp_stream_tx);
}

#[tokio::test]
async fn test_frame_over_limit() {
    let (tcp_stream_tx, tcp_stream) = create_tcp_connection().await.unwrap();
    let config = FramingConfig {
        max_frame_size: 16,
        ..FramingConfig::default()
    };
    let mut connection = Connection::new(tcp_stream, &config);

    tcp_stream_tx.send(b"\x00\x00\x01\x00".to_vec()).unwrap();

    let actual = connection.read_frame().await;

    assert!(matches!(
        actual,
        Err(frame::Error::FrameTooLarge { length: 256, max: 16 })
    ));
}

#[tokio::test]
async fn test_write_frame() {
    let (mut client, server) = create_tcp_pair().await.unwrap();
    let mut connection = Connection::new(server, &FramingConfig::default());

    connection.write_frame(Frame::from("hey")).await.unwrap();
    drop(connection);

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();

    assert_eq!(received, b"\x00\x00\x00\x03hey");
}

#[tokio::test]
async fn test_large_payload_round_trip() {
    let (client, server) = create_tcp_pair().await.unwrap();
    let mut sender = Connection::new(client, &FramingConfig::default());
    let mut receiver = Connection::new(server, &FramingConfig::default());

    // Several times the buffer size, so both sides go through many partial reads and writes.
    let mut payload = vec![0u8; 256 * 1024 + 7];
    rand::thread_rng().fill(&mut payload[..]);

    let expected = payload.clone();
    let write = tokio::spawn(async move { sender.write_frame(Frame::new(payload)).await });

    let actual = receiver.read_frame().await.unwrap();
    write.await.unwrap().unwrap();

    assert_eq!(actual.len(), expected.len());
    assert!(actual.payload() == &expected[..]);
}

#[tokio::test]
async fn test_empty_payload_round_trip() {
    let (client, server) = create_tcp_pair().await.unwrap();
    let mut sender = Connection::new(client, &FramingConfig::default());
    let mut receiver = Connection::new(server, &FramingConfig::default());

    sender.write_frame(Frame::default()).await.unwrap();

    assert_eq!(receiver.read_frame().await.unwrap(), Frame::default());
}

#[tokio::test]
async fn test_write_frame_from_source() {
    let (client, server) = create_tcp_pair().await.unwrap();
    let mut sender = Connection::new(client, &small_buffers());
    let mut receiver = Connection::new(server, &FramingConfig::default());

    let source: &[u8] = b"streamed in chunks of three bytes";
    sender
        .write_frame_from_source(source, source.len() as u64)
        .await
        .unwrap();

    assert_eq!(receiver.read_frame().await.unwrap().payload(), source);
}

#[tokio::test]
async fn test_write_frame_from_source_stops_at_known_length() {
    let (client, server) = create_tcp_pair().await.unwrap();
    let mut sender = Connection::new(client, &small_buffers());
    let mut receiver = Connection::new(server, &FramingConfig::default());

    let source: &[u8] = b"abcdefgh";
    sender.write_frame_from_source(source, 5).await.unwrap();
    sender.write_frame(Frame::from("next")).await.unwrap();

    assert_eq!(receiver.read_frame().await.unwrap(), Frame::from("abcde"));
    assert_eq!(receiver.read_frame().await.unwrap(), Frame::from("next"));
}

#[tokio::test]
async fn test_write_frame_from_short_source() {
    let (client, server) = create_tcp_pair().await.unwrap();
    let mut sender = Connection::new(client, &FramingConfig::default());
    let mut receiver = Connection::new(server, &FramingConfig::default());

    let source: &[u8] = b"abc";
    let result = sender.write_frame_from_source(source, 10).await;

    assert!(matches!(
        result,
        Err(frame::Error::SourceTooShort {
            expected: 10,
            actual: 3
        })
    ));

    // The peer sees a truncated frame, never a short success.
    drop(sender);
    assert!(matches!(
        receiver.read_frame().await,
        Err(frame::Error::ConnectionClosed)
    ));
}
