use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use rtcdash::{
    event::MuxEventKind, signaling::serve_signaling, MuxOutput, PacketCounter, Recorder,
    RecorderConfig,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn init_logger() {
    let _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

fn recorder(root: &std::path::Path) -> Arc<Recorder> {
    Arc::new(Recorder::new(RecorderConfig {
        recording_dir: root.join("dash"),
        ..Default::default()
    }))
}

async fn start_signaling(
    recorder: Arc<Recorder>,
    shutdown: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve_signaling(
        listener,
        recorder,
        Arc::new(PacketCounter::new),
        shutdown,
    ));
    Ok(addr)
}

async fn next_text(socket: &mut Socket) -> anyhow::Result<String> {
    let message = tokio::time::timeout(Duration::from_secs(20), socket.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
    match message {
        Message::Text(text) => Ok(text),
        other => anyhow::bail!("unexpected message {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_receives_offer() -> anyhow::Result<()> {
    init_logger();
    let temp = tempfile::tempdir()?;
    let recorder = recorder(temp.path());
    let shutdown = CancellationToken::new();
    let addr = start_signaling(recorder.clone(), shutdown.clone()).await?;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await?;
    let offer: serde_json::Value = serde_json::from_str(&next_text(&mut socket).await?)?;

    assert_eq!(offer["type"], "offer");
    let sdp = offer["sdp"].as_str().unwrap();
    assert!(sdp.contains("m=audio"));
    assert!(sdp.contains("m=video"));
    assert!(sdp.contains("a=recvonly"));

    // a session started with an empty manifest
    assert!(recorder.manifest().await.is_some());
    assert!(recorder.dir().manifest_path().is_file());

    // messages without a usable description are ignored
    socket.send(Message::Text("hello".to_string())).await?;
    socket
        .send(Message::Text(r#"{"type":"answer","sdp":""}"#.to_string()))
        .await?;
    socket
        .send(Message::Text(r#"{"candidate":"candidate:1"}"#.to_string()))
        .await?;
    assert!(recorder.manifest().await.is_some());

    shutdown.cancel();
    recorder.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_connection_replaces_session() -> anyhow::Result<()> {
    init_logger();
    let temp = tempfile::tempdir()?;
    let recorder = recorder(temp.path());
    let shutdown = CancellationToken::new();
    let addr = start_signaling(recorder.clone(), shutdown.clone()).await?;

    let (mut first, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await?;
    next_text(&mut first).await?;

    let (mut second, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await?;
    next_text(&mut second).await?;

    // the first signaling socket is dropped along with its session
    let ended = tokio::time::timeout(Duration::from_secs(10), first.next()).await?;
    assert!(matches!(
        ended,
        None | Some(Err(_)) | Some(Ok(Message::Close(_)))
    ));

    let manifest = recorder.manifest().await.unwrap();
    assert!(manifest.entries().await.is_empty());
    assert_eq!(
        tokio::fs::read_to_string(recorder.dir().manifest_path()).await?,
        manifest.build().await?
    );

    shutdown.cancel();
    recorder.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_mux_output_to_segments() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let recorder = recorder(temp.path());
    let session = recorder.begin_session().await?;

    let outputs = [
        ("initial", Some("H"), None),
        ("cluster", Some("C1"), Some(0)),
        ("block", Some("B1"), None),
        // dropped, nothing to save
        ("block", None, None),
        // dropped, unknown kind
        ("cues", Some("X"), None),
        ("cluster", Some("C2"), Some(2000)),
        ("block", Some("B2"), None),
        ("cluster", Some("C3"), Some(1500)),
    ];
    for (kind, payload, previous_duration) in outputs {
        session.events.send_output(MuxOutput {
            kind: MuxEventKind::from_name(kind),
            save_to_file: payload.map(|payload| Bytes::copy_from_slice(payload.as_bytes())),
            previous_duration,
        })?;
    }

    let manifest = recorder.manifest().await.unwrap();
    recorder.shutdown().await?;

    let dir = recorder.dir();
    assert_eq!(tokio::fs::read(dir.init_path()).await?, b"H");
    assert_eq!(tokio::fs::read(dir.media_path(0)).await?, b"C1B1");
    assert_eq!(tokio::fs::read(dir.media_path(2000)).await?, b"C2B2");
    assert_eq!(tokio::fs::read(dir.active_cluster_path()).await?, b"C3");

    let offsets: Vec<_> = manifest
        .entries()
        .await
        .iter()
        .map(|entry| (entry.start_offset, entry.duration))
        .collect();
    assert_eq!(offsets, vec![(0, 2000), (2000, 1500)]);

    let document = tokio::fs::read_to_string(dir.manifest_path()).await?;
    assert_eq!(document, manifest.build().await?);
    Ok(())
}
