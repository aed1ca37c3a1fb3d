pub mod config;
pub mod error;
pub mod event;
pub mod mpd;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod signaling;
pub mod storage;
pub mod writer;

pub use config::{ManifestConfig, RecorderConfig};
pub use error::{RecorderError, RecorderResult};
pub use event::{MuxEvent, MuxOutput};
pub use mpd::{DashManifest, ManifestHandle, TimelineEntry};
pub use pipeline::{MediaKind, MediaPipeline, PacketCounter, PipelineFactory};
pub use session::{Recorder, SessionHandle};
pub use storage::RecordingDir;
pub use writer::{EventSender, SegmentWriter};

/// Bind the signaling and HTTP listeners and serve both until `shutdown` fires
/// or one of them fails, then stop the active recording session.
///
/// ┌──────────────┐   offer/answer   ┌───────────────┐
/// │              ◄──────────────────►   signaling   │ ws://:8888
/// │              │                  └───────┬───────┘
/// │   Browser    │                          │ begin_session
/// │              │  RTP (audio/video)┌──────▼────────┐
/// │              ├───────────────────►MediaPipeline  │ depacketize, mux
/// └──────▲───────┘                   └──────┬────────┘
///        │                                  │ MuxEvent [MPSC]
///        │                           ┌──────▼────────┐
///        │                           │ SegmentWriter ├──► init.webm
///        │                           │               ├──► cluster.webm ──► media<t>.webm
///        │                           └──────┬────────┘
///        │                                  │ push_entry
///        │   GET /dash.mpd           ┌──────▼────────┐
///        └───────────────────────────┤  file server  ├──► dash.mpd
///                           :8125    └───────────────┘
pub async fn run<F>(
    recorder: std::sync::Arc<Recorder>,
    factory: F,
    shutdown: tokio_util::sync::CancellationToken,
) -> RecorderResult<()>
where
    F: PipelineFactory,
{
    let config = recorder.config();
    let signaling_listener = tokio::net::TcpListener::bind(config.signaling_addr).await?;
    let http_listener = tokio::net::TcpListener::bind(config.http_addr).await?;

    let signaling = signaling::serve_signaling(
        signaling_listener,
        recorder.clone(),
        std::sync::Arc::new(factory),
        shutdown.clone(),
    );
    let http = server::serve_http(http_listener, recorder.clone(), shutdown.clone());

    let result = tokio::try_join!(signaling, http).map(|_| ());
    shutdown.cancel();

    if let Err(e) = recorder.shutdown().await {
        log::warn!("Recording stopped with error: {e}");
    }
    result
}
