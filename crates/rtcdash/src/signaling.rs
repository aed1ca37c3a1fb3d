use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use crate::{
    error::{RecorderError, RecorderResult},
    pipeline::{spawn_pipeline, MediaKind, PacketSender, PipelineFactory},
    session::Recorder,
};

/// Accept signaling websockets until `shutdown` fires.
///
/// Every connection starts a new recording session, replacing the previous one.
pub async fn serve_signaling<F>(
    listener: TcpListener,
    recorder: Arc<Recorder>,
    factory: Arc<F>,
    shutdown: CancellationToken,
) -> RecorderResult<()>
where
    F: PipelineFactory,
{
    log::info!("Signaling server listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, addr) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        log::info!("Signaling connection from {addr}");

        let recorder = recorder.clone();
        let factory = factory.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, recorder, factory).await {
                log::error!("Signaling session from {addr} failed: {e}");
            }
        });
    }
}

async fn handle_connection<F>(
    stream: TcpStream,
    recorder: Arc<Recorder>,
    factory: Arc<F>,
) -> RecorderResult<()>
where
    F: PipelineFactory,
{
    let mut socket = tokio_tungstenite::accept_async(stream).await?;

    let session = recorder.begin_session().await?;
    let cancel = session.cancel.clone();
    let packets = spawn_pipeline(factory.create(session.events.clone()), cancel.clone());

    let peer_connection = new_peer_connection().await?;
    attach_tracks(
        &peer_connection,
        packets,
        recorder.config().pli_interval(),
        cancel.clone(),
    );

    // The peer connection lives as long as the recording session.
    {
        let peer_connection = peer_connection.clone();
        let cancel = cancel.clone();
        let id = session.id;
        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Err(e) = peer_connection.close().await {
                log::warn!("Failed to close peer connection of session #{id}: {e}");
            }
        });
    }

    let offer = peer_connection.create_offer(None).await?;
    let mut gather_complete = peer_connection.gathering_complete_promise().await;
    peer_connection.set_local_description(offer).await?;

    // Candidates are not trickled, the offer carries all of them.
    let _ = gather_complete.recv().await;
    let local_description = peer_connection
        .local_description()
        .await
        .ok_or(RecorderError::MissingLocalDescription)?;
    socket
        .send(Message::Text(serde_json::to_string(&local_description)?))
        .await?;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = socket.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                let Some(description) = parse_remote_description(&text) else {
                    continue;
                };
                if let Err(e) = peer_connection.set_remote_description(description).await {
                    log::debug!("Failed to apply remote description: {e}");
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::debug!("Signaling socket error: {e}");
                break;
            }
        }
    }

    log::debug!("Signaling socket of session #{} closed", session.id);
    Ok(())
}

/// Read a remote description from a signaling message.
///
/// Any message with a non-empty `sdp` string qualifies, everything else is ignored.
pub fn parse_remote_description(text: &str) -> Option<RTCSessionDescription> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Ignoring malformed signaling message: {e}");
            return None;
        }
    };

    let has_sdp = value
        .get("sdp")
        .and_then(Value::as_str)
        .is_some_and(|sdp| !sdp.is_empty());
    if !has_sdp {
        return None;
    }

    serde_json::from_value(value)
        .inspect_err(|e| log::debug!("Ignoring invalid session description: {e}"))
        .ok()
}

async fn new_peer_connection() -> RecorderResult<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    // NACKs, RTCP reports and the rest of the default RTP/RTCP pipeline.
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let peer_connection = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await?);

    // Receive 1 audio track and 1 video track
    for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
        peer_connection
            .add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
    }

    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            log::info!("Peer connection state has changed: {state}");
            Box::pin(async {})
        },
    ));

    Ok(peer_connection)
}

fn attach_tracks(
    peer_connection: &Arc<RTCPeerConnection>,
    packets: PacketSender,
    pli_interval: Duration,
    cancel: CancellationToken,
) {
    let weak = Arc::downgrade(peer_connection);
    peer_connection.on_track(Box::new(move |track, _, _| {
        let packets = packets.clone();
        let cancel = cancel.clone();
        let weak = weak.clone();
        Box::pin(async move {
            let Some(kind) = MediaKind::from_codec_type(track.kind()) else {
                log::warn!("Ignoring track of unknown kind {}", track.kind());
                return;
            };
            log::info!(
                "Got {kind:?} track, codec {}",
                track.codec().capability.mime_type
            );

            if kind == MediaKind::Video {
                tokio::spawn(request_keyframes(
                    weak,
                    track.ssrc(),
                    pli_interval,
                    cancel.clone(),
                ));
            }
            tokio::spawn(forward_rtp(track, kind, packets, cancel));
        })
    }));
}

async fn forward_rtp(
    track: Arc<TrackRemote>,
    kind: MediaKind,
    packets: PacketSender,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = track.read_rtp() => result,
        };

        match result {
            Ok((packet, _)) => {
                if packets.send((kind, packet)).is_err() {
                    return;
                }
            }
            Err(e) => {
                log::debug!("{kind:?} track ended: {e}");
                return;
            }
        }
    }
}

/// Send a PLI at a fixed interval so the sender emits keyframes regularly.
async fn request_keyframes(
    peer_connection: Weak<RTCPeerConnection>,
    media_ssrc: u32,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(peer_connection) = peer_connection.upgrade() else {
            return;
        };
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        };
        if let Err(e) = peer_connection.write_rtcp(&[Box::new(pli)]).await {
            log::debug!("Failed to send PLI: {e}");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    use super::*;

    #[test]
    fn test_parse_answer() {
        let description =
            parse_remote_description(r#"{"type":"answer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(description.sdp_type, RTCSdpType::Answer);
        assert_eq!(description.sdp, "v=0\r\n");

        // field order does not matter
        let description =
            parse_remote_description(r#"{"sdp":"v=0\r\n","type":"answer"}"#).unwrap();
        assert_eq!(description.sdp_type, RTCSdpType::Answer);
    }

    #[test]
    fn test_ignore_other_messages() {
        assert!(parse_remote_description("not json").is_none());
        assert!(parse_remote_description(r#"{"type":"answer"}"#).is_none());
        assert!(parse_remote_description(r#"{"type":"answer","sdp":""}"#).is_none());
        assert!(parse_remote_description(r#"{"sdp":true}"#).is_none());
        assert!(parse_remote_description(r#"{"candidate":"candidate:1"}"#).is_none());
    }
}
