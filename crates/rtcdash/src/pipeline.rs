//! Boundary between received RTP and the segment writer.
//!
//! Jitter buffering, depacketization, A/V sync and WebM muxing live behind
//! [MediaPipeline]. An implementation receives the raw packets of both tracks
//! and reports its muxer output through the [EventSender] it was created with.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::{
    error::{RecorderError, RecorderResult},
    writer::EventSender,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(Self::Audio),
            RTPCodecType::Video => Some(Self::Video),
            _ => None,
        }
    }
}

pub trait MediaPipeline: Send + 'static {
    /// Feed one RTP packet received on the track of `kind`.
    ///
    /// Returning an error stops the pipeline for the rest of the session.
    fn push_rtp(&mut self, kind: MediaKind, packet: Packet) -> RecorderResult<()>;
}

/// Creates one pipeline per recording session.
pub trait PipelineFactory: Send + Sync + 'static {
    fn create(&self, events: EventSender) -> Box<dyn MediaPipeline>;
}

impl<F, P> PipelineFactory for F
where
    F: Fn(EventSender) -> P + Send + Sync + 'static,
    P: MediaPipeline,
{
    fn create(&self, events: EventSender) -> Box<dyn MediaPipeline> {
        Box::new(self(events))
    }
}

pub type PacketSender = mpsc::UnboundedSender<(MediaKind, Packet)>;

/// Drive `pipeline` on its own task, so packets of both tracks reach it one at a time.
pub fn spawn_pipeline(
    mut pipeline: Box<dyn MediaPipeline>,
    cancel: CancellationToken,
) -> PacketSender {
    let (sender, mut receiver) = mpsc::unbounded_channel::<(MediaKind, Packet)>();

    tokio::spawn(async move {
        loop {
            let (kind, packet) = tokio::select! {
                _ = cancel.cancelled() => break,
                packet = receiver.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };

            if let Err(e) = pipeline.push_rtp(kind, packet) {
                log::error!("Media pipeline stopped: {e}");
                break;
            }
        }
    });

    sender
}

/// Pipeline that only counts packets, for running without a muxer.
pub struct PacketCounter {
    events: EventSender,
    audio: u64,
    video: u64,
    report_every: u64,
}

impl PacketCounter {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            audio: 0,
            video: 0,
            report_every: 1000,
        }
    }

    pub fn count(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

impl MediaPipeline for PacketCounter {
    fn push_rtp(&mut self, kind: MediaKind, packet: Packet) -> RecorderResult<()> {
        if self.events.is_closed() {
            return Err(RecorderError::WriterClosed);
        }

        let count = match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        };
        *count += 1;

        if *count % self.report_every == 1 {
            log::info!(
                "Received {count} {kind:?} packets (ssrc={}, seq={}), no muxer attached",
                packet.header.ssrc,
                packet.header.sequence_number,
            );
        }
        Ok(())
    }
}
