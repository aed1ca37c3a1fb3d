//! Live DASH manifest for a recording session.
//!
//! The manifest is never edited in place: [DashManifest] keeps the timeline
//! entries and renders a complete MPD from scratch on every [DashManifest::build].
//!
//! References:
//! - [DASH-IF implementation guidelines: restricted timing model](https://dashif.org/Guidelines-TimingModel)
//! - [SegmentTimeline](https://dashif.org/Guidelines-TimingModel/#addressing-explicit)

use std::{fmt::Write, path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, SubsecRound, Utc};
use dash_mpd::{
    AdaptationSet, Period, Representation, SegmentTemplate, SegmentTimeline, MPD, S,
};
use tokio::sync::Mutex;

use crate::{
    config::ManifestConfig,
    error::{RecorderError, RecorderResult},
    storage::{self, INIT_FILE, MEDIA_TEMPLATE},
};

const MPD_NAMESPACE: &str = "urn:mpeg:dash:schema:mpd:2011";
const LIVE_PROFILE: &str = "urn:mpeg:dash:profile:isoff-live:2011";
const WEBM_MIME_TYPE: &str = "video/webm";

/// One finalized segment on the sample timeline, in timescale units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub duration: u64,
    pub start_offset: u64,
}

impl TimelineEntry {
    pub fn end(&self) -> u64 {
        self.start_offset + self.duration
    }
}

pub struct DashManifest {
    config: ManifestConfig,

    /// `MPD@availabilityStartTime`, fixed when the session starts.
    availability_start_time: DateTime<Utc>,
    /// `MPD@publishTime`, moved forward on every timeline change.
    publish_time: DateTime<Utc>,

    entries: Vec<TimelineEntry>,
}

impl DashManifest {
    pub fn new(config: ManifestConfig) -> Self {
        Self::with_start_time(config, Utc::now())
    }

    pub fn with_start_time(config: ManifestConfig, start_time: DateTime<Utc>) -> Self {
        let start_time = start_time.trunc_subsecs(0);
        Self {
            config,
            availability_start_time: start_time,
            publish_time: start_time,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Start offset the next entry must have.
    pub fn next_offset(&self) -> u64 {
        self.entries.last().map(TimelineEntry::end).unwrap_or(0)
    }

    pub fn push_entry(&mut self, duration: u64, start_offset: u64) -> RecorderResult<()> {
        let expected = self.next_offset();
        if duration == 0 || start_offset != expected {
            return Err(RecorderError::InvalidTimelineEntry {
                duration,
                start_offset,
                expected,
            });
        }

        self.entries.push(TimelineEntry {
            duration,
            start_offset,
        });
        self.publish_time = Utc::now().trunc_subsecs(0).max(self.publish_time);
        Ok(())
    }

    pub fn to_mpd(&self) -> MPD {
        let segment_timeline = SegmentTimeline {
            segments: self
                .entries
                .iter()
                .map(|entry| S {
                    t: Some(entry.start_offset),
                    d: entry.duration,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let representation = Representation {
            id: Some("0".to_string()),
            mimeType: Some(WEBM_MIME_TYPE.to_string()),
            codecs: Some(self.config.codecs.join(",")),
            bandwidth: Some(self.config.bandwidth),
            width: self.config.width,
            height: self.config.height,
            SegmentTemplate: Some(SegmentTemplate {
                initialization: Some(INIT_FILE.to_string()),
                media: Some(MEDIA_TEMPLATE.to_string()),
                timescale: Some(self.config.timescale),
                SegmentTimeline: Some(segment_timeline),
                ..Default::default()
            }),
            ..Default::default()
        };

        let period = Period {
            id: Some("0".to_string()),
            start: Some(Duration::ZERO),
            adaptations: vec![AdaptationSet {
                mimeType: Some(WEBM_MIME_TYPE.to_string()),
                codecs: Some(self.config.codecs.join(",")),
                representations: vec![representation],
                ..Default::default()
            }],
            ..Default::default()
        };

        MPD {
            mpdtype: Some("dynamic".to_string()),
            xmlns: Some(MPD_NAMESPACE.to_string()),
            profiles: Some(LIVE_PROFILE.to_string()),
            minBufferTime: Some(Duration::from_secs(self.config.min_buffer_time)),
            minimumUpdatePeriod: Some(Duration::from_secs(self.config.minimum_update_period)),
            availabilityStartTime: Some(self.availability_start_time),
            publishTime: Some(self.publish_time),
            periods: vec![period],
            ..Default::default()
        }
    }

    /// Render the manifest document.
    ///
    /// Only depends on the entries pushed so far, two calls without a
    /// [DashManifest::push_entry] in between return the same bytes.
    pub fn build(&self) -> RecorderResult<String> {
        let mut document = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        write!(document, "{}", self.to_mpd())
            .map_err(|e| RecorderError::ManifestRender(e.to_string()))?;
        Ok(document)
    }
}

/// Session-owned manifest state shared by the segment writer and the file server.
///
/// Every persist happens under the lock, so the file on disk always ends up
/// holding the latest timeline. Once the session is over the handle is
/// retired and never touches the file again, since the next session owns it.
#[derive(Clone)]
pub struct ManifestHandle {
    state: Arc<Mutex<ManifestState>>,
    path: PathBuf,
}

struct ManifestState {
    manifest: DashManifest,
    retired: bool,
}

impl ManifestHandle {
    pub fn new(manifest: DashManifest, path: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManifestState {
                manifest,
                retired: false,
            })),
            path: path.into(),
        }
    }

    /// Append an entry and rewrite the manifest file.
    pub async fn push_entry(&self, duration: u64, start_offset: u64) -> RecorderResult<()> {
        let mut state = self.state.lock().await;
        state.manifest.push_entry(duration, start_offset)?;
        if state.retired {
            log::warn!("Timeline entry at {start_offset} added after the session ended");
            return Ok(());
        }

        let document = state.manifest.build()?;
        storage::write_atomic(&self.path, document.as_bytes()).await
    }

    /// Rebuild the manifest file from the current state and return its content.
    ///
    /// Returns `None` without writing anything once the handle is retired.
    pub async fn persist(&self) -> RecorderResult<Option<String>> {
        let state = self.state.lock().await;
        if state.retired {
            return Ok(None);
        }

        let document = state.manifest.build()?;
        storage::write_atomic(&self.path, document.as_bytes()).await?;
        Ok(Some(document))
    }

    /// Stop writing the manifest file.
    ///
    /// Waits for a persist in progress, so the file is free once this returns.
    pub async fn retire(&self) {
        self.state.lock().await.retired = true;
    }

    pub async fn is_retired(&self) -> bool {
        self.state.lock().await.retired
    }

    pub async fn build(&self) -> RecorderResult<String> {
        self.state.lock().await.manifest.build()
    }

    pub async fn entries(&self) -> Vec<TimelineEntry> {
        self.state.lock().await.manifest.entries().to_vec()
    }
}
