use std::sync::atomic::{AtomicU64, Ordering};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    config::RecorderConfig,
    error::RecorderResult,
    mpd::{DashManifest, ManifestHandle},
    storage::RecordingDir,
    writer::{EventSender, SegmentWriter},
};

/// A single recording into the recording directory.
pub struct RecordingSession {
    id: u64,
    manifest: ManifestHandle,
    events: EventSender,
    cancel: CancellationToken,
    writer: JoinHandle<RecorderResult<()>>,
}

impl RecordingSession {
    /// Wipe `dir`, publish an empty manifest and start the segment writer.
    pub async fn start(
        id: u64,
        dir: &RecordingDir,
        config: &RecorderConfig,
    ) -> RecorderResult<Self> {
        dir.reset().await?;

        let manifest = ManifestHandle::new(
            DashManifest::new(config.manifest.clone()),
            dir.manifest_path(),
        );
        manifest.persist().await?;

        let cancel = CancellationToken::new();
        let (events, writer) =
            SegmentWriter::new(dir.clone(), manifest.clone()).spawn(cancel.child_token());

        tracing::info!(session = id, "Recording started in {}", dir.root().display());
        Ok(Self {
            id,
            manifest,
            events,
            cancel,
            writer,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn manifest(&self) -> &ManifestHandle {
        &self.manifest
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Cancel everything attached to the session and wait for the writer to
    /// flush the events already queued.
    ///
    /// The manifest handle is retired before returning, so stale handles still
    /// held by readers cannot overwrite the manifest of a later session.
    pub async fn stop(self) -> RecorderResult<()> {
        self.cancel.cancel();
        let result = self.writer.await;
        self.manifest.retire().await;
        log::info!("Recording session #{} stopped", self.id);
        result?
    }
}

/// The parts of a session handed to its media source.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: u64,
    pub events: EventSender,
    /// Fires when the session is superseded or the recorder shuts down.
    pub cancel: CancellationToken,
}

/// Owner of the recording directory. Runs at most one session at a time:
/// starting a new one stops the previous session before the directory is wiped.
pub struct Recorder {
    config: RecorderConfig,
    dir: RecordingDir,

    next_id: AtomicU64,
    active: Mutex<Option<RecordingSession>>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            dir: RecordingDir::new(config.recording_dir.clone()),
            config,
            next_id: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn dir(&self) -> &RecordingDir {
        &self.dir
    }

    pub async fn begin_session(&self) -> RecorderResult<SessionHandle> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            let previous_id = previous.id();
            if let Err(e) = previous.stop().await {
                log::warn!("Recording session #{previous_id} ended with error: {e}");
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = RecordingSession::start(id, &self.dir, &self.config).await?;
        let handle = session.handle();
        active.replace(session);

        Ok(handle)
    }

    /// Manifest of the running session, if any.
    pub async fn manifest(&self) -> Option<ManifestHandle> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| session.manifest().clone())
    }

    pub async fn shutdown(&self) -> RecorderResult<()> {
        match self.active.lock().await.take() {
            Some(session) => session.stop().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::event::MuxEvent;

    fn recorder(root: &std::path::Path) -> Recorder {
        Recorder::new(RecorderConfig {
            recording_dir: root.join("dash"),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_session_publishes_empty_manifest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let recorder = recorder(temp.path());
        assert!(recorder.manifest().await.is_none());

        recorder.begin_session().await?;

        let manifest = recorder.manifest().await.unwrap();
        assert!(manifest.entries().await.is_empty());
        assert_eq!(
            tokio::fs::read_to_string(recorder.dir().manifest_path()).await?,
            manifest.build().await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_new_session_supersedes_previous() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let recorder = recorder(temp.path());

        let first = recorder.begin_session().await?;
        first
            .events
            .send(MuxEvent::Initial(Bytes::from_static(b"old")))?;

        let second = recorder.begin_session().await?;
        assert_ne!(first.id, second.id);
        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());

        // the old writer is gone and its files were wiped
        assert!(first.events.is_closed());
        assert!(!recorder.dir().init_path().exists());

        second
            .events
            .send(MuxEvent::Initial(Bytes::from_static(b"new")))?;
        recorder.shutdown().await?;
        assert_eq!(tokio::fs::read(recorder.dir().init_path()).await?, b"new");
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_overwrite_new_manifest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let recorder = recorder(temp.path());

        recorder.begin_session().await?;
        let stale = recorder.manifest().await.unwrap();
        stale.push_entry(700, 0).await?;

        recorder.begin_session().await?;
        assert!(stale.is_retired().await);
        assert_eq!(stale.persist().await?, None);

        let current = recorder.manifest().await.unwrap();
        let on_disk = tokio::fs::read_to_string(recorder.dir().manifest_path()).await?;
        assert!(!on_disk.contains("d=\"700\""));
        assert_eq!(on_disk, current.build().await?);
        Ok(())
    }
}
