use bytes::Bytes;
use tokio::{fs::File, io::AsyncWriteExt, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{RecorderError, RecorderResult},
    event::{MuxEvent, MuxOutput},
    mpd::ManifestHandle,
    storage::RecordingDir,
};

/// Turns mux events into files of a [RecordingDir].
///
/// A cluster is appended to `cluster.webm` until the next cluster starts. Only
/// then its duration is known, and the file is renamed to `media<offset>.webm`
/// and added to the manifest. A name advertised by the manifest therefore
/// always points to a complete file that never changes again.
pub struct SegmentWriter {
    dir: RecordingDir,
    manifest: ManifestHandle,

    /// Start offset of the active cluster, in timescale units.
    cursor: u64,
    has_init: bool,
    active: Option<File>,
}

impl SegmentWriter {
    pub fn new(dir: RecordingDir, manifest: ManifestHandle) -> Self {
        Self {
            dir,
            manifest,
            cursor: 0,
            has_init: false,
            active: None,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub async fn handle(&mut self, event: MuxEvent) -> RecorderResult<()> {
        log::trace!("{:?} event, {} bytes", event.kind(), event.payload().len());
        match event {
            MuxEvent::Initial(payload) => self.write_initial(payload).await,
            MuxEvent::Cluster {
                payload,
                previous_duration,
            } => {
                match previous_duration {
                    Some(duration) if duration > 0 => {
                        if self.active.is_some() {
                            self.finalize_cluster(duration).await?;
                        } else {
                            log::warn!(
                                "Cluster reports a previous duration of {duration} but no cluster is active, starting a new timeline"
                            );
                        }
                    }
                    _ => {}
                }
                self.start_cluster(payload).await
            }
            MuxEvent::Block(payload) => self.append_block(payload).await,
        }
    }

    async fn write_initial(&mut self, payload: Bytes) -> RecorderResult<()> {
        if self.has_init {
            log::warn!("Ignoring repeated initial segment");
            return Ok(());
        }

        let path = self.dir.init_path();
        tokio::fs::write(&path, &payload)
            .await
            .map_err(RecorderError::file("write", &path))?;
        self.has_init = true;

        log::debug!("Wrote initial segment, {} bytes", payload.len());
        Ok(())
    }

    /// Close `cluster.webm`, publish it as `media<cursor>.webm`, then advance the cursor.
    async fn finalize_cluster(&mut self, duration: u64) -> RecorderResult<()> {
        let active_path = self.dir.active_cluster_path();
        if let Some(mut file) = self.active.take() {
            file.flush()
                .await
                .map_err(RecorderError::file("flush", &active_path))?;
            file.sync_data()
                .await
                .map_err(RecorderError::file("sync", &active_path))?;
        }

        let start_offset = self.cursor;
        let media_path = self.dir.media_path(start_offset);
        tokio::fs::rename(&active_path, &media_path)
            .await
            .map_err(RecorderError::file("rename", &active_path))?;

        self.manifest.push_entry(duration, start_offset).await?;
        self.cursor += duration;

        tracing::info!(start_offset, duration, "Finalized {}", media_path.display());
        Ok(())
    }

    async fn start_cluster(&mut self, payload: Bytes) -> RecorderResult<()> {
        let path = self.dir.active_cluster_path();
        let mut file = File::create(&path)
            .await
            .map_err(RecorderError::file("create", &path))?;
        file.write_all(&payload)
            .await
            .map_err(RecorderError::file("write", &path))?;
        file.flush()
            .await
            .map_err(RecorderError::file("flush", &path))?;

        self.active = Some(file);
        log::debug!("Started cluster at {}", self.cursor);
        Ok(())
    }

    async fn append_block(&mut self, payload: Bytes) -> RecorderResult<()> {
        let Some(file) = self.active.as_mut() else {
            log::warn!("Dropping block of {} bytes outside of a cluster", payload.len());
            return Ok(());
        };

        let path = self.dir.active_cluster_path();
        file.write_all(&payload)
            .await
            .map_err(RecorderError::file("append", &path))?;
        file.flush()
            .await
            .map_err(RecorderError::file("flush", &path))?;
        Ok(())
    }

    async fn close(&mut self) -> RecorderResult<()> {
        if let Some(mut file) = self.active.take() {
            let path = self.dir.active_cluster_path();
            file.flush()
                .await
                .map_err(RecorderError::file("flush", &path))?;
        }
        Ok(())
    }

    /// Run the writer on its own task.
    ///
    /// Events are handled one at a time in the order they were sent. The task
    /// ends when every [EventSender] is dropped, when `cancel` fires and the
    /// queue is drained, or on the first error, which leaves the recording as
    /// it was before the failed event.
    pub fn spawn(
        mut self,
        cancel: CancellationToken,
    ) -> (EventSender, JoinHandle<RecorderResult<()>>) {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    event = receiver.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                };

                if let Err(e) = self.handle(event).await {
                    log::error!("Segment writer stopped: {e}");
                    return Err(e);
                }
            }

            self.close().await
        });

        (EventSender { sender }, handle)
    }
}

/// Entry point of the segment writer for upstream media pipelines.
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<MuxEvent>,
}

impl EventSender {
    pub fn send(&self, event: MuxEvent) -> RecorderResult<()> {
        self.sender
            .send(event)
            .map_err(|_| RecorderError::WriterClosed)
    }

    pub fn send_output(&self, output: MuxOutput) -> RecorderResult<()> {
        match output.into_event() {
            Some(event) => self.send(event),
            None => {
                log::debug!("Skipping mux output without payload");
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
