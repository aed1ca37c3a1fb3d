use std::path::{Component, Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{RecorderError, RecorderResult};

pub const INIT_FILE: &str = "init.webm";
pub const ACTIVE_CLUSTER_FILE: &str = "cluster.webm";
pub const MANIFEST_FILE: &str = "dash.mpd";

/// `SegmentTemplate@media` matching [`RecordingDir::media_file_name`].
pub const MEDIA_TEMPLATE: &str = "media$Time$.webm";

/// Layout of a recording directory.
///
/// ```text
/// dash/
/// ├── init.webm          container header
/// ├── media0.webm        finalized clusters, named by start offset
/// ├── media2000.webm
/// ├── cluster.webm       cluster being appended to
/// └── dash.mpd
/// ```
#[derive(Debug, Clone)]
pub struct RecordingDir {
    root: PathBuf,
}

impl RecordingDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn init_path(&self) -> PathBuf {
        self.root.join(INIT_FILE)
    }

    pub fn active_cluster_path(&self) -> PathBuf {
        self.root.join(ACTIVE_CLUSTER_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn media_file_name(start_offset: u64) -> String {
        format!("media{start_offset}.webm")
    }

    pub fn media_path(&self, start_offset: u64) -> PathBuf {
        self.root.join(Self::media_file_name(start_offset))
    }

    /// Remove everything recorded so far and recreate an empty directory.
    pub async fn reset(&self) -> RecorderResult<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RecorderError::file("remove", &self.root)(e)),
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(RecorderError::file("create", &self.root))?;

        Ok(())
    }

    /// Map a request path like `/media0.webm` to a file inside the directory.
    ///
    /// Returns `None` for paths escaping the directory.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        let mut path = self.root.clone();
        let mut depth = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        if depth == 0 {
            return None;
        }
        Some(path)
    }
}

/// Replace `path` with `data` so readers observe either the old or the new
/// content, never a truncated file.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> RecorderResult<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(RecorderError::file("create", &tmp_path))?;
    file.write_all(data)
        .await
        .map_err(RecorderError::file("write", &tmp_path))?;
    file.flush()
        .await
        .map_err(RecorderError::file("flush", &tmp_path))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(RecorderError::file("rename", path))?;
    Ok(())
}
