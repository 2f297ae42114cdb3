//! External persistence contracts named in §6: artifact storage and
//! per-agent workspace file access. Both are consumed as trait objects
//! (`Arc<dyn ArtifactStore>`, `Arc<dyn WorkspaceStore>`); this crate ships one
//! filesystem-backed implementation of each, rooted under the runtime
//! directory, with storage kept behind narrow trait boundaries rather than
//! baking a storage engine in.

use std::fs;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum StoreError {
    NotFound(String),
    PathTraversalBlocked(String),
    WorkspaceNotBound(String),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(r) => write!(f, "file_not_found: {}", r),
            StoreError::PathTraversalBlocked(p) => write!(f, "path_traversal_blocked: {}", p),
            StoreError::WorkspaceNotBound(id) => write!(f, "workspace_not_bound: {}", id),
            StoreError::Io(msg) => write!(f, "{}", msg),
        }
    }
}
impl std::error::Error for StoreError {}

/// Rejects absolute paths and any `..` segment, matching §6's safe-path rule.
/// Returns the jailed absolute path on success.
pub fn resolve_safe_path(root: &Path, rel_path: &str) -> Result<PathBuf, StoreError> {
    let rel = Path::new(rel_path);
    if rel.is_absolute() {
        return Err(StoreError::PathTraversalBlocked(rel_path.to_string()));
    }
    for component in rel.components() {
        match component {
            Component::ParentDir => {
                return Err(StoreError::PathTraversalBlocked(rel_path.to_string()))
            }
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(StoreError::PathTraversalBlocked(rel_path.to_string())),
        }
    }
    Ok(root.join(rel))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub artifact_type: String,
    pub mime_type: Option<String>,
}

/// Opaque durable blob storage named in §6. `put_artifact`/`get_artifact` are
/// the primary calls; `save_image`/`save_uploaded_file` are convenience
/// wrappers with a fixed `artifact_type`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_artifact(
        &self,
        artifact_type: &str,
        content: &[u8],
        meta: Option<ArtifactMeta>,
    ) -> Result<String, StoreError>;

    async fn get_artifact(&self, artifact_ref: &str) -> Result<(Vec<u8>, ArtifactMeta), StoreError>;

    async fn save_image(&self, content: &[u8], meta: Option<ArtifactMeta>) -> Result<String, StoreError> {
        self.put_artifact("image", content, meta).await
    }

    async fn save_uploaded_file(
        &self,
        content: &[u8],
        meta: Option<ArtifactMeta>,
    ) -> Result<String, StoreError> {
        self.put_artifact("upload", content, meta).await
    }
}

/// Filesystem-backed [`ArtifactStore`]: `artifacts/<uuid>` plus a sibling
/// `<uuid>.meta.json`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(runtime_dir: impl AsRef<Path>) -> Self {
        FsArtifactStore {
            root: runtime_dir.as_ref().join("artifacts"),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put_artifact(
        &self,
        artifact_type: &str,
        content: &[u8],
        meta: Option<ArtifactMeta>,
    ) -> Result<String, StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::Io(e.to_string()))?;
        let id = Uuid::new_v4().to_string();
        let meta = meta.unwrap_or(ArtifactMeta {
            artifact_type: artifact_type.to_string(),
            mime_type: None,
        });
        fs::write(self.root.join(&id), content).map_err(|e| StoreError::Io(e.to_string()))?;
        let meta_json =
            serde_json::to_string_pretty(&meta).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::write(self.root.join(format!("{}.meta.json", id)), meta_json)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(id)
    }

    async fn get_artifact(&self, artifact_ref: &str) -> Result<(Vec<u8>, ArtifactMeta), StoreError> {
        let content = fs::read(self.root.join(artifact_ref))
            .map_err(|_| StoreError::NotFound(artifact_ref.to_string()))?;
        let meta_path = self.root.join(format!("{}.meta.json", artifact_ref));
        let meta = match fs::read_to_string(&meta_path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| StoreError::Io(e.to_string()))?,
            Err(_) => ArtifactMeta {
                artifact_type: "unknown".to_string(),
                mime_type: None,
            },
        };
        Ok((content, meta))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Per-owner workspace file access named in §6. Assignment (`assign_workspace`)
/// is tracked independently of the owner's content directory, which is created
/// lazily on first write — callers decide *whether* an owner gets a workspace
/// (§4.4 spawn rule 5 only assigns children of `root`), this store just records
/// that decision and enforces it on every file operation.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn assign_workspace(&self, owner_id: &str) -> Result<(), StoreError>;
    async fn has_workspace(&self, owner_id: &str) -> bool;
    async fn read_file(&self, owner_id: &str, rel_path: &str) -> Result<String, StoreError>;
    async fn write_file(
        &self,
        owner_id: &str,
        rel_path: &str,
        content: &str,
    ) -> Result<(), StoreError>;
    async fn list_files(&self, owner_id: &str, rel_path: Option<&str>) -> Result<Vec<FileInfo>, StoreError>;
}

/// Filesystem-backed [`WorkspaceStore`]: `workspaces/<ownerId>/…`, assignment
/// recorded as a sibling `workspaces/<ownerId>.assigned` marker so the content
/// directory itself need not exist until the first write.
pub struct FsWorkspaceStore {
    root: PathBuf,
}

impl FsWorkspaceStore {
    pub fn new(runtime_dir: impl AsRef<Path>) -> Self {
        FsWorkspaceStore {
            root: runtime_dir.as_ref().join("workspaces"),
        }
    }

    fn owner_root(&self, owner_id: &str) -> PathBuf {
        self.root.join(owner_id)
    }

    fn marker_path(&self, owner_id: &str) -> PathBuf {
        self.root.join(format!("{}.assigned", owner_id))
    }
}

#[async_trait]
impl WorkspaceStore for FsWorkspaceStore {
    async fn assign_workspace(&self, owner_id: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::write(self.marker_path(owner_id), "").map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn has_workspace(&self, owner_id: &str) -> bool {
        self.marker_path(owner_id).is_file()
    }

    async fn read_file(&self, owner_id: &str, rel_path: &str) -> Result<String, StoreError> {
        if !self.has_workspace(owner_id).await {
            return Err(StoreError::WorkspaceNotBound(owner_id.to_string()));
        }
        let root = self.owner_root(owner_id);
        let path = resolve_safe_path(&root, rel_path)?;
        fs::read_to_string(&path).map_err(|_| StoreError::NotFound(rel_path.to_string()))
    }

    async fn write_file(
        &self,
        owner_id: &str,
        rel_path: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        if !self.has_workspace(owner_id).await {
            return Err(StoreError::WorkspaceNotBound(owner_id.to_string()));
        }
        let root = self.owner_root(owner_id);
        let path = resolve_safe_path(&root, rel_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        fs::write(&path, content).map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn list_files(
        &self,
        owner_id: &str,
        rel_path: Option<&str>,
    ) -> Result<Vec<FileInfo>, StoreError> {
        if !self.has_workspace(owner_id).await {
            return Err(StoreError::WorkspaceNotBound(owner_id.to_string()));
        }
        let root = self.owner_root(owner_id);
        let dir = match rel_path {
            Some(p) => resolve_safe_path(&root, p)?,
            None => root.clone(),
        };
        if !dir.is_dir() {
            return Ok(vec![]);
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            let metadata = entry.metadata().map_err(|e| StoreError::Io(e.to_string()))?;
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(&entry.path())
                .to_string_lossy()
                .to_string();
            out.push(FileInfo {
                path: rel,
                size: metadata.len(),
                is_dir: metadata.is_dir(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_and_parent_segments() {
        let root = PathBuf::from("/tmp/workspace-root");
        assert!(resolve_safe_path(&root, "/etc/passwd").is_err());
        assert!(resolve_safe_path(&root, "../secret").is_err());
        assert!(resolve_safe_path(&root, "a/../../b").is_err());
        assert!(resolve_safe_path(&root, "notes/today.md").is_ok());
    }

    #[tokio::test]
    async fn workspace_roundtrips_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsWorkspaceStore::new(dir.path());
        store.assign_workspace("agent-1").await.unwrap();
        store.write_file("agent-1", "notes.txt", "hello").await.unwrap();
        let content = store.read_file("agent-1", "notes.txt").await.unwrap();
        assert_eq!(content, "hello");
        let files = store.list_files("agent-1", None).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn artifact_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let id = store.put_artifact("text", b"payload", None).await.unwrap();
        let (content, meta) = store.get_artifact(&id).await.unwrap();
        assert_eq!(content, b"payload");
        assert_eq!(meta.artifact_type, "text");
    }
}
