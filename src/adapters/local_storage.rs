use crate::domain::ports::{ArtifactWriter, KeyStream, StagingStore};
use crate::utils::error::{Result, TransferError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Staging store rooted at a local directory. Keys map to relative paths,
/// `/`-separated on every platform.
#[derive(Debug, Clone)]
pub struct LocalStagingStore {
    base_path: PathBuf,
}

impl LocalStagingStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_of(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(TransferError::StagingError {
                message: format!("'{}' is not a valid staging key", key),
            });
        }
        Ok(self.base_path.join(relative))
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

#[async_trait]
impl StagingStore for LocalStagingStore {
    async fn open_write(&self, key: &str) -> Result<Box<dyn ArtifactWriter>> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;

        Ok(Box::new(LocalArtifactWriter {
            file: Some(BufWriter::new(file)),
        }))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        let root = self.base_path.clone();
        let snapshot = async move {
            // directory walk is blocking; keep it off the runtime threads
            let walked = tokio::task::spawn_blocking(move || {
                let mut keys = Vec::new();
                if root.is_dir() {
                    collect_keys(&root, &root, &mut keys)?;
                }
                Ok::<_, std::io::Error>(keys)
            })
            .await;

            let mut keys = match walked {
                Ok(Ok(keys)) => keys,
                Ok(Err(e)) => return vec![Err(TransferError::from(e))],
                Err(e) => {
                    return vec![Err(TransferError::StagingError {
                        message: format!(
                            "listing {} did not finish: {}",
                            self.base_path.display(),
                            e
                        ),
                    })]
                }
            };
            keys.sort();
            keys.into_iter()
                .filter(|key| key.starts_with(prefix))
                .map(Ok)
                .collect::<Vec<_>>()
        };
        Box::pin(stream::once(snapshot).flat_map(stream::iter))
    }

    fn uri(&self, key: &str) -> String {
        format!("file://{}", self.base_path.join(key).display())
    }
}

struct LocalArtifactWriter {
    file: Option<BufWriter<tokio::fs::File>>,
}

#[async_trait]
impl ArtifactWriter for LocalArtifactWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| TransferError::StagingError {
            message: "write after finish".to_string(),
        })?;
        file.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.into_inner().sync_all().await?;
        }
        Ok(())
    }
}
