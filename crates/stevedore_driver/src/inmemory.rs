use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::RwLock;

use super::errors::{Error, Result};
use super::{check_path, FileInfo, FileReader, FileWriter, StorageDriver};

#[derive(Clone)]
struct Entry {
    data: Bytes,
    mtime: DateTime<Utc>,
}

type State = Arc<RwLock<BTreeMap<String, Entry>>>;

/// Keeps everything in a sorted in-process map.
///
/// Directories are implicit: a path is a directory when some stored key
/// extends it. Primarily a test backend, but also useful as a scratch
/// registry.
#[derive(Clone, Default)]
pub struct InMemoryDriver {
    state: State,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

fn dir_prefix(path: &str) -> String {
    format!("{path}/")
}

#[async_trait]
impl StorageDriver for InMemoryDriver {
    fn name(&self) -> &'static str {
        "inmemory"
    }

    async fn get_content(&self, path: &str) -> Result<Bytes> {
        check_path(path)?;
        let state = self.state.read().await;
        state
            .get(path)
            .map(|e| e.data.clone())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        check_path(path)?;
        let mut state = self.state.write().await;
        state.insert(
            path.to_string(),
            Entry {
                data: content,
                mtime: Utc::now(),
            },
        );
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<FileReader> {
        let data = self.get_content(path).await?;
        if offset > data.len() as u64 {
            return Err(Error::InvalidOffset {
                path: path.to_string(),
                offset,
            });
        }
        let tail = data.slice(offset as usize..);
        Ok(futures::stream::once(async move { Ok(tail) }).boxed())
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>> {
        check_path(path)?;
        let mut buf = BytesMut::new();
        if append {
            let state = self.state.read().await;
            if let Some(entry) = state.get(path) {
                buf.extend_from_slice(&entry.data);
            }
        }
        Ok(Box::new(InMemoryWriter {
            state: self.state.clone(),
            path: path.to_string(),
            buf,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        check_path(path)?;
        let state = self.state.read().await;
        if let Some(entry) = state.get(path) {
            return Ok(FileInfo {
                path: path.to_string(),
                size: entry.data.len() as u64,
                mtime: entry.mtime,
                is_dir: false,
            });
        }
        let prefix = dir_prefix(path);
        if state.range(prefix.clone()..).next().map_or(false, |(k, _)| {
            k.starts_with(&prefix)
        }) {
            return Ok(FileInfo {
                path: path.to_string(),
                size: 0,
                mtime: Utc::now(),
                is_dir: true,
            });
        }
        Err(Error::NotFound(path.to_string()))
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        check_path(path)?;
        let prefix = dir_prefix(path);
        let state = self.state.read().await;
        let mut children: Vec<String> = Vec::new();
        for key in state.range(prefix.clone()..).map(|(k, _)| k) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            let child = match rest.split_once('/') {
                Some((first, _)) => format!("{prefix}{first}"),
                None => key.clone(),
            };
            if children.last() != Some(&child) {
                children.push(child);
            }
        }
        if children.is_empty() && !state.contains_key(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(children)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        check_path(from)?;
        check_path(to)?;
        let mut state = self.state.write().await;
        // single-file fast path, then fall back to moving a whole subtree
        if let Some(entry) = state.remove(from) {
            state.insert(to.to_string(), entry);
            return Ok(());
        }
        let prefix = dir_prefix(from);
        let moved: Vec<(String, Entry)> = state
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        if moved.is_empty() {
            return Err(Error::NotFound(from.to_string()));
        }
        for (key, entry) in moved {
            state.remove(&key);
            let suffix = &key[from.len()..];
            state.insert(format!("{to}{suffix}"), entry);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        check_path(path)?;
        let mut state = self.state.write().await;
        let mut found = state.remove(path).is_some();
        let prefix = dir_prefix(path);
        let doomed: Vec<String> = state
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            state.remove(&key);
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }

    async fn walk(&self, path: &str) -> Result<Vec<FileInfo>> {
        check_path(path)?;
        let prefix = dir_prefix(path);
        let state = self.state.read().await;
        let files: Vec<FileInfo> = state
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, e)| FileInfo {
                path: k.clone(),
                size: e.data.len() as u64,
                mtime: e.mtime,
                is_dir: false,
            })
            .collect();
        if files.is_empty() && !state.contains_key(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(files)
    }
}

struct InMemoryWriter {
    state: State,
    path: String,
    buf: BytesMut,
}

#[async_trait]
impl FileWriter for InMemoryWriter {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.buf.extend_from_slice(&data);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.write().await;
        state.insert(
            self.path,
            Entry {
                data: self.buf.freeze(),
                mtime: Utc::now(),
            },
        );
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        let mut state = self.state.write().await;
        state.remove(&self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn content_round_trip() {
        let driver = InMemoryDriver::new();
        driver
            .put_content("/a/b", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert_eq!(driver.get_content("/a/b").await.unwrap().as_ref(), b"hi");
        assert!(driver.stat("/a").await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn list_direct_children_only() {
        let driver = InMemoryDriver::new();
        for p in ["/r/a/x", "/r/a/y", "/r/b", "/s/other"] {
            driver.put_content(p, Bytes::from_static(b"1")).await.unwrap();
        }
        assert_eq!(driver.list("/r").await.unwrap(), vec!["/r/a", "/r/b"]);
    }

    #[tokio::test]
    async fn rename_single_file() {
        let driver = InMemoryDriver::new();
        driver
            .put_content("/up/data", Bytes::from_static(b"x"))
            .await
            .unwrap();
        driver.rename("/up/data", "/blob/data").await.unwrap();
        assert!(driver.get_content("/up/data").await.is_err());
        assert_eq!(driver.get_content("/blob/data").await.unwrap().as_ref(), b"x");
    }

    #[tokio::test]
    async fn append_writer() {
        let driver = InMemoryDriver::new();
        let mut w = driver.writer("/d", false).await.unwrap();
        w.write(Bytes::from_static(b"ab")).await.unwrap();
        w.commit().await.unwrap();

        let mut w = driver.writer("/d", true).await.unwrap();
        assert_eq!(w.size(), 2);
        w.write(Bytes::from_static(b"cd")).await.unwrap();
        w.commit().await.unwrap();
        assert_eq!(driver.get_content("/d").await.unwrap().as_ref(), b"abcd");
    }

    #[tokio::test]
    async fn reader_offset_bounds() {
        let driver = InMemoryDriver::new();
        driver
            .put_content("/d", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let stream = driver.reader("/d", 3).await.unwrap();
        let parts: Vec<_> = stream.collect::<Vec<_>>().await;
        assert_eq!(parts[0].as_ref().unwrap().as_ref(), b"lo");
        assert!(driver.reader("/d", 9).await.is_err());
    }
}
