use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter, SeekFrom};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::errors::{Error, Result};
use super::{check_path, FileInfo, FileReader, FileWriter, StorageDriver};

/// Stores objects as plain files under a root directory.
///
/// `put_content` writes to a uniquely-named sibling and renames it into
/// place, and `rename` maps to `rename(2)`, so single-file publication is
/// atomic on any POSIX filesystem.
pub struct FilesystemDriver {
    root: PathBuf,
}

impl FilesystemDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        check_path(path)?;
        Ok(self.root.join(&path[1..]))
    }

    async fn ensure_parent(&self, full: &Path, path: &str) -> Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io(path, e))?;
        }
        Ok(())
    }
}

fn file_info(path: String, md: &std::fs::Metadata) -> Result<FileInfo> {
    let mtime = md
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(FileInfo {
        size: if md.is_dir() { 0 } else { md.len() },
        is_dir: md.is_dir(),
        mtime,
        path,
    })
}

#[async_trait]
impl StorageDriver for FilesystemDriver {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn get_content(&self, path: &str) -> Result<Bytes> {
        let full = self.full_path(path)?;
        let data = fs::read(&full).await.map_err(|e| Error::from_io(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        let full = self.full_path(path)?;
        self.ensure_parent(&full, path).await?;

        // write-then-rename within the target directory keeps replacement
        // atomic for concurrent readers
        let tmp = full.with_extension(format!("tmp.{}", Uuid::new_v4()));
        fs::write(&tmp, &content)
            .await
            .map_err(|e| Error::from_io(path, e))?;
        fs::rename(&tmp, &full)
            .await
            .map_err(|e| Error::from_io(path, e))?;
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<FileReader> {
        let full = self.full_path(path)?;
        let mut file = File::open(&full).await.map_err(|e| Error::from_io(path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::from_io(path, e))?
            .len();
        if offset > len {
            return Err(Error::InvalidOffset {
                path: path.to_string(),
                offset,
            });
        }
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| Error::from_io(path, e))?;
        }
        Ok(ReaderStream::new(file).boxed())
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>> {
        let full = self.full_path(path)?;
        self.ensure_parent(&full, path).await?;

        let mut options = OpenOptions::new();
        options.create(true).write(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let file = options
            .open(&full)
            .await
            .map_err(|e| Error::from_io(path, e))?;
        let size = if append {
            file.metadata()
                .await
                .map_err(|e| Error::from_io(path, e))?
                .len()
        } else {
            0
        };

        Ok(Box::new(FsFileWriter {
            inner: BufWriter::new(file),
            full,
            path: path.to_string(),
            size,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let full = self.full_path(path)?;
        let md = fs::metadata(&full)
            .await
            .map_err(|e| Error::from_io(path, e))?;
        file_info(path.to_string(), &md)
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let full = self.full_path(path)?;
        let mut dir = fs::read_dir(&full)
            .await
            .map_err(|e| Error::from_io(path, e))?;
        let mut children = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::from_io(path, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                children.push(format!("{path}/{name}"));
            }
        }
        children.sort();
        Ok(children)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.full_path(from)?;
        let dst = self.full_path(to)?;
        self.ensure_parent(&dst, to).await?;
        fs::rename(&src, &dst)
            .await
            .map_err(|e| Error::from_io(from, e))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;
        let md = fs::metadata(&full)
            .await
            .map_err(|e| Error::from_io(path, e))?;
        if md.is_dir() {
            fs::remove_dir_all(&full)
                .await
                .map_err(|e| Error::from_io(path, e))?;
        } else {
            fs::remove_file(&full)
                .await
                .map_err(|e| Error::from_io(path, e))?;
        }
        Ok(())
    }

    async fn walk(&self, path: &str) -> Result<Vec<FileInfo>> {
        let full = self.full_path(path)?;
        let mut stack = vec![(path.to_string(), full)];
        let mut files = Vec::new();

        while let Some((logical, dir)) = stack.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| Error::from_io(&logical, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::from_io(&logical, e))?
            {
                let name = match entry.file_name().into_string() {
                    Ok(n) => n,
                    Err(_) => continue,
                };
                let child_logical = format!("{logical}/{name}");
                let md = entry
                    .metadata()
                    .await
                    .map_err(|e| Error::from_io(&child_logical, e))?;
                if md.is_dir() {
                    stack.push((child_logical, entry.path()));
                } else {
                    files.push(file_info(child_logical, &md)?);
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

struct FsFileWriter {
    inner: BufWriter<File>,
    full: PathBuf,
    path: String,
    size: u64,
}

#[async_trait]
impl FileWriter for FsFileWriter {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.inner
            .write_all(&data)
            .await
            .map_err(|e| Error::from_io(&self.path, e))?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.inner
            .flush()
            .await
            .map_err(|e| Error::from_io(&self.path, e))?;
        self.inner
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| Error::from_io(&self.path, e))?;
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        drop(self.inner);
        fs::remove_file(&self.full)
            .await
            .map_err(|e| Error::from_io(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> (tempfile::TempDir, FilesystemDriver) {
        let dir = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(dir.path());
        (dir, driver)
    }

    #[tokio::test]
    async fn content_round_trip() {
        let (_dir, driver) = driver();
        driver
            .put_content("/a/b/c", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(driver.get_content("/a/b/c").await.unwrap().as_ref(), b"hello");

        let info = driver.stat("/a/b/c").await.unwrap();
        assert_eq!(info.size, 5);
        assert!(!info.is_dir);
    }

    #[tokio::test]
    async fn missing_paths_are_not_found() {
        let (_dir, driver) = driver();
        assert!(matches!(
            driver.get_content("/nope").await,
            Err(Error::NotFound(_))
        ));
        assert!(!driver.exists("/nope").await.unwrap());
    }

    #[tokio::test]
    async fn append_writer_resumes_size() {
        let (_dir, driver) = driver();
        let mut w = driver.writer("/up/data", false).await.unwrap();
        w.write(Bytes::from_static(b"hel")).await.unwrap();
        assert_eq!(w.size(), 3);
        w.commit().await.unwrap();

        let mut w = driver.writer("/up/data", true).await.unwrap();
        assert_eq!(w.size(), 3);
        w.write(Bytes::from_static(b"lo")).await.unwrap();
        w.commit().await.unwrap();

        assert_eq!(driver.get_content("/up/data").await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn reader_honors_offset() {
        let (_dir, driver) = driver();
        driver
            .put_content("/blob", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let stream = driver.reader("/blob", 2).await.unwrap();
        let chunks: Vec<_> = futures::StreamExt::collect::<Vec<_>>(stream).await;
        let data: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(&data, b"llo");

        assert!(matches!(
            driver.reader("/blob", 6).await,
            Err(Error::InvalidOffset { .. })
        ));
    }

    #[tokio::test]
    async fn rename_moves_files() {
        let (_dir, driver) = driver();
        driver
            .put_content("/up/data", Bytes::from_static(b"blob"))
            .await
            .unwrap();
        driver.rename("/up/data", "/blobs/aa/data").await.unwrap();
        assert!(!driver.exists("/up/data").await.unwrap());
        assert_eq!(
            driver.get_content("/blobs/aa/data").await.unwrap().as_ref(),
            b"blob"
        );
    }

    #[tokio::test]
    async fn list_and_walk() {
        let (_dir, driver) = driver();
        for p in ["/r/a/link", "/r/b/link", "/r/b/nested/link"] {
            driver.put_content(p, Bytes::from_static(b"x")).await.unwrap();
        }
        assert_eq!(driver.list("/r").await.unwrap(), vec!["/r/a", "/r/b"]);

        let walked: Vec<_> = driver
            .walk("/r")
            .await
            .unwrap()
            .into_iter()
            .map(|fi| fi.path)
            .collect();
        assert_eq!(walked, vec!["/r/a/link", "/r/b/link", "/r/b/nested/link"]);
    }

    #[tokio::test]
    async fn delete_is_recursive() {
        let (_dir, driver) = driver();
        driver
            .put_content("/r/a/link", Bytes::from_static(b"x"))
            .await
            .unwrap();
        driver.delete("/r").await.unwrap();
        assert!(!driver.exists("/r/a/link").await.unwrap());
    }
}
