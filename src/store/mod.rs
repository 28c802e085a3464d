// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Partition storage: the durable file store boundary, per-partition
//! buffers, the partition read/write object and the multi-partition
//! writers.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use log::error;
use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{RangePartError, Result};
use crate::tree::PartitionId;

/// Per-partition in-memory write buffers.
pub mod buffer;
/// One physical partition: lock-guarded flush and chunked reads.
pub mod partition;
/// Writers that buffer records for many partitions at once.
pub mod writer;

/// Durable file store the partitions live on.
///
/// This is the boundary to the external distributed file system; only the
/// operations the partition layer needs are modeled. [LocalFileStore]
/// implements it over the local filesystem.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Size of the file at `path` in bytes; `NotFound` if absent.
    async fn size(&self, path: &str) -> Result<u64>;

    /// Whether a file exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Reads up to `len` bytes starting at `offset`, truncated at
    /// end-of-file.
    async fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Creates (or truncates) the file with the given contents.
    ///
    /// `replication` is the requested replication factor; stores without
    /// replication accept and ignore it.
    async fn create(&self, path: &str, data: &[u8], replication: u16) -> Result<()>;

    /// Appends to an existing file; `NotFound` if absent.
    async fn append(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Deletes the file at `path`.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists the files directly under `dir`, sorted by name.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
}

/// Path of one partition file below its dataset directory.
pub fn partition_path(dir: &str, partition_id: PartitionId) -> String {
    format!("{}/{partition_id}", dir.trim_end_matches('/'))
}

/// Stable name of the distributed lock guarding one partition file.
///
/// Derived from a hash of the dataset path plus the partition id so every
/// worker addressing the same partition contends on the same lock.
pub fn lock_name(dir: &str, partition_id: PartitionId) -> String {
    let mut hasher = Md5::new();
    hasher.update(dir.trim_end_matches('/').as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("partition-lock-{hex}-{partition_id}")
}

/// [FileStore] over the local filesystem, used for single-host builds and
/// tests.
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl LocalFileStore {
    /// Creates a local file store.
    pub fn new() -> Self {
        Self
    }

    fn map_open_err(path: &str, e: std::io::Error) -> RangePartError {
        if e.kind() == std::io::ErrorKind::NotFound {
            RangePartError::NotFound(path.to_string())
        } else {
            RangePartError::IoError(e)
        }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn size(&self, path: &str) -> Result<u64> {
        let meta = fs::metadata(path)
            .await
            .map_err(|e| Self::map_open_err(path, e))?;
        Ok(meta.len())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(path).await?)
    }

    async fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| Self::map_open_err(path, e))?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = file.read(&mut buf[read..]).await?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }

    async fn create(&self, path: &str, data: &[u8], _replication: u16) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| Self::map_open_err(path, e))?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(path).await.map_err(|e| {
            error!("Failed to delete partition file at {path}: {e:?}");
            Self::map_open_err(path, e)
        })
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| Self::map_open_err(dir, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path().to_string_lossy().to_string());
            }
        }
        files.sort();
        Ok(files)
    }
}
