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

//! Writers that fan routed records out over many partition buffers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::config::{
    RangePartConfig, DEFAULT_REPLICATION, DEFAULT_WRITE_MAX_BUFFER_SIZE,
};
use crate::error::{RangePartError, Result};
use crate::lock::LockProvider;
use crate::store::buffer::PartitionBuffer;
use crate::store::{lock_name, partition_path, FileStore};
use crate::tree::PartitionId;

/// Sink for routed records, one buffer per destination partition.
///
/// Implementations bound their memory: a partition's buffer is flushed
/// automatically once it exceeds the configured size, and always flushed
/// with append semantics so concurrent writers interleave instead of
/// clobbering each other.
#[async_trait]
pub trait PartitionWriter: Send {
    /// Buffers one record for the given partition, flushing the partition's
    /// buffer first if it is full.
    async fn write(&mut self, partition_id: PartitionId, record: &[u8]) -> Result<()>;

    /// Flushes one partition's buffer; `append` keeps existing file
    /// contents.
    ///
    /// `append = false` replaces the file only on the first flush a writer
    /// makes to that partition; once a writer has flushed a partition (an
    /// automatic flush counts), later flushes append so records already
    /// written this session are never discarded.
    async fn flush(&mut self, partition_id: PartitionId, append: bool) -> Result<()>;

    /// Flushes every non-empty buffer.
    async fn flush_all(&mut self, append: bool) -> Result<()>;

    /// Directory the partition files are written under.
    fn partition_dir(&self) -> &str;

    /// A writer with the same configuration targeting a different
    /// directory, for replicated builds.
    fn clone_for_dir(&self, dir: &str) -> Box<dyn PartitionWriter>;
}

/// [PartitionWriter] backed by a [FileStore] with lock-guarded flushes.
pub struct StorePartitionWriter {
    dir: String,
    buffers: HashMap<PartitionId, PartitionBuffer>,
    flushed: HashSet<PartitionId>,
    max_buffer_size: usize,
    replication: u16,
    store: Arc<dyn FileStore>,
    locks: Arc<dyn LockProvider>,
}

impl StorePartitionWriter {
    /// Creates a writer placing partition files under `dir`.
    pub fn new(
        dir: impl Into<String>,
        store: Arc<dyn FileStore>,
        locks: Arc<dyn LockProvider>,
    ) -> Self {
        Self {
            dir: dir.into(),
            buffers: HashMap::new(),
            flushed: HashSet::new(),
            max_buffer_size: DEFAULT_WRITE_MAX_BUFFER_SIZE,
            replication: DEFAULT_REPLICATION,
            store,
            locks,
        }
    }

    /// Overrides the per-partition buffer bound.
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size.max(1);
        self
    }

    /// Overrides the replication factor requested on create.
    pub fn with_replication(mut self, replication: u16) -> Self {
        self.replication = replication;
        self
    }

    /// Applies the configured buffer bound and replication factor.
    pub fn with_config(self, config: &RangePartConfig) -> Self {
        self.with_max_buffer_size(config.write_max_buffer_size())
            .with_replication(config.storage_replication())
    }

    async fn flush_buffer(&mut self, partition_id: PartitionId, append: bool) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(&partition_id) else {
            return Ok(());
        };
        if buffer.is_empty() {
            return Ok(());
        }
        // once this writer has flushed a partition, later flushes must
        // append or they would discard records it already wrote
        let append = append || self.flushed.contains(&partition_id);
        let path = partition_path(&self.dir, partition_id);
        let lease = self
            .locks
            .acquire(&lock_name(&self.dir, partition_id))
            .await?;
        let result = if append && self.store.exists(&path).await? {
            self.store.append(&path, buffer.bytes()).await
        } else {
            self.store
                .create(&path, buffer.bytes(), self.replication)
                .await
        };
        drop(lease);
        result.map_err(|e| {
            RangePartError::StoreError(path.clone(), partition_id, e.to_string())
        })?;
        debug!(
            "flushed {} records ({} bytes) to {path}",
            buffer.record_count(),
            buffer.offset()
        );
        buffer.reset();
        self.flushed.insert(partition_id);
        Ok(())
    }
}

#[async_trait]
impl PartitionWriter for StorePartitionWriter {
    async fn write(&mut self, partition_id: PartitionId, record: &[u8]) -> Result<()> {
        let full = self
            .buffers
            .get(&partition_id)
            .is_some_and(|b| b.offset() + record.len() > self.max_buffer_size);
        if full {
            self.flush_buffer(partition_id, true).await?;
        }
        self.buffers
            .entry(partition_id)
            .or_insert_with(|| PartitionBuffer::new(partition_id))
            .append(record);
        Ok(())
    }

    async fn flush(&mut self, partition_id: PartitionId, append: bool) -> Result<()> {
        self.flush_buffer(partition_id, append).await
    }

    async fn flush_all(&mut self, append: bool) -> Result<()> {
        let mut ids: Vec<PartitionId> = self.buffers.keys().copied().collect();
        ids.sort_unstable();
        for partition_id in ids {
            self.flush_buffer(partition_id, append).await?;
        }
        Ok(())
    }

    fn partition_dir(&self) -> &str {
        &self.dir
    }

    fn clone_for_dir(&self, dir: &str) -> Box<dyn PartitionWriter> {
        Box::new(
            Self::new(dir, self.store.clone(), self.locks.clone())
                .with_max_buffer_size(self.max_buffer_size)
                .with_replication(self.replication),
        )
    }
}

/// [PartitionWriter] flushing straight to the local filesystem without
/// locks, for single-process builds.
pub struct LocalPartitionWriter {
    dir: String,
    buffers: HashMap<PartitionId, PartitionBuffer>,
    flushed: HashSet<PartitionId>,
    max_buffer_size: usize,
}

impl LocalPartitionWriter {
    /// Creates a writer placing partition files under `dir`.
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            buffers: HashMap::new(),
            flushed: HashSet::new(),
            max_buffer_size: DEFAULT_WRITE_MAX_BUFFER_SIZE,
        }
    }

    /// Overrides the per-partition buffer bound.
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size.max(1);
        self
    }

    /// Applies the configured buffer bound.
    pub fn with_config(self, config: &RangePartConfig) -> Self {
        self.with_max_buffer_size(config.write_max_buffer_size())
    }

    async fn flush_buffer(&mut self, partition_id: PartitionId, append: bool) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(&partition_id) else {
            return Ok(());
        };
        if buffer.is_empty() {
            return Ok(());
        }
        // once this writer has flushed a partition, later flushes must
        // append or they would discard records it already wrote
        let append = append || self.flushed.contains(&partition_id);
        let path = partition_path(&self.dir, partition_id);
        if let Some(parent) = std::path::Path::new(&path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(append)
            .truncate(!append)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| {
                RangePartError::StoreError(path.clone(), partition_id, e.to_string())
            })?;
        tokio::io::AsyncWriteExt::write_all(&mut file, buffer.bytes())
            .await
            .map_err(|e| {
                RangePartError::StoreError(path.clone(), partition_id, e.to_string())
            })?;
        buffer.reset();
        self.flushed.insert(partition_id);
        Ok(())
    }
}

#[async_trait]
impl PartitionWriter for LocalPartitionWriter {
    async fn write(&mut self, partition_id: PartitionId, record: &[u8]) -> Result<()> {
        let full = self
            .buffers
            .get(&partition_id)
            .is_some_and(|b| b.offset() + record.len() > self.max_buffer_size);
        if full {
            self.flush_buffer(partition_id, true).await?;
        }
        self.buffers
            .entry(partition_id)
            .or_insert_with(|| PartitionBuffer::new(partition_id))
            .append(record);
        Ok(())
    }

    async fn flush(&mut self, partition_id: PartitionId, append: bool) -> Result<()> {
        self.flush_buffer(partition_id, append).await
    }

    async fn flush_all(&mut self, append: bool) -> Result<()> {
        let mut ids: Vec<PartitionId> = self.buffers.keys().copied().collect();
        ids.sort_unstable();
        for partition_id in ids {
            self.flush_buffer(partition_id, append).await?;
        }
        Ok(())
    }

    fn partition_dir(&self) -> &str {
        &self.dir
    }

    fn clone_for_dir(&self, dir: &str) -> Box<dyn PartitionWriter> {
        Box::new(Self::new(dir).with_max_buffer_size(self.max_buffer_size))
    }
}
