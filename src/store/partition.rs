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

//! One physical partition file: buffered writes flushed under a
//! distributed lock, and bounded-memory chunked reads.

use std::sync::Arc;

use log::debug;

use crate::config::{
    RangePartConfig, DEFAULT_REPLICATION, DEFAULT_STORAGE_READ_MAX_CHUNK_SIZE,
};
use crate::error::{RangePartError, Result};
use crate::lock::LockProvider;
use crate::store::buffer::PartitionBuffer;
use crate::store::{lock_name, partition_path, FileStore};
use crate::tree::PartitionId;

/// Write lifecycle of a partition handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// No records written through this handle yet.
    New,
    /// Records buffered but not yet durably stored.
    Populated,
    /// All buffered records flushed to the file store.
    Flushed,
}

/// Handle on one partition file.
///
/// Writes accumulate in an in-memory buffer until [Partition::store] flushes
/// them under the partition's named lock. Reads stream the file in chunks of
/// at most `max_chunk_size` bytes so a partition of any size can be scanned
/// with bounded memory.
pub struct Partition {
    dir: String,
    path: String,
    partition_id: PartitionId,
    state: PartitionState,
    buffer: PartitionBuffer,
    replication: u16,
    max_chunk_size: usize,
    store: Arc<dyn FileStore>,
    locks: Arc<dyn LockProvider>,
    total_size: u64,
    read_size: u64,
    returned_size: u64,
    current: Option<Vec<u8>>,
    stale_size: bool,
}

impl Partition {
    /// Creates a handle on partition `partition_id` under `dir`.
    pub fn new(
        dir: impl Into<String>,
        partition_id: PartitionId,
        store: Arc<dyn FileStore>,
        locks: Arc<dyn LockProvider>,
    ) -> Self {
        let dir = dir.into();
        let path = partition_path(&dir, partition_id);
        Self {
            dir,
            path,
            partition_id,
            state: PartitionState::New,
            buffer: PartitionBuffer::new(partition_id),
            replication: DEFAULT_REPLICATION,
            max_chunk_size: DEFAULT_STORAGE_READ_MAX_CHUNK_SIZE,
            store,
            locks,
            total_size: 0,
            read_size: 0,
            returned_size: 0,
            current: None,
            stale_size: false,
        }
    }

    /// Overrides the replication factor requested on create.
    pub fn with_replication(mut self, replication: u16) -> Self {
        self.replication = replication;
        self
    }

    /// Overrides the maximum bytes fetched per read chunk.
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size.max(1);
        self
    }

    /// Applies the configured replication factor and read chunk size.
    pub fn with_config(self, config: &RangePartConfig) -> Self {
        self.with_replication(config.storage_replication())
            .with_max_chunk_size(config.read_max_chunk_size())
    }

    /// Path of the underlying partition file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Partition id this handle addresses.
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Current write lifecycle state.
    pub fn state(&self) -> PartitionState {
        self.state
    }

    /// Number of records currently buffered.
    pub fn buffered_records(&self) -> u64 {
        self.buffer.record_count()
    }

    /// A fresh handle on the same partition with its own empty buffer and
    /// read cursor, for use by another concurrent writer.
    pub fn clone_fresh(&self) -> Self {
        Self::new(
            self.dir.clone(),
            self.partition_id,
            self.store.clone(),
            self.locks.clone(),
        )
        .with_replication(self.replication)
        .with_max_chunk_size(self.max_chunk_size)
    }

    /// Buffers one record for a later flush.
    pub fn write(&mut self, record: &[u8]) {
        self.buffer.append(record);
        self.state = PartitionState::Populated;
    }

    /// Flushes the buffered records under the partition lock.
    ///
    /// With `append` set the records are appended to an existing file (the
    /// file is created when absent); otherwise the file is replaced. The
    /// buffer is drained only on success, and the lock lease is dropped on
    /// every exit path.
    pub async fn store(&mut self, append: bool) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let lease = self
            .locks
            .acquire(&lock_name(&self.dir, self.partition_id))
            .await?;
        let result = if append && self.store.exists(&self.path).await? {
            self.store.append(&self.path, self.buffer.bytes()).await
        } else {
            self.store
                .create(&self.path, self.buffer.bytes(), self.replication)
                .await
        };
        drop(lease);
        result.map_err(|e| {
            RangePartError::StoreError(self.path.clone(), self.partition_id, e.to_string())
        })?;
        debug!(
            "flushed {} records ({} bytes) to partition {}",
            self.buffer.record_count(),
            self.buffer.offset(),
            self.path
        );
        self.buffer.reset();
        self.state = PartitionState::Flushed;
        Ok(())
    }

    /// Deletes the partition file, taking the partition lock first.
    pub async fn drop_partition(&mut self) -> Result<()> {
        let _lease = self
            .locks
            .acquire(&lock_name(&self.dir, self.partition_id))
            .await?;
        self.store.delete(&self.path).await?;
        self.state = PartitionState::New;
        self.total_size = 0;
        self.read_size = 0;
        self.returned_size = 0;
        self.current = None;
        self.stale_size = false;
        Ok(())
    }

    /// Positions the read cursor at the start of the partition file.
    ///
    /// Fails with `NotFound` if the partition has never been flushed.
    pub async fn open_for_read(&mut self) -> Result<()> {
        self.total_size = self.store.size(&self.path).await?;
        self.read_size = 0;
        self.returned_size = 0;
        self.current = None;
        self.stale_size = false;
        Ok(())
    }

    /// Total size of the partition file as of [Partition::open_for_read].
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes fetched from the store so far this pass.
    pub fn read_size(&self) -> u64 {
        self.read_size
    }

    /// Bytes handed back by [Partition::next_chunk] so far this pass.
    pub fn returned_size(&self) -> u64 {
        self.returned_size
    }

    /// Fetches the next chunk from the store ahead of it being handed
    /// back; `false` once the pass is exhausted.
    ///
    /// Advances only the read cursor; the returned-bytes cursor trails it
    /// until [Partition::get_next_bytes] hands the loaded chunk back. A
    /// no-op when a loaded chunk is already waiting.
    pub async fn load_next(&mut self) -> Result<bool> {
        if self.current.is_some() {
            return Ok(true);
        }
        if self.stale_size {
            // a fresh pass re-resolves the size so records appended since
            // the previous pass are visible
            self.total_size = self.store.size(&self.path).await?;
            self.stale_size = false;
        }
        if self.read_size >= self.total_size {
            return Ok(false);
        }
        let chunk = self
            .store
            .read_range(&self.path, self.read_size, self.max_chunk_size)
            .await?;
        if chunk.is_empty() {
            return Ok(false);
        }
        self.read_size += chunk.len() as u64;
        self.current = Some(chunk);
        Ok(true)
    }

    /// Returns the next not-yet-returned chunk of at most `max_chunk_size`
    /// bytes.
    ///
    /// A full pass yields `ceil(total_size / max_chunk_size)` chunks, all
    /// of `max_chunk_size` bytes except possibly the last. Returns `None`
    /// once the whole file has been returned and rewinds the cursors so a
    /// later pass starts at byte zero with a freshly resolved size. Record
    /// reassembly across chunk boundaries is the reader's concern (see
    /// [crate::sampler::RecordScanner]).
    pub async fn get_next_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.load_next().await? {
            // end of pass: rewind so the next call starts over
            self.read_size = 0;
            self.returned_size = 0;
            self.stale_size = true;
            return Ok(None);
        }
        match self.current.take() {
            Some(chunk) => {
                self.returned_size += chunk.len() as u64;
                Ok(Some(chunk))
            }
            None => Ok(None),
        }
    }

    /// Reads the next chunk of the pass; see [Partition::get_next_bytes].
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        self.get_next_bytes().await
    }
}
