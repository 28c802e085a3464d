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

//! Distributed routing of records through a compute engine.
//!
//! Once an index tree is built, routing the full dataset is embarrassingly
//! parallel: the tree is serialized, shipped to workers alongside a slice
//! of the input files, and every worker routes its slice independently,
//! appending to the shared partition files under the partition locks.
//! [LocalComputeEngine] runs the same task graph on the local task pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use crate::error::{RangePartError, Result};
use crate::key::KeyCodec;
use crate::lock::LockProvider;
use crate::sampler::RecordScanner;
use crate::store::writer::{PartitionWriter, StorePartitionWriter};
use crate::store::FileStore;
use crate::tree::{self, IndexTree, PartitionId};

/// Self-contained description of one routing job.
///
/// Everything a worker needs travels in the task: the serialized tree, the
/// key codec parameters and the file lists. The task carries no live
/// handles so it can cross a process boundary.
#[derive(Debug, Clone)]
pub struct RoutingTask {
    /// Serialized index tree all workers route with.
    pub tree: Vec<u8>,
    /// Key extraction parameters.
    pub codec: KeyCodec,
    /// Input record files to route.
    pub input_files: Vec<String>,
    /// Directory the partition files are written under.
    pub output_dir: String,
    /// Whether flushes append to existing partition files.
    pub append: bool,
}

/// Per-partition outcome of a routing task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionWriteStats {
    /// Destination partition.
    pub partition_id: PartitionId,
    /// Records routed to it.
    pub records: u64,
}

/// Executes routing tasks, locally or on a cluster.
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    /// Runs the task to completion and reports per-partition counts.
    async fn run(&self, task: RoutingTask) -> Result<Vec<PartitionWriteStats>>;
}

/// [ComputeEngine] that fans input files out over local async tasks.
///
/// Each worker task owns its own writer; correctness of the interleaved
/// appends rests on the per-partition locks, exactly as it would across
/// hosts.
pub struct LocalComputeEngine {
    store: Arc<dyn FileStore>,
    locks: Arc<dyn LockProvider>,
    parallelism: usize,
    chunk_size: usize,
    max_buffer_size: usize,
}

impl LocalComputeEngine {
    /// Creates an engine running at most `parallelism` concurrent workers.
    pub fn new(
        store: Arc<dyn FileStore>,
        locks: Arc<dyn LockProvider>,
        parallelism: usize,
    ) -> Self {
        Self {
            store,
            locks,
            parallelism: parallelism.max(1),
            chunk_size: crate::config::DEFAULT_STORAGE_READ_MAX_CHUNK_SIZE,
            max_buffer_size: crate::config::DEFAULT_WRITE_MAX_BUFFER_SIZE,
        }
    }

    /// Overrides the scan chunk size used by workers.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Overrides the per-partition write buffer bound used by workers.
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size.max(1);
        self
    }

    /// Applies the configured scan chunk size and write buffer bound.
    pub fn with_config(self, config: &crate::config::RangePartConfig) -> Self {
        self.with_chunk_size(config.read_max_chunk_size())
            .with_max_buffer_size(config.write_max_buffer_size())
    }

    async fn route_files(
        store: Arc<dyn FileStore>,
        locks: Arc<dyn LockProvider>,
        task: Arc<RoutingTask>,
        files: Vec<String>,
        chunk_size: usize,
        max_buffer_size: usize,
    ) -> Result<HashMap<PartitionId, u64>> {
        let tree = tree::deserialize(&task.tree)?;
        let mut writer = StorePartitionWriter::new(
            task.output_dir.clone(),
            store.clone(),
            locks,
        )
        .with_max_buffer_size(max_buffer_size);
        let mut counts: HashMap<PartitionId, u64> = HashMap::new();
        for file in &files {
            let mut scanner =
                RecordScanner::open_full(store.as_ref(), file, chunk_size).await?;
            while let Some(record) = scanner.next_record().await? {
                let key = task.codec.extract(&record)?;
                let partition_id = tree.route(&key)?;
                writer.write(partition_id, &record).await?;
                *counts.entry(partition_id).or_insert(0) += 1;
            }
        }
        writer.flush_all(task.append).await?;
        Ok(counts)
    }
}

#[async_trait]
impl ComputeEngine for LocalComputeEngine {
    async fn run(&self, task: RoutingTask) -> Result<Vec<PartitionWriteStats>> {
        if task.input_files.is_empty() {
            return Ok(Vec::new());
        }
        // validate the tree before spawning anything
        tree::deserialize(&task.tree)?;

        let workers = self.parallelism.min(task.input_files.len());
        info!(
            "routing {} input files into {} on {workers} local workers",
            task.input_files.len(),
            task.output_dir
        );
        let mut slices: Vec<Vec<String>> = vec![Vec::new(); workers];
        for (i, file) in task.input_files.iter().enumerate() {
            slices[i % workers].push(file.clone());
        }

        let task = Arc::new(task);
        let mut handles = Vec::with_capacity(workers);
        for files in slices {
            handles.push(tokio::spawn(Self::route_files(
                self.store.clone(),
                self.locks.clone(),
                task.clone(),
                files,
                self.chunk_size,
                self.max_buffer_size,
            )));
        }

        let mut totals: HashMap<PartitionId, u64> = HashMap::new();
        for joined in futures::future::join_all(handles).await {
            let counts = joined
                .map_err(|e| RangePartError::General(format!("worker panicked: {e}")))??;
            for (partition_id, records) in counts {
                *totals.entry(partition_id).or_insert(0) += records;
            }
        }
        let mut stats: Vec<PartitionWriteStats> = totals
            .into_iter()
            .map(|(partition_id, records)| PartitionWriteStats {
                partition_id,
                records,
            })
            .collect();
        stats.sort_by_key(|s| s.partition_id);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, KeyType};
    use crate::lock::InMemoryLockProvider;
    use crate::store::{partition_path, LocalFileStore};
    use crate::tree::median::MedianTree;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_engine_routes_all_records() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());

        // four input files of 100 records each
        let mut inputs = Vec::new();
        for f in 0..4i64 {
            let path = dir
                .path()
                .join(format!("in-{f}"))
                .to_string_lossy()
                .to_string();
            let mut data = Vec::new();
            for i in 0..100i64 {
                data.extend_from_slice(format!("{}|row\n", f * 100 + i).as_bytes());
            }
            store.create(&path, &data, 1).await?;
            inputs.push(path);
        }

        let mut index = MedianTree::try_new(4)?;
        index.build((0..400).map(Key::Long).collect())?;
        let output_dir = dir.path().join("out").to_string_lossy().to_string();
        let task = RoutingTask {
            tree: index.serialize()?,
            codec: KeyCodec::new(b'|', 0, KeyType::Long),
            input_files: inputs,
            output_dir: output_dir.clone(),
            append: true,
        };

        // workers pick up the configured scan and buffer bounds
        let mut settings = HashMap::new();
        settings.insert(
            crate::config::RANGEPART_READ_MAX_CHUNK_SIZE.to_string(),
            "64".to_string(),
        );
        settings.insert(
            crate::config::RANGEPART_WRITE_MAX_BUFFER_SIZE.to_string(),
            "128".to_string(),
        );
        let config = crate::config::RangePartConfig::with_settings(settings)?;
        let engine = LocalComputeEngine::new(
            store.clone(),
            Arc::new(InMemoryLockProvider::new()),
            3,
        )
        .with_config(&config);
        let stats = engine.run(task).await?;

        assert_eq!(400u64, stats.iter().map(|s| s.records).sum());
        for stat in &stats {
            let path = partition_path(&output_dir, stat.partition_id);
            let bytes = store.read_range(&path, 0, 1 << 20).await?;
            let lines = bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty());
            assert_eq!(stat.records, lines.count() as u64);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_tree_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = LocalComputeEngine::new(
            Arc::new(LocalFileStore::new()),
            Arc::new(InMemoryLockProvider::new()),
            2,
        );
        let task = RoutingTask {
            tree: b"garbage".to_vec(),
            codec: KeyCodec::new(b'|', 0, KeyType::Long),
            input_files: vec![dir.path().join("x").to_string_lossy().to_string()],
            output_dir: dir.path().to_string_lossy().to_string(),
            append: true,
        };
        assert!(engine.run(task).await.is_err());
    }
}
