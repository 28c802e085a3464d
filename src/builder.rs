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

//! End-to-end index builds: sample, build the tree, route every record,
//! flush.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;

use crate::cluster::{ComputeEngine, RoutingTask};
use crate::config::RangePartConfig;
use crate::error::{RangePartError, Result};
use crate::key::KeyCodec;
use crate::sampler::{RecordScanner, Sampler};
use crate::store::writer::PartitionWriter;
use crate::store::FileStore;
use crate::tree::{IndexTree, PartitionId};

/// File name the serialized index tree is persisted under, next to the
/// partition files.
pub const INDEX_FILE_NAME: &str = "index";

/// Phases of an index build, logged as the build progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Drawing the key sample from the input files.
    Sampling,
    /// Building the index tree from the sample.
    BuildingTree,
    /// Routing every input record to its partition.
    Routing,
    /// Flushing the remaining partition buffers.
    Flushing,
    /// Build complete.
    Done,
}

/// Outcome of a completed build.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Keys in the sample the tree was built from.
    pub sample_size: usize,
    /// Total records routed.
    pub records_routed: u64,
    /// Records per destination partition.
    pub partition_records: HashMap<PartitionId, u64>,
}

/// One replica of a replicated build: its own tree, key attribute and
/// output writer.
pub struct ReplicaBuild<'a> {
    /// Tree partitioning this replica; built by the builder.
    pub tree: &'a mut dyn IndexTree,
    /// Key extraction for this replica's partitioning attribute.
    pub codec: KeyCodec,
    /// Writer for this replica's partition files.
    pub writer: &'a mut dyn PartitionWriter,
}

/// Drives full index builds over a [FileStore].
pub struct IndexBuilder {
    store: Arc<dyn FileStore>,
    config: RangePartConfig,
    chunk_size: usize,
}

impl IndexBuilder {
    /// Creates a builder reading and writing through the given store.
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        let config = RangePartConfig::default();
        let chunk_size = config.read_max_chunk_size();
        Self {
            store,
            config,
            chunk_size,
        }
    }

    /// Overrides the scan chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Applies a configuration: scan chunk size now, sampling parameters
    /// and replication when the build runs.
    pub fn with_config(mut self, config: &RangePartConfig) -> Self {
        self.chunk_size = config.read_max_chunk_size().max(1);
        self.config = config.clone();
        self
    }

    fn stage(stage: BuildStage) {
        info!("index build stage: {stage:?}");
    }

    fn sampler(&self) -> Sampler {
        Sampler::new(self.store.clone()).with_chunk_size(self.chunk_size)
    }

    /// Persists the serialized tree next to the partition files so readers
    /// and later distributed builds can load it.
    pub async fn persist_tree(&self, dir: &str, tree: &dyn IndexTree) -> Result<()> {
        let path = format!("{}/{INDEX_FILE_NAME}", dir.trim_end_matches('/'));
        self.store
            .create(&path, &tree.serialize()?, self.config.storage_replication())
            .await
    }

    /// Loads a previously persisted tree from a partition directory.
    pub async fn load_tree(&self, dir: &str) -> Result<Box<dyn IndexTree>> {
        let path = format!("{}/{INDEX_FILE_NAME}", dir.trim_end_matches('/'));
        let size = self.store.size(&path).await?;
        let bytes = self.store.read_range(&path, 0, size as usize).await?;
        crate::tree::deserialize(&bytes)
    }

    /// Builds an index over the inputs, sampling every record at `rate`.
    ///
    /// Samples keys, builds `tree` from the sample, routes every input
    /// record through it into `writer`, flushes with append semantics and
    /// persists the tree alongside the partitions.
    pub async fn build(
        &self,
        inputs: &[String],
        rate: f64,
        tree: &mut dyn IndexTree,
        codec: &KeyCodec,
        writer: &mut dyn PartitionWriter,
    ) -> Result<BuildSummary> {
        Self::stage(BuildStage::Sampling);
        let sample = self.sampler().sample_paths(inputs, rate, codec).await?;
        self.finish_build(inputs, sample, tree, codec, writer).await
    }

    /// Builds an index sampling at the configured rate.
    ///
    /// Like [IndexBuilder::build] with the sampling rate taken from the
    /// builder's configuration.
    pub async fn build_with_defaults(
        &self,
        inputs: &[String],
        tree: &mut dyn IndexTree,
        codec: &KeyCodec,
        writer: &mut dyn PartitionWriter,
    ) -> Result<BuildSummary> {
        self.build(inputs, self.config.sampling_rate(), tree, codec, writer)
            .await
    }

    /// Builds an index sampling only a random fraction of storage blocks.
    ///
    /// Preferred over [IndexBuilder::build] for datasets too large to scan
    /// in full during sampling; the routing pass still visits every record.
    pub async fn build_with_block_sampling(
        &self,
        inputs: &[String],
        rate: f64,
        block_size_mb: u64,
        block_fraction: f64,
        tree: &mut dyn IndexTree,
        codec: &KeyCodec,
        writer: &mut dyn PartitionWriter,
    ) -> Result<BuildSummary> {
        Self::stage(BuildStage::Sampling);
        let sampler = self.sampler();
        let mut sample = Vec::new();
        for input in inputs {
            sample.extend(
                sampler
                    .sample_blocks(input, rate, block_size_mb, block_fraction, codec)
                    .await?,
            );
        }
        self.finish_build(inputs, sample, tree, codec, writer).await
    }

    /// Block-sampling build with every sampling parameter taken from the
    /// builder's configuration.
    pub async fn build_with_block_sampling_defaults(
        &self,
        inputs: &[String],
        tree: &mut dyn IndexTree,
        codec: &KeyCodec,
        writer: &mut dyn PartitionWriter,
    ) -> Result<BuildSummary> {
        self.build_with_block_sampling(
            inputs,
            self.config.sampling_rate(),
            self.config.sampling_block_size_mb(),
            self.config.sampling_block_fraction(),
            tree,
            codec,
            writer,
        )
        .await
    }

    /// Builds one index over every file in a directory, block-sampling each
    /// file and merging the samples before the tree build.
    pub async fn build_with_block_sampling_dir(
        &self,
        input_dir: &str,
        rate: f64,
        block_size_mb: u64,
        block_fraction: f64,
        tree: &mut dyn IndexTree,
        codec: &KeyCodec,
        writer: &mut dyn PartitionWriter,
    ) -> Result<BuildSummary> {
        Self::stage(BuildStage::Sampling);
        let inputs = self.store.list(input_dir).await?;
        if inputs.is_empty() {
            return Err(RangePartError::BuildError(format!(
                "input directory {input_dir} holds no record files"
            )));
        }
        let sample = self
            .sampler()
            .sample_blocks_dir(input_dir, rate, block_size_mb, block_fraction, codec)
            .await?;
        self.finish_build(&inputs, sample, tree, codec, writer).await
    }

    /// Routes the inputs through an already-built tree.
    ///
    /// Used by workers joining a distributed build after the coordinator
    /// has built and shared the tree.
    pub async fn build_from_index(
        &self,
        inputs: &[String],
        tree: &dyn IndexTree,
        codec: &KeyCodec,
        writer: &mut dyn PartitionWriter,
    ) -> Result<BuildSummary> {
        let mut summary = BuildSummary::default();
        self.route_inputs(inputs, tree, codec, writer, &mut summary)
            .await?;
        Self::stage(BuildStage::Flushing);
        writer.flush_all(true).await?;
        Self::stage(BuildStage::Done);
        Ok(summary)
    }

    /// Builds several replicas of the dataset in one pass, each partitioned
    /// on its own attribute.
    ///
    /// One record sample feeds every replica's tree; the routing pass then
    /// writes each record once per replica.
    pub async fn build_replicated(
        &self,
        inputs: &[String],
        rate: f64,
        replicas: &mut [ReplicaBuild<'_>],
    ) -> Result<Vec<BuildSummary>> {
        if replicas.is_empty() {
            return Err(RangePartError::BuildError(
                "replicated build needs at least one replica".to_string(),
            ));
        }
        Self::stage(BuildStage::Sampling);
        let records = self.sampler().sample_records(inputs, rate).await?;

        Self::stage(BuildStage::BuildingTree);
        let mut summaries = Vec::with_capacity(replicas.len());
        for replica in replicas.iter_mut() {
            let keys = records
                .iter()
                .map(|r| replica.codec.extract(r))
                .collect::<Result<Vec<_>>>()?;
            let sample_size = keys.len();
            replica.tree.build(keys)?;
            summaries.push(BuildSummary {
                sample_size,
                ..Default::default()
            });
        }

        Self::stage(BuildStage::Routing);
        for input in inputs {
            let mut scanner =
                RecordScanner::open_full(self.store.as_ref(), input, self.chunk_size)
                    .await?;
            while let Some(record) = scanner.next_record().await? {
                for (replica, summary) in replicas.iter_mut().zip(summaries.iter_mut()) {
                    let key = replica.codec.extract(&record)?;
                    let partition_id = replica.tree.route(&key)?;
                    replica.writer.write(partition_id, &record).await?;
                    summary.records_routed += 1;
                    *summary.partition_records.entry(partition_id).or_insert(0) += 1;
                }
            }
        }

        Self::stage(BuildStage::Flushing);
        for replica in replicas.iter_mut() {
            replica.writer.flush_all(true).await?;
            let dir = replica.writer.partition_dir().to_string();
            self.persist_tree(&dir, replica.tree).await?;
        }
        Self::stage(BuildStage::Done);
        Ok(summaries)
    }

    /// Builds the tree locally, then routes through a compute engine.
    ///
    /// The tree is serialized into the task so remote workers route with
    /// bit-identical boundaries.
    pub async fn build_with_cluster(
        &self,
        inputs: &[String],
        rate: f64,
        tree: &mut dyn IndexTree,
        codec: &KeyCodec,
        output_dir: &str,
        engine: &dyn ComputeEngine,
    ) -> Result<BuildSummary> {
        Self::stage(BuildStage::Sampling);
        let sample = self.sampler().sample_paths(inputs, rate, codec).await?;
        let sample_size = sample.len();

        Self::stage(BuildStage::BuildingTree);
        tree.build(sample)?;
        self.persist_tree(output_dir, tree).await?;

        Self::stage(BuildStage::Routing);
        let stats = engine
            .run(RoutingTask {
                tree: tree.serialize()?,
                codec: codec.clone(),
                input_files: inputs.to_vec(),
                output_dir: output_dir.to_string(),
                append: true,
            })
            .await?;

        Self::stage(BuildStage::Done);
        let mut summary = BuildSummary {
            sample_size,
            ..Default::default()
        };
        for stat in stats {
            summary.records_routed += stat.records;
            summary
                .partition_records
                .insert(stat.partition_id, stat.records);
        }
        Ok(summary)
    }

    async fn finish_build(
        &self,
        inputs: &[String],
        sample: Vec<crate::key::Key>,
        tree: &mut dyn IndexTree,
        codec: &KeyCodec,
        writer: &mut dyn PartitionWriter,
    ) -> Result<BuildSummary> {
        Self::stage(BuildStage::BuildingTree);
        let mut summary = BuildSummary {
            sample_size: sample.len(),
            ..Default::default()
        };
        tree.build(sample)?;

        self.route_inputs(inputs, tree, codec, writer, &mut summary)
            .await?;

        Self::stage(BuildStage::Flushing);
        writer.flush_all(true).await?;
        let dir = writer.partition_dir().to_string();
        self.persist_tree(&dir, tree).await?;
        Self::stage(BuildStage::Done);
        info!(
            "index build complete: {} records over {} partitions",
            summary.records_routed,
            summary.partition_records.len()
        );
        Ok(summary)
    }

    async fn route_inputs(
        &self,
        inputs: &[String],
        tree: &dyn IndexTree,
        codec: &KeyCodec,
        writer: &mut dyn PartitionWriter,
        summary: &mut BuildSummary,
    ) -> Result<()> {
        Self::stage(BuildStage::Routing);
        for input in inputs {
            let mut scanner =
                RecordScanner::open_full(self.store.as_ref(), input, self.chunk_size)
                    .await?;
            while let Some(record) = scanner.next_record().await? {
                let key = codec.extract(&record)?;
                let partition_id = tree.route(&key)?;
                writer.write(partition_id, &record).await?;
                summary.records_routed += 1;
                *summary.partition_records.entry(partition_id).or_insert(0) += 1;
            }
        }
        Ok(())
    }
}
