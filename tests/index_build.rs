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

//! End-to-end index build tests over the local file store.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use rangepart::builder::IndexBuilder;
use rangepart::cluster::LocalComputeEngine;
use rangepart::error::Result;
use rangepart::key::{Key, KeyCodec, KeyType};
use rangepart::lock::InMemoryLockProvider;
use rangepart::sampler::RecordScanner;
use rangepart::store::partition::Partition;
use rangepart::store::writer::StorePartitionWriter;
use rangepart::store::{FileStore, LocalFileStore};
use rangepart::tree::median::MedianTree;
use rangepart::tree::robust::RobustTree;
use rangepart::tree::{deserialize, IndexTree};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn codec() -> KeyCodec {
    KeyCodec::new(b'|', 0, KeyType::Long)
}

async fn write_input(
    store: &dyn FileStore,
    dir: &TempDir,
    name: &str,
    keys: &[i64],
) -> String {
    let path = dir.path().join(name).to_string_lossy().to_string();
    let mut data = Vec::new();
    for k in keys {
        data.extend_from_slice(format!("{k}|payload-{k}\n").as_bytes());
    }
    store.create(&path, &data, 1).await.unwrap();
    path
}

async fn count_partition_records(
    store: Arc<dyn FileStore>,
    locks: Arc<InMemoryLockProvider>,
    dir: &str,
    partition_id: usize,
) -> Result<u64> {
    let mut partition = Partition::new(dir, partition_id, store, locks)
        .with_max_chunk_size(256);
    partition.open_for_read().await?;
    let mut records = 0u64;
    while let Some(chunk) = partition.next_chunk().await? {
        records += chunk.iter().filter(|b| **b == b'\n').count() as u64;
    }
    Ok(records)
}

#[tokio::test]
async fn full_build_balances_partitions() -> Result<()> {
    init_logging();
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
    let locks = Arc::new(InMemoryLockProvider::new());
    let keys: Vec<i64> = (1..=1000).collect();
    let input = write_input(store.as_ref(), &dir, "input", &keys).await;
    let out = dir.path().join("out").to_string_lossy().to_string();

    let builder = IndexBuilder::new(store.clone()).with_chunk_size(512);
    let mut tree = MedianTree::try_new(4)?;
    let mut writer =
        StorePartitionWriter::new(out.clone(), store.clone(), locks.clone())
            .with_max_buffer_size(1024);
    let summary = builder
        .build(&[input], 1.0, &mut tree, &codec(), &mut writer)
        .await?;

    assert_eq!(1000, summary.sample_size);
    assert_eq!(1000, summary.records_routed);
    assert_eq!(4, summary.partition_records.len());

    // a uniform sample at rate 1.0 must split close to evenly
    let mut total = 0u64;
    for partition_id in 0..4 {
        let records =
            count_partition_records(store.clone(), locks.clone(), &out, partition_id)
                .await?;
        assert!(
            (200..=300).contains(&records),
            "partition {partition_id} holds {records} records"
        );
        assert_eq!(summary.partition_records[&partition_id], records);
        total += records;
    }
    assert_eq!(1000, total);
    Ok(())
}

#[tokio::test]
async fn routed_records_agree_with_persisted_tree() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
    let locks = Arc::new(InMemoryLockProvider::new());
    let keys: Vec<i64> = (0..300).map(|i| (i * 37) % 1000).collect();
    let input = write_input(store.as_ref(), &dir, "input", &keys).await;
    let out = dir.path().join("out").to_string_lossy().to_string();

    let builder = IndexBuilder::new(store.clone()).with_chunk_size(128);
    let mut tree = RobustTree::try_new(3)?;
    let mut writer = StorePartitionWriter::new(out.clone(), store.clone(), locks);
    builder
        .build(&[input], 1.0, &mut tree, &codec(), &mut writer)
        .await?;

    // every record in partition p must route to p under the persisted tree
    let restored = builder.load_tree(&out).await?;
    for partition_id in 0..3 {
        let path = format!("{out}/{partition_id}");
        let mut scanner = RecordScanner::open_full(store.as_ref(), &path, 64).await?;
        while let Some(record) = scanner.next_record().await? {
            let key = codec().extract(&record)?;
            assert_eq!(partition_id, restored.route(&key)?);
        }
    }
    Ok(())
}

#[tokio::test]
async fn serialized_tree_roundtrips_many_keys() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let sample: Vec<Key> = (0..10_000)
        .map(|_| Key::Long(rng.gen_range(-1_000_000..1_000_000)))
        .collect();
    let mut tree = RobustTree::try_new(16)?;
    tree.build(sample)?;

    let bytes = tree.serialize()?;
    let restored = deserialize(&bytes)?;
    assert_eq!(bytes, restored.serialize()?);
    for _ in 0..10_000 {
        let key = Key::Long(rng.gen_range(-2_000_000..2_000_000));
        assert_eq!(tree.route(&key)?, restored.route(&key)?);
    }
    Ok(())
}

#[tokio::test]
async fn block_sampling_build_routes_everything() -> Result<()> {
    init_logging();
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
    let locks = Arc::new(InMemoryLockProvider::new());
    let keys: Vec<i64> = (0..2000).collect();
    let input = write_input(store.as_ref(), &dir, "input", &keys).await;
    let out = dir.path().join("out").to_string_lossy().to_string();

    let builder = IndexBuilder::new(store.clone()).with_chunk_size(256);
    let mut tree = RobustTree::try_new(4)?;
    let mut writer = StorePartitionWriter::new(out.clone(), store.clone(), locks);
    // the input is far below one block, so block sampling degenerates to a
    // full scan; the point is the end-to-end path
    let summary = builder
        .build_with_block_sampling(&[input], 0.5, 1, 0.5, &mut tree, &codec(), &mut writer)
        .await?;

    assert!(summary.sample_size > 0);
    assert_eq!(2000, summary.records_routed);
    Ok(())
}

#[tokio::test]
async fn cluster_build_matches_single_writer_counts() -> Result<()> {
    init_logging();
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
    let locks = Arc::new(InMemoryLockProvider::new());

    let mut inputs = Vec::new();
    for f in 0..5i64 {
        let keys: Vec<i64> = (0..200).map(|i| f * 200 + i).collect();
        inputs.push(
            write_input(store.as_ref(), &dir, &format!("in-{f}"), &keys).await,
        );
    }
    let out = dir.path().join("out").to_string_lossy().to_string();

    let builder = IndexBuilder::new(store.clone()).with_chunk_size(256);
    let mut tree = MedianTree::try_new(8)?;
    let engine = LocalComputeEngine::new(store.clone(), locks.clone(), 4)
        .with_chunk_size(256)
        .with_max_buffer_size(512);
    let summary = builder
        .build_with_cluster(&inputs, 1.0, &mut tree, &codec(), &out, &engine)
        .await?;

    assert_eq!(1000, summary.sample_size);
    assert_eq!(1000, summary.records_routed);
    let mut total = 0u64;
    for partition_id in 0..8 {
        total += count_partition_records(store.clone(), locks.clone(), &out, partition_id)
            .await?;
    }
    assert_eq!(1000, total);
    Ok(())
}
