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

//! Concurrency and failure-path tests for lock-guarded partition flushes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use rangepart::error::{RangePartError, Result};
use rangepart::lock::{InMemoryLockProvider, LockProvider};
use rangepart::store::partition::Partition;
use rangepart::store::{lock_name, FileStore, LocalFileStore};

/// Store wrapper that fails the first `failures` append calls.
struct FlakyStore {
    inner: LocalFileStore,
    remaining_failures: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: LocalFileStore::new(),
            remaining_failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl FileStore for FlakyStore {
    async fn size(&self, path: &str) -> Result<u64> {
        self.inner.size(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.inner.read_range(path, offset, len).await
    }

    async fn create(&self, path: &str, data: &[u8], replication: u16) -> Result<()> {
        self.inner.create(path, data, replication).await
    }

    async fn append(&self, path: &str, data: &[u8]) -> Result<()> {
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RangePartError::General(
                "injected append failure".to_string(),
            ));
        }
        self.inner.append(path, data).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path).await
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        self.inner.list(dir).await
    }
}

#[tokio::test]
async fn concurrent_writers_interleave_without_loss() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_string_lossy().to_string();
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
    let locks = Arc::new(InMemoryLockProvider::new());

    let template = Partition::new(dir_path.clone(), 0, store.clone(), locks.clone());
    let mut handles = Vec::new();
    for writer in 0..8i64 {
        let mut partition = template.clone_fresh();
        handles.push(tokio::spawn(async move {
            for i in 0..50i64 {
                partition.write(format!("{}|w{writer}", writer * 50 + i).as_bytes());
                // flush every 10 records so appends interleave
                if i % 10 == 9 {
                    partition.store(true).await?;
                }
            }
            partition.store(true).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    // every record arrived intact, exactly once
    let mut partition = template.clone_fresh().with_max_chunk_size(4096);
    partition.open_for_read().await?;
    let mut seen = Vec::new();
    while let Some(chunk) = partition.next_chunk().await? {
        for line in chunk.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            let text = std::str::from_utf8(line).unwrap();
            let (id, _) = text.split_once('|').unwrap();
            seen.push(id.parse::<i64>().unwrap());
        }
    }
    seen.sort_unstable();
    assert_eq!((0..400).collect::<Vec<i64>>(), seen);
    Ok(())
}

#[tokio::test]
async fn concurrent_writers_survive_injected_failures() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_string_lossy().to_string();
    let store: Arc<dyn FileStore> = Arc::new(FlakyStore::new(5));
    let locks = Arc::new(InMemoryLockProvider::new());

    let template = Partition::new(dir_path.clone(), 0, store.clone(), locks.clone());
    let mut handles = Vec::new();
    for writer in 0..8i64 {
        let mut partition = template.clone_fresh();
        handles.push(tokio::spawn(async move {
            for i in 0..50i64 {
                partition.write(format!("{}|w{writer}", writer * 50 + i).as_bytes());
                // a failed flush keeps the buffer, so retrying loses nothing
                if i % 10 == 9 {
                    let mut attempts = 0;
                    while partition.store(true).await.is_err() {
                        attempts += 1;
                        assert!(attempts < 10, "flush kept failing");
                    }
                }
            }
            Result::Ok(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    // every record arrived intact, exactly once, despite the failures
    let mut partition = template.clone_fresh().with_max_chunk_size(4096);
    partition.open_for_read().await?;
    let mut seen = Vec::new();
    while let Some(chunk) = partition.next_chunk().await? {
        for line in chunk.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            let text = std::str::from_utf8(line).unwrap();
            let (id, payload) = text.split_once('|').unwrap();
            assert!(payload.starts_with('w'), "malformed record {text:?}");
            seen.push(id.parse::<i64>().unwrap());
        }
    }
    seen.sort_unstable();
    assert_eq!((0..400).collect::<Vec<i64>>(), seen);

    // no failure path left the partition lock held
    let lease = tokio::time::timeout(
        Duration::from_secs(1),
        locks.acquire(&lock_name(&dir_path, 0)),
    )
    .await
    .expect("lock still held after failed flush")?;
    drop(lease);
    Ok(())
}

#[tokio::test]
async fn failed_flush_keeps_buffer_and_releases_lock() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_string_lossy().to_string();
    let store = Arc::new(FlakyStore::new(1));
    let locks = Arc::new(InMemoryLockProvider::new());

    let mut partition =
        Partition::new(dir_path.clone(), 0, store.clone(), locks.clone());
    partition.write(b"1|a");
    partition.store(true).await?;

    // the injected failure surfaces as a store error and the buffer is kept
    partition.write(b"2|b");
    let result = partition.store(true).await;
    assert!(matches!(result, Err(RangePartError::StoreError(_, 0, _))));
    assert_eq!(1, partition.buffered_records());

    // the lock was released on the failure path
    let lease = tokio::time::timeout(
        Duration::from_secs(1),
        locks.acquire(&lock_name(&dir_path, 0)),
    )
    .await
    .expect("lock still held after failed flush")?;
    drop(lease);

    // retry succeeds and drains the buffer
    partition.store(true).await?;
    assert_eq!(0, partition.buffered_records());

    partition.open_for_read().await?;
    let chunk = partition.next_chunk().await?.expect("partition content");
    assert_eq!(b"1|a\n2|b\n".to_vec(), chunk);
    Ok(())
}

#[tokio::test]
async fn writers_to_distinct_partitions_do_not_serialize() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let dir_path = dir.path().to_string_lossy().to_string();
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
    let locks = Arc::new(InMemoryLockProvider::new());

    // hold partition 0's lock while flushing partition 1
    let _lease = locks.acquire(&lock_name(&dir_path, 0)).await?;
    let mut partition = Partition::new(dir_path, 1, store, locks.clone());
    partition.write(b"1|a");
    tokio::time::timeout(Duration::from_secs(1), partition.store(true))
        .await
        .expect("unrelated partition lock blocked the flush")?;
    Ok(())
}
