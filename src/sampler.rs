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

//! Key sampling over flat record files.
//!
//! [RecordScanner] streams whole newline-terminated records out of a byte
//! range of a file, fetching fixed-size chunks so memory stays bounded
//! regardless of file size. [Sampler] draws a Bernoulli sample of keys over
//! a full file, or over a random subset of storage blocks when scanning
//! everything is too expensive.

use std::sync::Arc;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{RangePartConfig, DEFAULT_STORAGE_READ_MAX_CHUNK_SIZE};
use crate::error::{RangePartError, Result};
use crate::key::{Key, KeyCodec};
use crate::store::FileStore;

/// Streams whole records from a byte range of a file.
///
/// A record belongs to the range whose bytes contain its first byte, with
/// the usual split convention: a range starting past zero discards the
/// partial record it opens inside, and every range reads one record past
/// its end boundary to finish the record that straddles it. Scanning
/// adjacent ranges therefore yields every record exactly once.
pub struct RecordScanner<'a> {
    store: &'a dyn FileStore,
    path: &'a str,
    chunk_size: usize,
    /// Records starting at offsets `<= end` are returned.
    end: u64,
    file_size: u64,
    /// Offset of the next chunk to fetch.
    pos: u64,
    buf: Vec<u8>,
    buf_pos: usize,
}

impl<'a> RecordScanner<'a> {
    /// Opens a scanner over `[start, end]` of the file.
    ///
    /// Fails with `NotFound` if the file does not exist.
    pub async fn open(
        store: &'a dyn FileStore,
        path: &'a str,
        start: u64,
        end: u64,
        chunk_size: usize,
    ) -> Result<Self> {
        let file_size = store.size(path).await?;
        let mut scanner = Self {
            store,
            path,
            chunk_size: chunk_size.max(1),
            end: end.min(file_size),
            file_size,
            pos: start.min(file_size),
            buf: Vec::new(),
            buf_pos: 0,
        };
        if start > 0 {
            scanner.skip_partial_record().await?;
        }
        Ok(scanner)
    }

    /// Opens a scanner over the whole file.
    pub async fn open_full(
        store: &'a dyn FileStore,
        path: &'a str,
        chunk_size: usize,
    ) -> Result<Self> {
        let size = store.size(path).await?;
        Self::open(store, path, 0, size, chunk_size).await
    }

    /// Ensures the buffer holds unread bytes; false at end of file.
    async fn fill(&mut self) -> Result<bool> {
        if self.buf_pos < self.buf.len() {
            return Ok(true);
        }
        if self.pos >= self.file_size {
            return Ok(false);
        }
        self.buf = self
            .store
            .read_range(self.path, self.pos, self.chunk_size)
            .await?;
        self.pos += self.buf.len() as u64;
        self.buf_pos = 0;
        Ok(!self.buf.is_empty())
    }

    /// Discards bytes up to and including the first newline; the record
    /// they belong to is owned by the preceding range.
    async fn skip_partial_record(&mut self) -> Result<()> {
        loop {
            if !self.fill().await? {
                return Ok(());
            }
            if let Some(i) = self.buf[self.buf_pos..].iter().position(|b| *b == b'\n') {
                self.buf_pos += i + 1;
                return Ok(());
            }
            self.buf_pos = self.buf.len();
        }
    }

    /// Absolute offset of the next unread byte.
    fn offset(&self) -> u64 {
        self.pos - (self.buf.len() - self.buf_pos) as u64
    }

    /// Next record without its trailing newline, or `None` when the range
    /// is exhausted.
    pub async fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.offset() > self.end {
            return Ok(None);
        }
        let mut record = Vec::new();
        loop {
            if !self.fill().await? {
                // final record may lack a trailing newline
                return Ok(if record.is_empty() { None } else { Some(record) });
            }
            if let Some(i) = self.buf[self.buf_pos..].iter().position(|b| *b == b'\n') {
                record.extend_from_slice(&self.buf[self.buf_pos..self.buf_pos + i]);
                self.buf_pos += i + 1;
                return Ok(Some(record));
            }
            record.extend_from_slice(&self.buf[self.buf_pos..]);
            self.buf_pos = self.buf.len();
        }
    }
}

/// Draws key samples from record files on a [FileStore].
pub struct Sampler {
    store: Arc<dyn FileStore>,
    chunk_size: usize,
}

impl Sampler {
    /// Creates a sampler reading through the given store.
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_STORAGE_READ_MAX_CHUNK_SIZE,
        }
    }

    /// Overrides the scan chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Applies the configured scan chunk size.
    pub fn with_config(self, config: &RangePartConfig) -> Self {
        self.with_chunk_size(config.read_max_chunk_size())
    }

    fn validate_rate(rate: f64) -> Result<()> {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(RangePartError::Configuration(format!(
                "sampling rate must be in (0, 1], got {rate}"
            )));
        }
        Ok(())
    }

    /// Samples keys from every record of the file at `rate`.
    pub async fn sample_full(
        &self,
        path: &str,
        rate: f64,
        codec: &KeyCodec,
    ) -> Result<Vec<Key>> {
        Self::validate_rate(rate)?;
        let mut rng = StdRng::from_entropy();
        let mut scanner =
            RecordScanner::open_full(self.store.as_ref(), path, self.chunk_size).await?;
        let mut keys = Vec::new();
        while let Some(record) = scanner.next_record().await? {
            if rate >= 1.0 || rng.gen::<f64>() < rate {
                keys.push(codec.extract(&record)?);
            }
        }
        debug!("sampled {} keys from {path} at rate {rate}", keys.len());
        Ok(keys)
    }

    /// Samples keys from a random fraction of the file's storage blocks.
    ///
    /// The file is viewed as `ceil(size / block)` blocks of `block_size_mb`
    /// megabytes; `max(1, ceil(blocks * block_fraction))` of them are chosen
    /// uniformly without replacement and scanned, applying `rate` within
    /// each. This trades sample uniformity for a bounded scan cost on very
    /// large files.
    pub async fn sample_blocks(
        &self,
        path: &str,
        rate: f64,
        block_size_mb: u64,
        block_fraction: f64,
        codec: &KeyCodec,
    ) -> Result<Vec<Key>> {
        Self::validate_rate(rate)?;
        if !(block_fraction > 0.0 && block_fraction <= 1.0) {
            return Err(RangePartError::Configuration(format!(
                "block fraction must be in (0, 1], got {block_fraction}"
            )));
        }
        if block_size_mb == 0 {
            return Err(RangePartError::Configuration(
                "block size must be positive".to_string(),
            ));
        }
        let size = self.store.size(path).await?;
        let block_bytes = block_size_mb * 1024 * 1024;
        let num_blocks = (size.div_ceil(block_bytes)).max(1) as usize;
        let wanted = ((num_blocks as f64 * block_fraction).ceil() as usize)
            .clamp(1, num_blocks);

        let mut rng = StdRng::from_entropy();
        let mut selected: Vec<usize> =
            rand::seq::index::sample(&mut rng, num_blocks, wanted).into_vec();
        selected.sort_unstable();
        info!(
            "block sampling {path}: scanning {wanted} of {num_blocks} blocks \
             at rate {rate}"
        );

        let mut keys = Vec::new();
        for block in selected {
            let start = block as u64 * block_bytes;
            let end = ((block as u64 + 1) * block_bytes).min(size);
            let mut scanner = RecordScanner::open(
                self.store.as_ref(),
                path,
                start,
                end,
                self.chunk_size,
            )
            .await?;
            while let Some(record) = scanner.next_record().await? {
                if rate >= 1.0 || rng.gen::<f64>() < rate {
                    keys.push(codec.extract(&record)?);
                }
            }
        }
        debug!("block sampling {path} yielded {} keys", keys.len());
        Ok(keys)
    }

    /// Block-samples every file under a directory, concatenating the keys.
    ///
    /// The merged sample feeds one tree build; the build re-sorts, so the
    /// per-file order of concatenation does not matter.
    pub async fn sample_blocks_dir(
        &self,
        dir: &str,
        rate: f64,
        block_size_mb: u64,
        block_fraction: f64,
        codec: &KeyCodec,
    ) -> Result<Vec<Key>> {
        let files = self.store.list(dir).await?;
        let mut keys = Vec::new();
        for file in &files {
            keys.extend(
                self.sample_blocks(file, rate, block_size_mb, block_fraction, codec)
                    .await?,
            );
        }
        Ok(keys)
    }

    /// Samples whole records (not just keys) from the listed files.
    ///
    /// Used when the same sample feeds several key extractors, as in
    /// replicated builds partitioned on different attributes.
    pub async fn sample_records(
        &self,
        paths: &[String],
        rate: f64,
    ) -> Result<Vec<Vec<u8>>> {
        Self::validate_rate(rate)?;
        let mut rng = StdRng::from_entropy();
        let mut records = Vec::new();
        for path in paths {
            let mut scanner =
                RecordScanner::open_full(self.store.as_ref(), path, self.chunk_size)
                    .await?;
            while let Some(record) = scanner.next_record().await? {
                if rate >= 1.0 || rng.gen::<f64>() < rate {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Samples every file in the list, concatenating the keys.
    pub async fn sample_paths(
        &self,
        paths: &[String],
        rate: f64,
        codec: &KeyCodec,
    ) -> Result<Vec<Key>> {
        let mut keys = Vec::new();
        for path in paths {
            keys.extend(self.sample_full(path, rate, codec).await?);
        }
        Ok(keys)
    }
}
