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

use crate::tree::PartitionId;

/// In-memory write buffer for one partition.
///
/// Records are accumulated newline terminated; the buffer is drained only
/// after its contents have been durably flushed, so a failed flush keeps
/// the records for retry.
#[derive(Debug, Clone)]
pub struct PartitionBuffer {
    partition_id: PartitionId,
    bytes: Vec<u8>,
    record_count: u64,
}

impl PartitionBuffer {
    /// Creates an empty buffer for the given partition.
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            bytes: Vec::new(),
            record_count: 0,
        }
    }

    /// Partition this buffer feeds.
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Appends one record, adding the trailing newline if missing.
    pub fn append(&mut self, record: &[u8]) {
        self.bytes.extend_from_slice(record);
        if record.last() != Some(&b'\n') {
            self.bytes.push(b'\n');
        }
        self.record_count += 1;
    }

    /// Number of buffered bytes.
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    /// Number of buffered records.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Whether the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Buffered bytes, for flushing.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Empties the buffer after a successful flush.
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.record_count = 0;
    }
}
