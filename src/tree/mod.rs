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

//! Space-partitioning index trees over the record key space.
//!
//! A tree is built once from a sample of keys and afterwards routes every
//! key to exactly one partition id. Its leaf boundaries ("cutpoints") are a
//! strictly increasing key sequence of length `num_partitions - 1`; bucket
//! `i` covers `[cutpoints[i-1], cutpoints[i])` with both extremes open
//! ended.

use crate::error::{RangePartError, Result};
use crate::key::Key;

/// Sorted-median (KD-style) tree variant.
pub mod median;
/// Skew-tolerant quantile tree variant.
pub mod robust;

/// Identifier of one output partition, in `[0, num_partitions)`.
pub type PartitionId = usize;

/// Magic bytes prefixing a serialized index tree.
pub const TREE_MAGIC: [u8; 4] = *b"RPIX";

/// Serialized variant tag for [median::MedianTree].
pub const MEDIAN_TREE_TAG: u8 = 1;
/// Serialized variant tag for [robust::RobustTree].
pub const ROBUST_TREE_TAG: u8 = 2;

/// A space-partitioning tree over the key space.
///
/// Implementations must keep `route` consistent with `cutpoints`: a key
/// routes to the number of cutpoints that are `<=` it.
pub trait IndexTree: Send + Sync {
    /// Builds the tree from a key sample.
    ///
    /// Fails with `BuildError` if the sample is empty or does not contain
    /// enough distinct keys to produce `num_partitions - 1` strictly
    /// increasing boundaries (a sample of identical keys degenerates to a
    /// single partition).
    fn build(&mut self, sample: Vec<Key>) -> Result<()>;

    /// Routes a key to the unique partition covering it.
    ///
    /// Deterministic, O(log num_partitions). Fails if the tree has not been
    /// built.
    fn route(&self, key: &Key) -> Result<PartitionId>;

    /// Leaf boundaries in increasing order; empty until built.
    fn cutpoints(&self) -> &[Key];

    /// Number of partitions this tree routes into.
    fn num_partitions(&self) -> usize;

    /// Persists the tree as a compact binary blob.
    ///
    /// `deserialize(serialize(t))` routes identically to `t` for every key
    /// and re-serializes to the same bytes.
    fn serialize(&self) -> Result<Vec<u8>>;
}

/// Routes a key against an ordered cutpoint sequence.
///
/// Returns the number of cutpoints `<=` the key, so a key equal to a
/// boundary belongs to the bucket on the right of that boundary.
pub fn route_by_cutpoints(cutpoints: &[Key], key: &Key) -> PartitionId {
    cutpoints.partition_point(|c| c <= key)
}

/// Restores a tree of either variant from its serialized form.
pub fn deserialize(bytes: &[u8]) -> Result<Box<dyn IndexTree>> {
    let decoded = decode_tree(bytes)?;
    match decoded.tag {
        MEDIAN_TREE_TAG => Ok(Box::new(median::MedianTree::from_decoded(decoded))),
        ROBUST_TREE_TAG => Ok(Box::new(robust::RobustTree::from_decoded(decoded))),
        other => Err(RangePartError::General(format!(
            "unknown index tree variant tag: {other}"
        ))),
    }
}

/// Decoded form of a serialized tree, shared by both variants.
pub(crate) struct DecodedTree {
    pub tag: u8,
    pub num_partitions: usize,
    pub cutpoints: Vec<Key>,
}

pub(crate) fn encode_tree(
    tag: u8,
    num_partitions: usize,
    cutpoints: &[Key],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + cutpoints.len() * 9);
    buf.extend_from_slice(&TREE_MAGIC);
    buf.push(tag);
    buf.extend_from_slice(&(num_partitions as u32).to_le_bytes());
    buf.extend_from_slice(&(cutpoints.len() as u32).to_le_bytes());
    for key in cutpoints {
        key.write_to(&mut buf);
    }
    buf
}

pub(crate) fn decode_tree(bytes: &[u8]) -> Result<DecodedTree> {
    if bytes.len() < TREE_MAGIC.len() || bytes[..TREE_MAGIC.len()] != TREE_MAGIC {
        return Err(RangePartError::General(
            "not a serialized index tree (bad magic)".to_string(),
        ));
    }
    let mut pos = TREE_MAGIC.len();
    let tag = bytes[pos];
    pos += 1;

    let read_u32 = |bytes: &[u8], pos: &mut usize| -> Result<u32> {
        let end = *pos + 4;
        let raw: [u8; 4] = bytes
            .get(*pos..end)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                RangePartError::General("truncated index tree encoding".to_string())
            })?;
        *pos = end;
        Ok(u32::from_le_bytes(raw))
    };

    let num_partitions = read_u32(bytes, &mut pos)? as usize;
    let count = read_u32(bytes, &mut pos)? as usize;
    let mut cutpoints = Vec::with_capacity(count);
    for _ in 0..count {
        cutpoints.push(Key::read_from(bytes, &mut pos)?);
    }
    if pos != bytes.len() {
        return Err(RangePartError::General(
            "trailing bytes after index tree encoding".to_string(),
        ));
    }
    if count + 1 != num_partitions {
        return Err(RangePartError::General(format!(
            "cutpoint count {count} inconsistent with {num_partitions} partitions"
        )));
    }
    if cutpoints.windows(2).any(|w| w[0] >= w[1]) {
        return Err(RangePartError::General(
            "serialized cutpoints are not strictly increasing".to_string(),
        ));
    }
    Ok(DecodedTree {
        tag,
        num_partitions,
        cutpoints,
    })
}
