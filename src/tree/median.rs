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

//! Sorted-median (KD-style) index tree.
//!
//! The sample is sorted once and then split recursively at the median of
//! each slice until every leaf owns one partition id. The in-order sequence
//! of split keys is the cutpoint sequence; leaves are numbered left to
//! right.

use log::debug;

use crate::config::RangePartConfig;
use crate::error::{RangePartError, Result};
use crate::key::Key;
use crate::tree::{
    encode_tree, route_by_cutpoints, DecodedTree, IndexTree, PartitionId,
    MEDIAN_TREE_TAG,
};

/// Index tree that always splits at sample medians.
///
/// Produces near-equal bucket widths on well-behaved samples but fails on
/// samples whose median regions are dominated by a single repeated key; use
/// [crate::tree::robust::RobustTree] for skewed data.
#[derive(Debug, Clone)]
pub struct MedianTree {
    num_partitions: usize,
    cutpoints: Vec<Key>,
}

impl MedianTree {
    /// Creates an unbuilt tree targeting `num_partitions` leaves.
    pub fn try_new(num_partitions: usize) -> Result<Self> {
        if num_partitions < 2 {
            return Err(RangePartError::Configuration(format!(
                "MedianTree requires at least 2 partitions, got {num_partitions}"
            )));
        }
        Ok(Self {
            num_partitions,
            cutpoints: Vec::new(),
        })
    }

    /// Creates an unbuilt tree targeting the configured partition count.
    pub fn from_config(config: &RangePartConfig) -> Result<Self> {
        Self::try_new(config.target_partitions())
    }

    /// Restores a tree from its deserialized form.
    pub(crate) fn from_decoded(decoded: DecodedTree) -> Self {
        Self {
            num_partitions: decoded.num_partitions,
            cutpoints: decoded.cutpoints,
        }
    }

    /// Recursively splits `slice` into `leaves` buckets, appending split
    /// keys in order.
    fn split(slice: &[Key], leaves: usize, out: &mut Vec<Key>) -> Result<()> {
        if leaves == 1 {
            return Ok(());
        }
        let left_leaves = leaves / 2;
        let target = slice.len() * left_leaves / leaves;
        let idx = Self::split_index(slice, target)?;
        Self::split(&slice[..idx], left_leaves, out)?;
        out.push(slice[idx].clone());
        Self::split(&slice[idx..], leaves - left_leaves, out)
    }

    /// Finds the split index nearest to `target` where the sorted slice
    /// transitions between distinct values.
    ///
    /// The slice is split as `[..idx]` / `[idx..]`, so a valid index needs
    /// `slice[idx - 1] < slice[idx]`; a median sitting inside a run of
    /// duplicates is moved to the closest run edge.
    fn split_index(slice: &[Key], target: usize) -> Result<usize> {
        if slice.len() < 2 {
            return Err(RangePartError::BuildError(
                "sample slice too small to split further".to_string(),
            ));
        }
        let target = target.clamp(1, slice.len() - 1);
        for offset in 0..slice.len() {
            let forward = target + offset;
            if forward <= slice.len() - 1 && slice[forward - 1] < slice[forward] {
                return Ok(forward);
            }
            if offset > 0 && target >= offset + 1 {
                let backward = target - offset;
                if slice[backward - 1] < slice[backward] {
                    return Ok(backward);
                }
            }
        }
        Err(RangePartError::BuildError(
            "all keys in sample slice are identical; cannot split".to_string(),
        ))
    }
}

impl IndexTree for MedianTree {
    fn build(&mut self, mut sample: Vec<Key>) -> Result<()> {
        if sample.is_empty() {
            return Err(RangePartError::BuildError(
                "cannot build index tree from an empty sample".to_string(),
            ));
        }
        sample.sort();
        let mut cutpoints = Vec::with_capacity(self.num_partitions - 1);
        Self::split(&sample, self.num_partitions, &mut cutpoints)?;
        debug!(
            "built median tree with {} partitions from {} sampled keys",
            self.num_partitions,
            sample.len()
        );
        self.cutpoints = cutpoints;
        Ok(())
    }

    fn route(&self, key: &Key) -> Result<PartitionId> {
        if self.cutpoints.is_empty() {
            return Err(RangePartError::General(
                "median tree has not been built".to_string(),
            ));
        }
        Ok(route_by_cutpoints(&self.cutpoints, key))
    }

    fn cutpoints(&self) -> &[Key] {
        &self.cutpoints
    }

    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        if self.cutpoints.is_empty() {
            return Err(RangePartError::General(
                "cannot serialize an unbuilt median tree".to_string(),
            ));
        }
        Ok(encode_tree(
            MEDIAN_TREE_TAG,
            self.num_partitions,
            &self.cutpoints,
        ))
    }
}
