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

//! Skew-tolerant quantile index tree.
//!
//! Boundaries are taken at the ideal quantile positions of the sorted
//! sample. When a quantile position lands inside a run of one repeated
//! (heavy-hitter) key, the boundary slides to the end of the run instead of
//! failing, so buckets near a skew point get unequal widths rather than
//! duplicate boundaries.

use log::{debug, warn};

use crate::config::RangePartConfig;
use crate::error::{RangePartError, Result};
use crate::key::Key;
use crate::tree::{
    encode_tree, route_by_cutpoints, DecodedTree, IndexTree, PartitionId,
    ROBUST_TREE_TAG,
};

const DEFAULT_ERROR_BOUND: f64 = 0.25;

/// Index tree tolerant of heavily skewed samples.
#[derive(Debug, Clone)]
pub struct RobustTree {
    num_partitions: usize,
    /// Tolerated deviation of a bucket's estimated share from the uniform
    /// share before a warning is logged.
    error_bound: f64,
    cutpoints: Vec<Key>,
}

impl RobustTree {
    /// Creates an unbuilt tree targeting `num_partitions` leaves.
    pub fn try_new(num_partitions: usize) -> Result<Self> {
        if num_partitions < 2 {
            return Err(RangePartError::Configuration(format!(
                "RobustTree requires at least 2 partitions, got {num_partitions}"
            )));
        }
        Ok(Self {
            num_partitions,
            error_bound: DEFAULT_ERROR_BOUND,
            cutpoints: Vec::new(),
        })
    }

    /// Creates an unbuilt tree targeting the configured partition count.
    pub fn from_config(config: &RangePartConfig) -> Result<Self> {
        Self::try_new(config.target_partitions())
    }

    /// Overrides the tolerated per-bucket share deviation.
    pub fn with_error_bound(mut self, error_bound: f64) -> Self {
        self.error_bound = error_bound;
        self
    }

    /// Restores a tree from its deserialized form.
    pub(crate) fn from_decoded(decoded: DecodedTree) -> Self {
        Self {
            num_partitions: decoded.num_partitions,
            error_bound: DEFAULT_ERROR_BOUND,
            cutpoints: decoded.cutpoints,
        }
    }

    /// Logs a warning for buckets whose estimated record share deviates from
    /// the uniform share beyond the configured bound.
    fn check_shares(&self, sorted: &[Key]) {
        let uniform = 1.0 / self.num_partitions as f64;
        let mut lower = 0usize;
        for partition in 0..self.num_partitions {
            let upper = match self.cutpoints.get(partition) {
                Some(cut) => sorted.partition_point(|k| k < cut),
                None => sorted.len(),
            };
            let share = (upper - lower) as f64 / sorted.len() as f64;
            if (share - uniform).abs() > self.error_bound {
                warn!(
                    "partition {partition} holds an estimated {:.1}% of records \
                     (uniform share {:.1}%); sample is heavily skewed",
                    share * 100.0,
                    uniform * 100.0
                );
            }
            lower = upper;
        }
    }
}

impl IndexTree for RobustTree {
    fn build(&mut self, mut sample: Vec<Key>) -> Result<()> {
        if sample.is_empty() {
            return Err(RangePartError::BuildError(
                "cannot build index tree from an empty sample".to_string(),
            ));
        }
        sample.sort();
        let n = sample.len();
        let wanted = self.num_partitions - 1;
        let mut cutpoints: Vec<Key> = Vec::with_capacity(wanted);
        // prev starts at the sample minimum so the first bucket is never
        // empty in expectation
        let mut prev = &sample[0];
        for boundary in 1..self.num_partitions {
            let target = (boundary * n / self.num_partitions).min(n - 1);
            let mut idx = target;
            while idx < n && &sample[idx] <= prev {
                idx += 1;
            }
            if idx >= n {
                return Err(RangePartError::BuildError(format!(
                    "sample has too few distinct keys for {wanted} boundaries \
                     (placed {})",
                    cutpoints.len()
                )));
            }
            cutpoints.push(sample[idx].clone());
            prev = &sample[idx];
        }
        debug!(
            "built robust tree with {} partitions from {} sampled keys",
            self.num_partitions, n
        );
        self.cutpoints = cutpoints;
        self.check_shares(&sample);
        Ok(())
    }

    fn route(&self, key: &Key) -> Result<PartitionId> {
        if self.cutpoints.is_empty() {
            return Err(RangePartError::General(
                "robust tree has not been built".to_string(),
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
                "cannot serialize an unbuilt robust tree".to_string(),
            ));
        }
        Ok(encode_tree(
            ROBUST_TREE_TAG,
            self.num_partitions,
            &self.cutpoints,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::deserialize;

    fn longs(values: impl IntoIterator<Item = i64>) -> Vec<Key> {
        values.into_iter().map(Key::Long).collect()
    }

    #[test]
    fn test_uniform_sample_even_shares() -> Result<()> {
        let mut tree = RobustTree::try_new(4)?;
        tree.build(longs(1..=1000))?;
        assert_eq!(3, tree.cutpoints().len());
        assert!(tree.cutpoints().windows(2).all(|w| w[0] < w[1]));
        let mut counts = vec![0u64; 4];
        for i in 1..=1000 {
            counts[tree.route(&Key::Long(i))?] += 1;
        }
        assert!(counts.iter().all(|c| (200..=300).contains(c)), "{counts:?}");
        Ok(())
    }

    #[test]
    fn test_heavy_hitter_slides_boundary() -> Result<()> {
        let mut tree = RobustTree::try_new(4)?;
        // one key owns over half the sample
        let mut sample = longs(std::iter::repeat(50).take(600));
        sample.extend(longs(0..400));
        tree.build(sample)?;
        let cuts = tree.cutpoints();
        assert_eq!(3, cuts.len());
        assert!(cuts.windows(2).all(|w| w[0] < w[1]));
        // all copies of the heavy hitter still land in one partition
        let hot = tree.route(&Key::Long(50))?;
        assert_eq!(hot, tree.route(&Key::Long(50))?);
        Ok(())
    }

    #[test]
    fn test_from_config_partition_count() -> Result<()> {
        let mut settings = std::collections::HashMap::new();
        settings.insert(
            crate::config::RANGEPART_TARGET_PARTITIONS.to_string(),
            "8".to_string(),
        );
        let config = RangePartConfig::with_settings(settings)?;
        let tree = RobustTree::from_config(&config)?;
        assert_eq!(8, tree.num_partitions());
        Ok(())
    }

    #[test]
    fn test_identical_keys_fail() {
        let mut tree = RobustTree::try_new(4).unwrap();
        assert!(matches!(
            tree.build(longs(std::iter::repeat(7).take(100))),
            Err(RangePartError::BuildError(_))
        ));
    }

    #[test]
    fn test_too_few_distinct_keys_fail() {
        let mut tree = RobustTree::try_new(8).unwrap();
        // only three distinct values for seven boundaries
        let mut sample = longs(std::iter::repeat(1).take(40));
        sample.extend(longs(std::iter::repeat(2).take(40)));
        sample.extend(longs(std::iter::repeat(3).take(40)));
        assert!(matches!(
            tree.build(sample),
            Err(RangePartError::BuildError(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() -> Result<()> {
        let mut tree = RobustTree::try_new(5)?;
        tree.build(longs(0..250))?;
        let bytes = tree.serialize()?;
        let restored = deserialize(&bytes)?;
        assert_eq!(bytes, restored.serialize()?);
        for i in -50..300 {
            let key = Key::Long(i);
            assert_eq!(tree.route(&key)?, restored.route(&key)?);
        }
        Ok(())
    }
}
