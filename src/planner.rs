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

//! Join planning over two range-partitioned datasets.
//!
//! The key space is cut into ranges at the union of both sides' cutpoints,
//! so each range maps into exactly one partition per side. A range whose
//! finite bounds are boundaries of BOTH sides can be joined locally (the
//! two partitions cover identical key ranges); any other range needs its
//! partitions shuffled before joining.

use std::fmt::{Display, Formatter};

use log::debug;

use crate::error::{RangePartError, Result};
use crate::key::Key;
use crate::tree::PartitionId;

/// A join query between two partitioned datasets on one attribute.
#[derive(Debug, Clone)]
pub struct JoinQuery {
    /// Name of the joined-in table.
    pub table: String,
    /// Filter predicate applied before the join, if any.
    pub predicate: Option<String>,
}

impl Display for JoinQuery {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match &self.predicate {
            Some(p) => write!(f, "{} where {p}", self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// One side of a join: a partitioned dataset and its index boundaries.
#[derive(Debug, Clone)]
pub struct DatasetDescriptor {
    /// Dataset name, used in plan input strings.
    pub name: String,
    /// The dataset's index cutpoints, strictly increasing.
    pub cutpoints: Vec<Key>,
    /// Attribute the dataset is partitioned and joined on.
    pub join_attribute: usize,
    /// Query this side contributes to the join, if any.
    pub query: Option<JoinQuery>,
}

impl DatasetDescriptor {
    /// Describes a dataset partitioned at `cutpoints` on `join_attribute`.
    pub fn new(
        name: impl Into<String>,
        cutpoints: Vec<Key>,
        join_attribute: usize,
    ) -> Self {
        Self {
            name: name.into(),
            cutpoints,
            join_attribute,
            query: None,
        }
    }

    /// Attaches the query this side contributes to the join.
    pub fn with_query(mut self, query: JoinQuery) -> Self {
        self.query = Some(query);
        self
    }

    /// Number of partitions the dataset is cut into.
    pub fn num_partitions(&self) -> usize {
        self.cutpoints.len() + 1
    }

    fn has_boundary(&self, key: &Key) -> bool {
        self.cutpoints.binary_search(key).is_ok()
    }

    /// Partitions overlapping `[lower, upper)`, as a half-open id range.
    ///
    /// `None` bounds are unbounded. A key equal to a cutpoint belongs to
    /// the partition on the cutpoint's right, matching record routing.
    pub fn partition_range(
        &self,
        lower: Option<&Key>,
        upper: Option<&Key>,
    ) -> (PartitionId, PartitionId) {
        let start = match lower {
            Some(lo) => self.cutpoints.partition_point(|c| c <= lo),
            None => 0,
        };
        let end = match upper {
            Some(hi) => self.cutpoints.partition_point(|c| c < hi) + 1,
            None => self.num_partitions(),
        };
        (start, end.max(start + 1).min(self.num_partitions()))
    }
}

/// How a key range's partitions are brought together for joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Both sides store the range in partitions with identical bounds; the
    /// pair joins in place.
    Local,
    /// Partition bounds disagree; the overlapping partitions are shuffled
    /// on the join key first.
    Shuffle,
}

/// Which side of the join a dataset is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    /// The left (first) dataset.
    Left,
    /// The right (second) dataset.
    Right,
}

/// One key range of the join plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePlan {
    /// Inclusive lower bound; `None` means unbounded below.
    pub lower: Option<Key>,
    /// Exclusive upper bound; `None` means unbounded above.
    pub upper: Option<Key>,
    /// How this range is joined.
    pub strategy: JoinStrategy,
}

/// Complete plan for joining two partitioned datasets.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    left: DatasetDescriptor,
    right: DatasetDescriptor,
    ranges: Vec<RangePlan>,
}

impl JoinPlan {
    /// The planned key ranges in increasing order; together they cover the
    /// whole key space.
    pub fn ranges(&self) -> &[RangePlan] {
        &self.ranges
    }

    /// Left-side dataset of the plan.
    pub fn left(&self) -> &DatasetDescriptor {
        &self.left
    }

    /// Right-side dataset of the plan.
    pub fn right(&self) -> &DatasetDescriptor {
        &self.right
    }

    /// Input string for a locally joinable range.
    ///
    /// Format: `left_name:partition_id;right_name:partition_id`. Only valid
    /// for [JoinStrategy::Local] ranges, where each side maps the range to
    /// exactly one partition.
    pub fn hyperjoin_input(&self, range: &RangePlan) -> Result<String> {
        if range.strategy != JoinStrategy::Local {
            return Err(RangePartError::General(
                "hyperjoin input requested for a shuffle range".to_string(),
            ));
        }
        let (lp, _) = self
            .left
            .partition_range(range.lower.as_ref(), range.upper.as_ref());
        let (rp, _) = self
            .right
            .partition_range(range.lower.as_ref(), range.upper.as_ref());
        Ok(format!("{}:{lp};{}:{rp}", self.left.name, self.right.name))
    }

    /// Input string for one side of a shuffled range.
    ///
    /// Format: `name:join_attribute:id,id,...` naming the attribute the
    /// side is re-partitioned on and every partition of that side
    /// overlapping the range.
    pub fn shuffle_join_input(&self, side: JoinSide, range: &RangePlan) -> String {
        let descriptor = match side {
            JoinSide::Left => &self.left,
            JoinSide::Right => &self.right,
        };
        let (start, end) =
            descriptor.partition_range(range.lower.as_ref(), range.upper.as_ref());
        let ids: Vec<String> = (start..end).map(|p| p.to_string()).collect();
        format!(
            "{}:{}:{}",
            descriptor.name,
            descriptor.join_attribute,
            ids.join(",")
        )
    }
}

/// Plans joins between range-partitioned datasets.
#[derive(Debug, Default)]
pub struct JoinPlanner;

impl JoinPlanner {
    /// Creates a planner.
    pub fn new() -> Self {
        Self
    }

    /// Plans the join of `left` and `right` on their join attributes.
    ///
    /// Fails if either side's cutpoints are not strictly increasing.
    pub fn plan(
        &self,
        left: DatasetDescriptor,
        right: DatasetDescriptor,
    ) -> Result<JoinPlan> {
        for side in [&left, &right] {
            if side.cutpoints.windows(2).any(|w| w[0] >= w[1]) {
                return Err(RangePartError::General(format!(
                    "dataset {} has unordered cutpoints",
                    side.name
                )));
            }
        }

        // union of both boundary sets cuts the key space into the finest
        // ranges each side maps to a single partition
        let mut bounds: Vec<Key> = left
            .cutpoints
            .iter()
            .chain(right.cutpoints.iter())
            .cloned()
            .collect();
        bounds.sort();
        bounds.dedup();

        let mut ranges = Vec::with_capacity(bounds.len() + 1);
        for i in 0..=bounds.len() {
            let lower = i.checked_sub(1).map(|j| bounds[j].clone());
            let upper = bounds.get(i).cloned();
            let aligned = [&lower, &upper].into_iter().all(|bound| match bound {
                Some(key) => left.has_boundary(key) && right.has_boundary(key),
                None => true,
            });
            ranges.push(RangePlan {
                lower,
                upper,
                strategy: if aligned {
                    JoinStrategy::Local
                } else {
                    JoinStrategy::Shuffle
                },
            });
        }
        let local = ranges
            .iter()
            .filter(|r| r.strategy == JoinStrategy::Local)
            .count();
        let describe = |d: &DatasetDescriptor| match &d.query {
            Some(q) => format!("{} ({q})", d.name),
            None => d.name.clone(),
        };
        debug!(
            "planned join {} x {}: {local} local / {} shuffle ranges",
            describe(&left),
            describe(&right),
            ranges.len() - local
        );
        Ok(JoinPlan {
            left,
            right,
            ranges,
        })
    }
}
