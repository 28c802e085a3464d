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

#![warn(missing_docs)]
//! Range partitioning for large flat datasets.
//!
//! The crate samples a dataset's key distribution, builds a
//! space-partitioning index tree over it, routes every record to a
//! partition and writes the partitions through a pluggable file store
//! under distributed locks. A join planner classifies key ranges of two
//! partitioned datasets as locally joinable or requiring a shuffle.

/// Crate version, taken from the build manifest.
pub const RANGEPART_VERSION: &str = env!("CARGO_PKG_VERSION");

/// End-to-end index builds.
pub mod builder;
/// Distributed routing through a compute engine.
pub mod cluster;
/// Crate configuration.
pub mod config;
/// Error types.
pub mod error;
/// Record keys and key extraction.
pub mod key;
/// Named locks guarding partition writes.
pub mod lock;
/// Join planning over partitioned datasets.
pub mod planner;
/// Key sampling over record files.
pub mod sampler;
/// Partition storage.
pub mod store;
/// Space-partitioning index trees.
pub mod tree;
