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

//! Rangepart error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

/// Result type alias for rangepart operations.
pub type Result<T> = result::Result<T, RangePartError>;

/// Rangepart error types for index build and partition storage.
#[derive(Debug)]
pub enum RangePartError {
    /// General error with a descriptive message.
    General(String),
    /// Index tree could not be built from the sample (empty or degenerate).
    BuildError(String),
    /// A partition file was not found on the store.
    NotFound(String),
    /// I/O failure during a partition read/write/flush: (path, partition_id, message).
    StoreError(String, usize, String),
    /// Failure to acquire or release a distributed lock.
    LockError(String),
    /// I/O operation error.
    IoError(io::Error),
    /// Configuration error with invalid settings.
    Configuration(String),
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for RangePartError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}

/// Creates a general rangepart error from a string message.
pub fn rangepart_error(message: &str) -> RangePartError {
    RangePartError::General(message.to_owned())
}

impl From<String> for RangePartError {
    fn from(e: String) -> Self {
        RangePartError::General(e)
    }
}

impl From<io::Error> for RangePartError {
    fn from(e: io::Error) -> Self {
        RangePartError::IoError(e)
    }
}

impl From<tokio::task::JoinError> for RangePartError {
    fn from(e: tokio::task::JoinError) -> Self {
        RangePartError::General(format!("Task join error: {e}"))
    }
}

impl Display for RangePartError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RangePartError::General(desc) => write!(f, "General error: {desc}"),
            RangePartError::BuildError(desc) => write!(f, "Index build error: {desc}"),
            RangePartError::NotFound(desc) => write!(f, "Not found: {desc}"),
            RangePartError::StoreError(path, partition_id, desc) => {
                write!(
                    f,
                    "Store error for partition {partition_id} at {path}: {desc}"
                )
            }
            RangePartError::LockError(desc) => write!(f, "Lock error: {desc}"),
            RangePartError::IoError(desc) => write!(f, "IO error: {desc}"),
            RangePartError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
        }
    }
}

impl Error for RangePartError {}
