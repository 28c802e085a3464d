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

//! Named mutual-exclusion locks guarding partition flushes.
//!
//! The production implementation is a client for the external coordination
//! service; [InMemoryLockProvider] stands in for it in tests and
//! single-host deployments. A lease releases its lock when dropped, which
//! is what guarantees release on every control-flow exit from a flush.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use tokio::sync::Mutex;

use crate::error::Result;

/// A held lock; dropping it releases the lock.
pub struct LockLease {
    name: String,
    // keeps the provider-specific guard alive until drop
    _guard: Box<dyn Any + Send>,
}

impl LockLease {
    /// Wraps a provider-specific guard object whose drop releases the lock.
    pub fn new(name: impl Into<String>, guard: impl Any + Send) -> Self {
        Self {
            name: name.into(),
            _guard: Box::new(guard),
        }
    }

    /// Name of the lock this lease holds.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        debug!("released lock {}", self.name);
    }
}

/// Provider of named, cluster-wide mutual-exclusion locks.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Acquires the named lock, blocking until it is available.
    ///
    /// No timeout is applied at this layer; timeout and retry policy belong
    /// to the coordination service behind the implementation.
    async fn acquire(&self, name: &str) -> Result<LockLease>;
}

/// In-process lock provider backed by per-name async mutexes.
#[derive(Default)]
pub struct InMemoryLockProvider {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InMemoryLockProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn acquire(&self, name: &str) -> Result<LockLease> {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        debug!("acquired lock {name}");
        Ok(LockLease::new(name, guard))
    }
}
