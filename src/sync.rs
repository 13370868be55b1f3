// Copyright 2019 Dmitry Tantsur <divius.inside@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Synchronous wrappers around [`GraceEngine`] and [`HostAdapter`], for
//! callers (the admin CLI, a host server with no async runtime of its
//! own) that would rather block a thread than drive a future.

use std::cell::RefCell;
use std::time::Duration;

use tokio::runtime::{Builder as RuntimeBuilder, Runtime};
use waiter::{Waiter, WaiterCurrentState};

use crate::error::{Error, ErrorKind, Result};
use crate::grace::{CreateOutcome, GraceDump, GraceEngine, JoinMode};
use crate::host::{ClientDatabases, HostAdapter};
use crate::object_store::ObjectStoreClient;

fn single_threaded_runtime() -> Runtime {
    RuntimeBuilder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to create a single-threaded runtime")
}

/// A synchronous wrapper around [`GraceEngine`].
pub struct SyncGraceEngine<C: ObjectStoreClient> {
    inner: GraceEngine<C>,
    runtime: RefCell<Runtime>,
}

impl<C: ObjectStoreClient> SyncGraceEngine<C> {
    /// Wrap `engine`, creating a dedicated single-threaded runtime.
    ///
    /// Panics if unable to create a runtime.
    pub fn new(engine: GraceEngine<C>) -> Self {
        SyncGraceEngine {
            inner: engine,
            runtime: RefCell::new(single_threaded_runtime()),
        }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.borrow_mut().block_on(fut)
    }

    /// See [`GraceEngine::create`].
    pub fn create(&self) -> Result<CreateOutcome> {
        self.block_on(self.inner.create())
    }

    /// See [`GraceEngine::epochs`].
    pub fn epochs(&self) -> Result<(u64, u64)> {
        self.block_on(self.inner.epochs())
    }

    /// See [`GraceEngine::dump`].
    pub fn dump(&self) -> Result<GraceDump> {
        self.block_on(self.inner.dump())
    }

    /// See [`GraceEngine::start`].
    pub fn start(&self, nodeids: &[String]) -> Result<(u64, u64)> {
        self.block_on(self.inner.start(nodeids))
    }

    /// See [`GraceEngine::join`].
    pub fn join(&self, nodeid: &str, mode: JoinMode) -> Result<(u64, u64)> {
        self.block_on(self.inner.join(nodeid, mode))
    }

    /// See [`GraceEngine::lift`].
    pub fn lift(&self, nodeids: &[String]) -> Result<(u64, u64)> {
        self.block_on(self.inner.lift(nodeids))
    }

    /// See [`GraceEngine::done`].
    pub fn done(&self, nodeid: &str) -> Result<(u64, u64)> {
        self.block_on(self.inner.done(nodeid))
    }

    /// See [`GraceEngine::member`].
    pub fn member(&self, nodeid: &str) -> Result<bool> {
        self.block_on(self.inner.member(nodeid))
    }

    /// See [`GraceEngine::enforcing_on`].
    pub fn enforcing_on(&self, nodeid: &str) -> Result<(u64, u64)> {
        self.block_on(self.inner.enforcing_on(nodeid))
    }

    /// See [`GraceEngine::enforcing_off`].
    pub fn enforcing_off(&self, nodeid: &str) -> Result<(u64, u64)> {
        self.block_on(self.inner.enforcing_off(nodeid))
    }

    /// See [`GraceEngine::enforcing_check`].
    pub fn enforcing_check(&self, nodeid: &str) -> Result<bool> {
        self.block_on(self.inner.enforcing_check(nodeid))
    }
}

/// A synchronous wrapper around [`HostAdapter`].
pub struct SyncHostAdapter<C: ObjectStoreClient + Clone + 'static> {
    inner: HostAdapter<C>,
    runtime: RefCell<Runtime>,
}

impl<C: ObjectStoreClient + Clone + 'static> SyncHostAdapter<C> {
    /// Wrap `adapter`, creating a dedicated single-threaded runtime.
    ///
    /// Panics if unable to create a runtime.
    pub fn new(adapter: HostAdapter<C>) -> Self {
        SyncHostAdapter {
            inner: adapter,
            runtime: RefCell::new(single_threaded_runtime()),
        }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.borrow_mut().block_on(fut)
    }

    /// See [`HostAdapter::init`].
    pub fn init(&self) -> Result<()> {
        self.block_on(self.inner.init())
    }

    /// See [`HostAdapter::read_clids`].
    pub fn read_clids(&self) -> Result<ClientDatabases> {
        self.block_on(self.inner.read_clids())
    }

    /// See [`HostAdapter::maybe_start_grace`]. `copy_confirmed` runs
    /// synchronously on the wrapper's runtime thread.
    pub fn maybe_start_grace<F>(&self, copy_confirmed: F) -> Result<Option<u64>>
    where
        F: FnOnce(String) -> Result<()>,
    {
        self.block_on(
            self.inner
                .maybe_start_grace(|oid| async move { copy_confirmed(oid) }),
        )
    }

    /// See [`HostAdapter::set_enforcing`].
    pub fn set_enforcing(&self, value: bool) -> Result<(u64, u64)> {
        self.block_on(self.inner.set_enforcing(value))
    }

    /// See [`HostAdapter::grace_enforcing`].
    pub fn grace_enforcing(&self) -> Result<bool> {
        self.block_on(self.inner.grace_enforcing())
    }

    /// See [`HostAdapter::try_lift_grace`].
    pub fn try_lift_grace(&self) -> Result<bool> {
        self.block_on(self.inner.try_lift_grace())
    }

    /// See [`HostAdapter::end_grace`].
    pub fn end_grace(&self, reclaim_epoch: u64) -> Result<()> {
        self.block_on(self.inner.end_grace(reclaim_epoch))
    }

    /// See [`HostAdapter::shutdown`].
    pub fn shutdown(&self) -> Result<()> {
        self.block_on(self.inner.shutdown())
    }

    /// See [`HostAdapter::is_member`].
    pub fn is_member(&self) -> Result<bool> {
        self.block_on(self.inner.is_member())
    }

    /// Block, polling [`HostAdapter::try_lift_grace`] every `delay`,
    /// until grace is lifted cluster-wide or `wait_timeout` elapses.
    pub fn wait_for_lift(&self, wait_timeout: Duration, delay: Duration) -> Result<()> {
        GraceLiftWaiter {
            inner: self,
            wait_timeout,
            delay,
        }
        .wait()
    }
}

struct GraceLiftWaiter<'a, C: ObjectStoreClient + Clone + 'static> {
    inner: &'a SyncHostAdapter<C>,
    wait_timeout: Duration,
    delay: Duration,
}

impl<'a, C: ObjectStoreClient + Clone + 'static> WaiterCurrentState<()> for GraceLiftWaiter<'a, C> {
    fn waiter_current_state(&self) -> &() {
        &()
    }
}

impl<'a, C: ObjectStoreClient + Clone + 'static> Waiter<(), Error> for GraceLiftWaiter<'a, C> {
    fn default_wait_timeout(&self) -> Option<Duration> {
        Some(self.wait_timeout)
    }

    fn default_delay(&self) -> Duration {
        self.delay
    }

    fn timeout_error(&self) -> Error {
        Error::new(
            ErrorKind::OperationTimedOut,
            format!(
                "timed out after {:?} waiting for grace on {} to lift",
                self.wait_timeout,
                self.inner.inner.nodeid()
            ),
        )
    }

    fn poll(&mut self) -> Result<Option<()>> {
        if self.inner.try_lift_grace()? {
            log::debug!("grace lifted for {}", self.inner.inner.nodeid());
            Ok(Some(()))
        } else {
            log::trace!("still waiting for grace on {} to lift", self.inner.inner.nodeid());
            Ok(None)
        }
    }
}
