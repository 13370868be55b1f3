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

//! Binds the grace protocol engine to the host lifecycle phases of
//! spec.md §4.2: boot, notify-driven grace entry, enforcing toggles,
//! lift, and shutdown. The host server, its client-record recovery
//! databases and its reaper threads are named abstractly here, exactly
//! as the protocol specification names them: this module only computes
//! the recovery-database names and wakes the host, it never reads or
//! writes client records itself.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::error::{Error, ErrorKind, Result};
use crate::grace::{GraceEngine, JoinMode};
use crate::object_store::{ObjectError, ObjectStoreClient, WatchCookie, WriteOp};

/// Recovery database names exposed to the host by [`HostAdapter::read_clids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDatabases {
    /// `rec-<C>:<nodeid>`, the database new client records are recorded into.
    pub new: String,
    /// `rec-<R>:<nodeid>`, the database reclaim is read from. `None` when
    /// `R == 0` and reclaim is not allowed.
    pub old: Option<String>,
}

fn recovery_name(epoch: u64, nodeid: &str) -> String {
    format!("rec-{}:{}", epoch, nodeid)
}

/// Adapter binding a [`GraceEngine`] to a single host node's lifecycle.
pub struct HostAdapter<C: ObjectStoreClient + Clone + 'static> {
    engine: GraceEngine<C>,
    client: C,
    nodeid: String,
    watch_cookie: Mutex<Option<WatchCookie>>,
    wake_tx: watch::Sender<()>,
    wake_rx: watch::Receiver<()>,
}

impl<C: ObjectStoreClient + Clone + 'static> HostAdapter<C> {
    /// Bind a fresh adapter for `nodeid` to the grace object `oid` on `client`.
    pub fn new(client: C, oid: impl Into<String>, nodeid: impl Into<String>) -> Self {
        let oid = oid.into();
        let (wake_tx, wake_rx) = watch::channel(());
        HostAdapter {
            engine: GraceEngine::new(client.clone(), oid),
            client,
            nodeid: nodeid.into(),
            watch_cookie: Mutex::new(None),
            wake_tx,
            wake_rx,
        }
    }

    /// A receiver woken every time the grace object changes. The host's
    /// reaper should treat each wakeup as "go re-read state", never as
    /// carrying a payload of its own.
    pub fn reaper(&self) -> watch::Receiver<()> {
        self.wake_rx.clone()
    }

    /// The grace object name this adapter is bound to.
    pub fn oid(&self) -> &str {
        self.engine.oid()
    }

    /// The nodeid this adapter acts on behalf of.
    pub fn nodeid(&self) -> &str {
        &self.nodeid
    }

    /// Connect, ensure the grace object exists, verify membership, and
    /// install the notify watch that wakes the reaper.
    pub async fn init(&self) -> Result<()> {
        self.engine.create().await?;
        if !self.engine.member(&self.nodeid).await? {
            return Err(Error::new(
                ErrorKind::InvalidNodeId,
                format!("{} is not a cluster member", self.nodeid),
            ));
        }

        let client = self.client.clone();
        let oid = self.engine.oid().to_string();
        let wake_tx = self.wake_tx.clone();
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let client = client.clone();
            let oid = oid.clone();
            let wake_tx = wake_tx.clone();
            tokio::spawn(async move {
                // Ack first: the notify channel is best-effort, losing the
                // ack only delays redelivery, it never wedges the reaper.
                if let Err(e) = client.notify(&oid).await {
                    log::warn!("notify ack on {} failed: {}", oid, e);
                }
                let _ = wake_tx.send(());
            });
        });
        let cookie = self.engine_watch(callback).await?;
        *self.watch_cookie.lock().await = Some(cookie);
        Ok(())
    }

    async fn engine_watch(
        &self,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<WatchCookie> {
        self.client
            .watch(self.engine.oid(), callback)
            .await
            .map_err(Error::from)
    }

    /// Join the cluster (normal mode) and compute the recovery-database
    /// names the host should use.
    pub async fn read_clids(&self) -> Result<ClientDatabases> {
        let (c, r) = self.engine.join(&self.nodeid, JoinMode::Normal).await?;
        Ok(ClientDatabases {
            new: recovery_name(c, &self.nodeid),
            old: if r > 0 {
                Some(recovery_name(r, &self.nodeid))
            } else {
                None
            },
        })
    }

    /// Called on notify. If a grace period is active and this node has
    /// not yet entered local grace, copies the currently-confirmed
    /// client records into the new recovery object via `copy_confirmed`
    /// and marks the node as enforcing. Returns the epoch entered, or
    /// `None` if no transition happened.
    pub async fn maybe_start_grace<F, Fut>(&self, copy_confirmed: F) -> Result<Option<u64>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (current_epoch, reclaim_epoch) = self.engine.epochs().await?;
        if reclaim_epoch == 0 {
            return Ok(None);
        }
        if self.engine.enforcing_check(&self.nodeid).await? {
            return Ok(None);
        }
        let new_oid = recovery_name(current_epoch, &self.nodeid);
        copy_confirmed(new_oid).await?;
        self.engine.enforcing_on(&self.nodeid).await?;
        Ok(Some(current_epoch))
    }

    /// Mark this node as currently enforcing grace locally.
    pub async fn set_enforcing(&self, value: bool) -> Result<(u64, u64)> {
        if value {
            self.engine.enforcing_on(&self.nodeid).await
        } else {
            self.engine.enforcing_off(&self.nodeid).await
        }
    }

    /// Whether this node is currently marked as enforcing grace.
    pub async fn grace_enforcing(&self) -> Result<bool> {
        self.engine.enforcing_check(&self.nodeid).await
    }

    /// Attempt to complete grace for this node. Returns `true` iff the
    /// grace period is lifted cluster-wide.
    pub async fn try_lift_grace(&self) -> Result<bool> {
        let (_, reclaim_epoch) = self.engine.done(&self.nodeid).await?;
        Ok(reclaim_epoch == 0)
    }

    /// Stop enforcing locally and remove the old recovery object for the
    /// reclaim epoch that was active before the lift.
    pub async fn end_grace(&self, reclaim_epoch: u64) -> Result<()> {
        self.engine.enforcing_off(&self.nodeid).await?;
        let old_oid = recovery_name(reclaim_epoch, &self.nodeid);
        let op = WriteOp {
            remove: true,
            ..Default::default()
        };
        match self.client.write_op(&old_oid, op).await {
            Ok(_) => Ok(()),
            Err(ObjectError::NoSuchObject) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort force-join to mark intent to rejoin on restart,
    /// uninstall the watch, and disconnect.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.engine.join(&self.nodeid, JoinMode::Force).await {
            log::warn!("best-effort shutdown join for {} failed: {}", self.nodeid, e);
        }
        if let Some(cookie) = self.watch_cookie.lock().await.take() {
            self.client.unwatch(self.engine.oid(), cookie).await?;
        }
        Ok(())
    }

    /// Whether this node is a cluster member.
    pub async fn is_member(&self) -> Result<bool> {
        self.engine.member(&self.nodeid).await
    }
}
