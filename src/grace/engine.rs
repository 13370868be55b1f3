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

//! The `GraceEngine`: every operation is a bounded-in-code,
//! unbounded-in-retries loop of read/decide/version-asserted-write,
//! exactly as spec.md §4.1 describes.

use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind, Result};
use crate::object_store::{
    CreateMode, GraceData, NodeFlags, ObjectError, ObjectStoreClient, Version, WriteOp,
};

use super::RetryPolicy;

/// Default cap on the number of node-map entries a single read will
/// fetch before treating the object as corrupted/overflowing, per
/// spec.md §9 ("hard-coded in the source at 1024; treat as a
/// configuration parameter with that default").
pub const DEFAULT_NODE_MAP_CAP: usize = 1024;

/// Outcome of [`GraceEngine::create`]: the host path treats both
/// variants as success; the admin CLI distinguishes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object did not exist and was created.
    Created,
    /// The object already existed; no change was made.
    AlreadyExisted,
}

/// Flavor of [`GraceEngine::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// The read-mostly variant invoked at ordinary server startup: does
    /// not start a grace period that is not already in force.
    Normal,
    /// The force-start flavor used on clean shutdown or a host-requested
    /// start: equivalent to `start` for this single node, and also
    /// marks the node as locally enforcing.
    Force,
}

/// The result of [`GraceEngine::dump`].
#[derive(Debug, Clone)]
pub struct GraceDump {
    /// Current epoch.
    pub current_epoch: u64,
    /// Reclaim epoch (`0` if no grace period is in force).
    pub reclaim_epoch: u64,
    /// Node-map entries, keyed by nodeid.
    pub nodes: BTreeMap<String, NodeFlags>,
}

struct FullState {
    data: GraceData,
    nodes: BTreeMap<String, NodeFlags>,
    version: Version,
}

/// The grace-period protocol engine, generic over the object-store
/// client it is bound to.
pub struct GraceEngine<C: ObjectStoreClient> {
    client: C,
    oid: String,
    node_map_cap: usize,
    retry: RetryPolicy,
}

impl<C: ObjectStoreClient> GraceEngine<C> {
    /// Bind the engine to `client`, operating on the grace object named
    /// `oid`, with the default node-map cap and an unbounded retry
    /// policy.
    pub fn new(client: C, oid: impl Into<String>) -> Self {
        GraceEngine {
            client,
            oid: oid.into(),
            node_map_cap: DEFAULT_NODE_MAP_CAP,
            retry: RetryPolicy::default(),
        }
    }

    /// Convert this engine into one using the given node-map cap.
    pub fn with_node_map_cap(self, cap: usize) -> Self {
        GraceEngine {
            node_map_cap: cap,
            ..self
        }
    }

    /// Convert this engine into one using the given retry policy.
    pub fn with_retry_policy(self, retry: RetryPolicy) -> Self {
        GraceEngine { retry, ..self }
    }

    /// The grace-object name this engine is bound to.
    pub fn oid(&self) -> &str {
        &self.oid
    }

    async fn read_full(&self) -> Result<FullState> {
        let r = self
            .client
            .read_op(&self.oid, None, self.node_map_cap)
            .await?;
        if r.more {
            return Err(Error::new(
                ErrorKind::Corruption,
                format!("node map scan found more than {} entries", self.node_map_cap),
            ));
        }
        let data = GraceData::decode(&r.data)
            .map_err(|e| Error::new(ErrorKind::Corruption, e.to_string()))?;
        let nodes = r
            .omap
            .into_iter()
            .map(|(k, v)| (k, NodeFlags::decode(&v)))
            .collect();
        Ok(FullState {
            data,
            nodes,
            version: r.version,
        })
    }

    async fn commit(&self, op: WriteOp) -> std::result::Result<Version, ObjectError> {
        self.client.write_op(&self.oid, op).await
    }

    async fn notify_best_effort(&self) {
        if let Err(e) = self.client.notify(&self.oid).await {
            log::warn!("notify on {} failed (ignored): {}", self.oid, e);
        }
    }

    /// Create the grace object if absent, with `C=1, R=0` and an empty
    /// node map. Idempotent against "already exists".
    pub async fn create(&self) -> Result<CreateOutcome> {
        let op = WriteOp {
            create: Some(CreateMode::Exclusive),
            data: Some(GraceData::INITIAL.encode().to_vec()),
            omap_clear: true,
            ..Default::default()
        };
        match self.commit(op).await {
            Ok(_) => {
                log::debug!("created grace object {}", self.oid);
                Ok(CreateOutcome::Created)
            }
            Err(ObjectError::AlreadyExists) => Ok(CreateOutcome::AlreadyExisted),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the current `(C, R)` pair.
    pub async fn epochs(&self) -> Result<(u64, u64)> {
        let r = self.client.read_op(&self.oid, None, 0).await?;
        let data = GraceData::decode(&r.data)
            .map_err(|e| Error::new(ErrorKind::Corruption, e.to_string()))?;
        Ok((data.current_epoch, data.reclaim_epoch))
    }

    /// Read the data payload plus up to the configured cap of node-map
    /// entries.
    pub async fn dump(&self) -> Result<GraceDump> {
        let full = self.read_full().await?;
        Ok(GraceDump {
            current_epoch: full.data.current_epoch,
            reclaim_epoch: full.data.reclaim_epoch,
            nodes: full.nodes,
        })
    }

    /// Begin (or re-enter) a grace period on behalf of `nodeids`.
    pub async fn start(&self, nodeids: &[String]) -> Result<(u64, u64)> {
        let mut attempt = 0;
        loop {
            let full = self.read_full().await?;
            let mut data = full.data;
            if data.reclaim_epoch == 0 {
                data.reclaim_epoch = data.current_epoch;
                data.current_epoch += 1;
            }

            let mut nodes = full.nodes;
            let mut omap_set = Vec::with_capacity(nodeids.len());
            for id in nodeids {
                let mut flags = nodes.get(id).copied().unwrap_or(NodeFlags::NONE);
                flags.set_needs_grace(true);
                nodes.insert(id.clone(), flags);
                omap_set.push((id.clone(), flags.encode().to_vec()));
            }

            let op = WriteOp {
                data: Some(data.encode().to_vec()),
                omap_set,
                assert_version: Some(full.version),
                ..Default::default()
            };
            match self.commit(op).await {
                Ok(_) => {
                    self.notify_best_effort().await;
                    return Ok((data.current_epoch, data.reclaim_epoch));
                }
                Err(ObjectError::VersionMismatch) => {
                    self.retry.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The node-local variant invoked at server startup.
    pub async fn join(&self, nodeid: &str, mode: JoinMode) -> Result<(u64, u64)> {
        let mut attempt = 0;
        loop {
            let full = self.read_full().await?;

            if full.data.reclaim_epoch == 0 && mode == JoinMode::Normal {
                return Ok((full.data.current_epoch, 0));
            }

            let mut data = full.data;
            if data.reclaim_epoch == 0 {
                // Force-start: equivalent to `start` for this single node.
                data.reclaim_epoch = data.current_epoch;
                data.current_epoch += 1;
            }

            let mut flags = full.nodes.get(nodeid).copied().unwrap_or(NodeFlags::NONE);
            flags.set_needs_grace(true);
            if mode == JoinMode::Force {
                flags.set_enforcing(true);
            }

            let op = WriteOp {
                data: Some(data.encode().to_vec()),
                omap_set: vec![(nodeid.to_string(), flags.encode().to_vec())],
                assert_version: Some(full.version),
                ..Default::default()
            };
            match self.commit(op).await {
                Ok(_) => {
                    self.notify_best_effort().await;
                    return Ok((data.current_epoch, data.reclaim_epoch));
                }
                Err(ObjectError::VersionMismatch) => {
                    self.retry.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Complete the grace period on behalf of `nodeids`.
    ///
    /// A listed nodeid's key is removed entirely once its `N` flag
    /// clears and no other flag remains set (the removal flavor of the
    /// Open Question in spec.md §9); a key that still carries `M` or
    /// `E` is kept with `N` cleared.
    pub async fn lift(&self, nodeids: &[String]) -> Result<(u64, u64)> {
        let mut attempt = 0;
        loop {
            let full = self.read_full().await?;

            if full.data.reclaim_epoch == 0 {
                if !full.nodes.is_empty() {
                    return Err(Error::new(
                        ErrorKind::Corruption,
                        "R == 0 but the node map is not empty",
                    ));
                }
                return Ok((full.data.current_epoch, 0));
            }

            let mut nodes = full.nodes;
            let mut omap_set = Vec::new();
            let mut omap_rm = Vec::new();
            for id in nodeids {
                if let Some(flags) = nodes.get(id).copied() {
                    let mut updated = flags;
                    updated.set_needs_grace(false);
                    if updated.is_empty() {
                        nodes.remove(id);
                        omap_rm.push(id.clone());
                    } else {
                        nodes.insert(id.clone(), updated);
                        omap_set.push((id.clone(), updated.encode().to_vec()));
                    }
                }
                // Absent nodeid: historically a no-op (spec.md §9).
            }

            let mut data = full.data;
            if !nodes.values().any(|f| f.needs_grace()) {
                data.reclaim_epoch = 0;
            }

            let op = WriteOp {
                data: Some(data.encode().to_vec()),
                omap_set,
                omap_rm,
                assert_version: Some(full.version),
                ..Default::default()
            };
            match self.commit(op).await {
                Ok(_) => {
                    self.notify_best_effort().await;
                    return Ok((data.current_epoch, data.reclaim_epoch));
                }
                Err(ObjectError::VersionMismatch) => {
                    self.retry.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The node-local equivalent of `lift` for a single node.
    pub async fn done(&self, nodeid: &str) -> Result<(u64, u64)> {
        self.lift(std::slice::from_ref(&nodeid.to_string())).await
    }

    /// Returns `true` iff `nodeid`'s key is present with `M = true`.
    pub async fn member(&self, nodeid: &str) -> Result<bool> {
        let full = self.read_full().await?;
        Ok(full.nodes.get(nodeid).map(|f| f.member()).unwrap_or(false))
    }

    /// Mark `nodeid` as currently enforcing grace locally.
    pub async fn enforcing_on(&self, nodeid: &str) -> Result<(u64, u64)> {
        self.set_enforcing(nodeid, true).await
    }

    /// Mark `nodeid` as no longer enforcing grace locally.
    pub async fn enforcing_off(&self, nodeid: &str) -> Result<(u64, u64)> {
        self.set_enforcing(nodeid, false).await
    }

    async fn set_enforcing(&self, nodeid: &str, value: bool) -> Result<(u64, u64)> {
        let mut attempt = 0;
        loop {
            let full = self.read_full().await?;
            let mut flags = full.nodes.get(nodeid).copied().unwrap_or(NodeFlags::NONE);
            flags.set_enforcing(value);
            let op = if flags.is_empty() {
                WriteOp {
                    omap_rm: vec![nodeid.to_string()],
                    assert_version: Some(full.version),
                    ..Default::default()
                }
            } else {
                WriteOp {
                    omap_set: vec![(nodeid.to_string(), flags.encode().to_vec())],
                    assert_version: Some(full.version),
                    ..Default::default()
                }
            };
            match self.commit(op).await {
                Ok(_) => {
                    self.notify_best_effort().await;
                    return Ok((full.data.current_epoch, full.data.reclaim_epoch));
                }
                Err(ObjectError::VersionMismatch) => {
                    self.retry.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Returns the current `E` flag for `nodeid`.
    pub async fn enforcing_check(&self, nodeid: &str) -> Result<bool> {
        let full = self.read_full().await?;
        Ok(full
            .nodes
            .get(nodeid)
            .map(|f| f.enforcing())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object_store::memory::MemoryObjectStore;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn new_engine() -> GraceEngine<MemoryObjectStore> {
        let engine = GraceEngine::new(MemoryObjectStore::new(), "grace");
        assert_eq!(engine.create().await.unwrap(), CreateOutcome::Created);
        engine
    }

    #[tokio::test]
    async fn test_scenario_single_node_boot_no_grace() {
        let engine = new_engine().await;
        assert_eq!(engine.join("a", JoinMode::Normal).await.unwrap(), (1, 0));
        assert_eq!(engine.epochs().await.unwrap(), (1, 0));
        assert_eq!(engine.done("a").await.unwrap(), (1, 0));
        assert_eq!(engine.epochs().await.unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn test_scenario_admin_start_then_complete() {
        let engine = new_engine().await;
        let (c, r) = engine.start(&ids(&["a"])).await.unwrap();
        assert_eq!((c, r), (2, 1));
        let dump = engine.dump().await.unwrap();
        assert!(dump.nodes.get("a").unwrap().needs_grace());

        let (c, r) = engine.done("a").await.unwrap();
        assert_eq!((c, r), (2, 0));
        let dump = engine.dump().await.unwrap();
        assert!(dump.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_two_node_staggered_completion() {
        let engine = new_engine().await;
        assert_eq!(engine.start(&ids(&["a", "b"])).await.unwrap(), (2, 1));

        assert_eq!(engine.done("a").await.unwrap(), (2, 1));
        let dump = engine.dump().await.unwrap();
        assert!(!dump.nodes.contains_key("a"));
        assert!(dump.nodes.get("b").unwrap().needs_grace());

        assert_eq!(engine.done("b").await.unwrap(), (2, 0));
        assert!(engine.dump().await.unwrap().nodes.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_join_during_active_grace() {
        let engine = new_engine().await;
        assert_eq!(engine.start(&ids(&["a"])).await.unwrap(), (2, 1));
        assert_eq!(engine.join("b", JoinMode::Normal).await.unwrap(), (2, 1));
        assert!(engine.dump().await.unwrap().nodes.get("b").unwrap().needs_grace());

        assert_eq!(engine.done("a").await.unwrap(), (2, 1));
        assert_eq!(engine.done("b").await.unwrap(), (2, 0));
    }

    #[tokio::test]
    async fn test_scenario_concurrent_starts() {
        let engine = new_engine().await;
        let a = engine.start(&ids(&["a"]));
        let b = engine.start(&ids(&["b"]));
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), (2, 1));
        assert_eq!(rb.unwrap(), (2, 1));

        let dump = engine.dump().await.unwrap();
        assert_eq!(dump.current_epoch, 2);
        assert_eq!(dump.reclaim_epoch, 1);
        assert!(dump.nodes.contains_key("a"));
        assert!(dump.nodes.contains_key("b"));
    }

    #[tokio::test]
    async fn test_corruption_bad_payload_size() {
        let store = MemoryObjectStore::new();
        let engine = GraceEngine::new(store.clone(), "grace");
        engine.create().await.unwrap();
        // Truncate the payload out of band, as if corrupted externally.
        store
            .write_op(
                "grace",
                WriteOp {
                    data: Some(vec![0u8; 8]),
                    assert_version: Some(Version(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let err = engine.epochs().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
    }

    #[tokio::test]
    async fn test_join_force_starts_grace_and_enforces() {
        let engine = new_engine().await;
        let (c, r) = engine.join("a", JoinMode::Force).await.unwrap();
        assert_eq!((c, r), (2, 1));
        let dump = engine.dump().await.unwrap();
        let flags = dump.nodes.get("a").unwrap();
        assert!(flags.needs_grace());
        assert!(flags.enforcing());
    }

    #[tokio::test]
    async fn test_lift_idempotent_on_no_grace() {
        let engine = new_engine().await;
        assert_eq!(engine.lift(&ids(&["a"])).await.unwrap(), (1, 0));
        assert_eq!(engine.lift(&ids(&["a"])).await.unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn test_done_on_absent_nodeid_is_noop() {
        let engine = new_engine().await;
        engine.start(&ids(&["a"])).await.unwrap();
        let (c, r) = engine.done("nonexistent").await.unwrap();
        assert_eq!((c, r), (2, 1));
        assert!(engine.dump().await.unwrap().nodes.contains_key("a"));
    }

    #[tokio::test]
    async fn test_member_and_enforcing_roundtrip() {
        let engine = new_engine().await;
        engine.start(&ids(&["a"])).await.unwrap();
        assert!(!engine.member("a").await.unwrap());
        assert!(!engine.enforcing_check("a").await.unwrap());

        engine.enforcing_on("a").await.unwrap();
        assert!(engine.enforcing_check("a").await.unwrap());

        engine.enforcing_off("a").await.unwrap();
        assert!(!engine.enforcing_check("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_enforcing_off_removes_all_false_node_after_lift() {
        let engine = new_engine().await;
        engine.start(&ids(&["a"])).await.unwrap();
        engine.enforcing_on("a").await.unwrap();

        let (_, r) = engine.done("a").await.unwrap();
        assert_eq!(r, 0);
        assert!(engine.dump().await.unwrap().nodes.contains_key("a"));

        engine.enforcing_off("a").await.unwrap();
        assert!(
            !engine.dump().await.unwrap().nodes.contains_key("a"),
            "node map must not retain an all-false entry once R == 0"
        );

        // A later start/lift cycle at R == 0 must not see a stray entry
        // and must not spuriously report corruption.
        engine.start(&ids(&["b"])).await.unwrap();
        let (_, r) = engine.done("b").await.unwrap();
        assert_eq!(r, 0);
        assert!(engine.dump().await.unwrap().nodes.is_empty());
    }

    #[tokio::test]
    async fn test_create_already_exists() {
        let engine = new_engine().await;
        assert_eq!(
            engine.create().await.unwrap(),
            CreateOutcome::AlreadyExisted
        );
    }

    #[tokio::test]
    async fn test_start_idempotent_once_active() {
        let engine = new_engine().await;
        assert_eq!(engine.start(&ids(&["a"])).await.unwrap(), (2, 1));
        // R was already > 0 so a second start only merges membership.
        assert_eq!(engine.start(&ids(&["a"])).await.unwrap(), (2, 1));
    }

    #[tokio::test]
    async fn test_node_map_overflow_is_corruption() {
        let engine = GraceEngine::new(MemoryObjectStore::new(), "grace").with_node_map_cap(1);
        engine.create().await.unwrap();
        engine.start(&ids(&["a", "b"])).await.unwrap();
        let err = engine.dump().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
    }
}
