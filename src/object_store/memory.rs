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

//! An in-process reference [`ObjectStoreClient`], used by this crate's
//! own test suite and available to downstream integration tests. Not a
//! production backend: a real one would back onto the distributed
//! object store named abstractly in the protocol specification.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    CreateMode, ObjectError, ObjectStoreClient, ReadResult, Version, WatchCallback, WatchCookie,
    WriteOp,
};

#[derive(Debug, Clone, Default)]
struct ObjectState {
    data: Vec<u8>,
    omap: BTreeMap<String, Vec<u8>>,
    version: u64,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, ObjectState>,
    watchers: HashMap<String, Vec<(u64, WatchCallback)>>,
    next_cookie: u64,
}

/// An in-memory [`ObjectStoreClient`] backed by a single mutex-guarded
/// table. Versions are a per-object monotonic counter bumped on every
/// successful write; notify fires registered watch callbacks inline.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryObjectStore {
    async fn read_op(
        &self,
        oid: &str,
        omap_start: Option<&str>,
        omap_limit: usize,
    ) -> Result<ReadResult, ObjectError> {
        let inner = self.inner.lock().await;
        let obj = inner.objects.get(oid).ok_or(ObjectError::NoSuchObject)?;
        // BTreeMap iteration is sorted; skip until strictly past `start`.
        let candidates: Vec<_> = match omap_start {
            Some(start) => obj.omap.range(start.to_string()..).skip(1).collect(),
            None => obj.omap.iter().collect(),
        };
        let mut omap = Vec::new();
        let mut more = false;
        for (k, v) in candidates {
            if omap.len() == omap_limit {
                more = true;
                break;
            }
            omap.push((k.clone(), v.clone()));
        }
        Ok(ReadResult {
            data: obj.data.clone(),
            omap,
            more,
            version: Version(obj.version),
        })
    }

    async fn write_op(&self, oid: &str, op: WriteOp) -> Result<Version, ObjectError> {
        let mut inner = self.inner.lock().await;

        if let Some(mode) = op.create {
            let exists = inner.objects.contains_key(oid);
            if exists && mode == CreateMode::Exclusive {
                return Err(ObjectError::AlreadyExists);
            }
            if !exists {
                inner.objects.insert(oid.to_string(), ObjectState::default());
            }
        }

        let version_matches = {
            let obj = inner.objects.get(oid).ok_or(ObjectError::NoSuchObject)?;
            match op.assert_version {
                Some(Version(v)) => v == obj.version,
                None => true,
            }
        };
        if !version_matches {
            return Err(ObjectError::VersionMismatch);
        }

        if op.remove {
            inner.objects.remove(oid);
            return Ok(Version(0));
        }

        let obj = inner.objects.get_mut(oid).ok_or(ObjectError::NoSuchObject)?;
        if let Some(data) = op.data {
            obj.data = data;
        }
        if op.omap_clear {
            obj.omap.clear();
        }
        for key in op.omap_rm {
            obj.omap.remove(&key);
        }
        for (key, value) in op.omap_set {
            obj.omap.insert(key, value);
        }
        obj.version += 1;
        Ok(Version(obj.version))
    }

    async fn notify(&self, oid: &str) -> Result<(), ObjectError> {
        let inner = self.inner.lock().await;
        if let Some(watchers) = inner.watchers.get(oid) {
            for (_, cb) in watchers {
                cb();
            }
        }
        Ok(())
    }

    async fn watch(
        &self,
        oid: &str,
        callback: WatchCallback,
    ) -> Result<WatchCookie, ObjectError> {
        let mut inner = self.inner.lock().await;
        let cookie = inner.next_cookie;
        inner.next_cookie += 1;
        inner
            .watchers
            .entry(oid.to_string())
            .or_default()
            .push((cookie, callback));
        Ok(WatchCookie(cookie))
    }

    async fn notify_ack(&self, _oid: &str, _cookie: WatchCookie) -> Result<(), ObjectError> {
        Ok(())
    }

    async fn unwatch(&self, oid: &str, cookie: WatchCookie) -> Result<(), ObjectError> {
        let mut inner = self.inner.lock().await;
        if let Some(watchers) = inner.watchers.get_mut(oid) {
            watchers.retain(|(c, _)| *c != cookie.0);
        }
        Ok(())
    }
}
