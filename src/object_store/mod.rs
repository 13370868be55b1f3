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

//! The abstract object-store capability the grace protocol engine is
//! built on.
//!
//! The engine never talks to a network itself: it is generic over
//! [`ObjectStoreClient`], a trait covering exactly the capability set
//! spec'd for the external object-store client library (atomic
//! read-modify-write against a single named object, with an unordered
//! key-value sidecar and a best-effort notify/watch channel). Production
//! backends implement this trait; [`memory::MemoryObjectStore`] is the
//! in-process reference implementation used by this crate's own tests.

pub mod memory;
pub mod protocol;

use async_trait::async_trait;
use std::fmt;

pub use protocol::{GraceData, NodeFlags, ProtocolError};

/// Opaque object version, captured at read time and presented back as a
/// write precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u64);

/// Flags controlling an object create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Fail if the object already exists.
    Exclusive,
    /// Succeed whether or not the object already existed.
    Idempotent,
}

/// Result of a [`ObjectStoreClient::read_op`] call.
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// The object's data payload.
    pub data: Vec<u8>,
    /// Node-map entries read, in the order the store returned them.
    pub omap: Vec<(String, Vec<u8>)>,
    /// Whether more omap keys exist beyond the requested limit.
    pub more: bool,
    /// The commit version observed for this read.
    pub version: Version,
}

/// A single write transaction against the grace object: a new data
/// payload and/or a set of omap mutations, conditioned on a version
/// read earlier in the same call.
#[derive(Debug, Clone, Default)]
pub struct WriteOp {
    /// Create the object first, per `create`. `None` means the object
    /// must already exist.
    pub create: Option<CreateMode>,
    /// Replace the full data payload.
    pub data: Option<Vec<u8>>,
    /// Clear the node map before applying `omap_set`/`omap_rm`.
    pub omap_clear: bool,
    /// Keys to insert or update, with their value blobs.
    pub omap_set: Vec<(String, Vec<u8>)>,
    /// Keys to remove.
    pub omap_rm: Vec<String>,
    /// Remove the object entirely (mutually exclusive with the above).
    pub remove: bool,
    /// Version precondition. `None` only valid together with `create =
    /// Some(Exclusive)` against an object known not to exist yet.
    pub assert_version: Option<Version>,
}

/// Errors an [`ObjectStoreClient`] call can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// Exclusive create on an object that already exists.
    AlreadyExists,
    /// The named object does not exist.
    NoSuchObject,
    /// The write's `assert_version` no longer matched the object.
    VersionMismatch,
    /// The call exceeded its configured timeout.
    Timeout,
    /// Any other transport-level failure.
    Transport(String),
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectError::AlreadyExists => write!(f, "already exists"),
            ObjectError::NoSuchObject => write!(f, "no such object"),
            ObjectError::VersionMismatch => write!(f, "version mismatch"),
            ObjectError::Timeout => write!(f, "timed out"),
            ObjectError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for ObjectError {}

/// A watch cookie identifying an active subscription, to be passed back
/// to `unwatch`/`notify_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchCookie(pub u64);

/// The capability set required from the object-store client, as
/// specified in spec.md §6: atomic read-modify-write of a single named
/// object's data payload plus its omap sidecar, version-conditional
/// writes, and a best-effort notify/watch channel.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Read the data payload and up to `limit` node-map keys (starting
    /// after `start`, if given) for `oid` in one atomic operation.
    async fn read_op(
        &self,
        oid: &str,
        omap_start: Option<&str>,
        omap_limit: usize,
    ) -> Result<ReadResult, ObjectError>;

    /// Execute a write transaction atomically against `oid`.
    async fn write_op(&self, oid: &str, op: WriteOp) -> Result<Version, ObjectError>;

    /// Best-effort broadcast that `oid`'s state changed. Failures are
    /// never fatal to the caller.
    async fn notify(&self, oid: &str) -> Result<(), ObjectError>;

    /// Subscribe to notifies on `oid`. The callback runs on whatever
    /// context the client provides and must be safe to call
    /// concurrently with other engine calls.
    async fn watch(
        &self,
        oid: &str,
        callback: WatchCallback,
    ) -> Result<WatchCookie, ObjectError>;

    /// Acknowledge a received notify.
    async fn notify_ack(&self, oid: &str, cookie: WatchCookie) -> Result<(), ObjectError>;

    /// Cancel a subscription installed by `watch`.
    async fn unwatch(&self, oid: &str, cookie: WatchCookie) -> Result<(), ObjectError>;
}

/// A watch callback: invoked with no payload beyond "state changed".
pub type WatchCallback = std::sync::Arc<dyn Fn() + Send + Sync>;
