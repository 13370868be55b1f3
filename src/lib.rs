// Copyright 2017 Dmitry Tantsur <divius.inside@gmail.com>
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

//! Coordinated NFSv4 grace-period protocol over a compare-and-swap
//! object store.
//!
//! The grace period across a cluster of stateless NFS server instances
//! is tracked in a single shared object (see [`object_store`]). This
//! crate implements the protocol engine that reads and updates that
//! object ([`grace`]), the adapter binding it to a host server's
//! lifecycle ([`host`]), a blocking facade for either ([`sync`]), and
//! configuration loading ([`config`]).

pub mod config;
pub mod error;
pub mod grace;
pub mod host;
pub mod object_store;
pub mod sync;

pub use error::{Error, ErrorKind, Result};
pub use grace::{CreateOutcome, GraceDump, GraceEngine, JoinMode, RetryPolicy};
pub use host::{ClientDatabases, HostAdapter};
pub use object_store::{GraceData, NodeFlags, ObjectStoreClient};
