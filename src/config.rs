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

//! Configuration for binding to an object-store backend and a grace
//! object: pool/namespace, grace-object name, nodeid override, and the
//! backend-specific credential map. Environment variables are the base
//! layer; an optional YAML file, named by `GRACE_CONFIG`, overrides them.

use std::collections::HashMap;
use std::env;
use std::fs::File;

use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};

const DEFAULT_GRACE_OBJECT: &str = "grace";

/// Fields as they appear in the optional YAML override file.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    pool: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    grace_object: Option<String>,
    #[serde(default)]
    nodeid: Option<String>,
    #[serde(default)]
    credentials: HashMap<String, String>,
}

/// Fully resolved configuration for binding a [`crate::grace::GraceEngine`]
/// or [`crate::host::HostAdapter`] to an object-store backend.
#[derive(Debug, Clone)]
pub struct Config {
    /// Object-store pool (or equivalent top-level namespace).
    pub pool: String,
    /// Optional sub-namespace within `pool`.
    pub namespace: Option<String>,
    /// Name of the shared grace object.
    pub grace_object: String,
    /// This node's id. Defaults to the local hostname.
    pub nodeid: String,
    /// Backend-specific credentials (endpoint, key id, ...), passed
    /// through verbatim to whatever `ObjectStoreClient` the caller
    /// constructs.
    pub credentials: HashMap<String, String>,
}

impl Config {
    /// Load configuration from `GRACE_*` environment variables, then
    /// apply an optional YAML override file named by `GRACE_CONFIG`.
    ///
    /// `GRACE_POOL` is required (directly or via the override file);
    /// everything else has a default.
    pub fn load() -> Result<Config> {
        let mut file = FileConfig::default();
        if let Ok(path) = env::var("GRACE_CONFIG") {
            file = Self::read_file(&path)?;
        }

        let pool = env::var("GRACE_POOL").ok().or(file.pool).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidConfig,
                "GRACE_POOL is not set and no pool was found in the config file",
            )
        })?;
        let namespace = env::var("GRACE_NAMESPACE").ok().or(file.namespace);
        let grace_object = env::var("GRACE_OBJECT")
            .ok()
            .or(file.grace_object)
            .unwrap_or_else(|| DEFAULT_GRACE_OBJECT.to_string());
        let nodeid = env::var("GRACE_NODEID")
            .ok()
            .or(file.nodeid)
            .or_else(local_hostname)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidConfig,
                    "GRACE_NODEID is not set and the local hostname could not be determined",
                )
            })?;

        let mut credentials = file.credentials;
        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix("GRACE_CRED_") {
                credentials.insert(name.to_lowercase(), value);
            }
        }

        log::debug!(
            "loaded configuration: pool={}, namespace={:?}, grace_object={}, nodeid={}",
            pool,
            namespace,
            grace_object,
            nodeid
        );
        Ok(Config {
            pool,
            namespace,
            grace_object,
            nodeid,
            credentials,
        })
    }

    fn read_file(path: &str) -> Result<FileConfig> {
        let f = File::open(path).map_err(|e| {
            Error::new(
                ErrorKind::InvalidConfig,
                format!("cannot open {}: {}", path, e),
            )
        })?;
        serde_yaml::from_reader(f).map_err(|e| {
            Error::new(
                ErrorKind::InvalidConfig,
                format!("cannot parse {}: {}", path, e),
            )
        })
    }
}

fn local_hostname() -> Option<String> {
    hostname_from_env().or_else(|| {
        std::process::Command::new("hostname")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn hostname_from_env() -> Option<String> {
    env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that
    // touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "GRACE_POOL",
            "GRACE_NAMESPACE",
            "GRACE_OBJECT",
            "GRACE_NODEID",
            "GRACE_CONFIG",
            "HOSTNAME",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_missing_pool_is_invalid_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = Config::load().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_defaults_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("GRACE_POOL", "rados-pool");
        env::set_var("GRACE_NODEID", "node-a");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.pool, "rados-pool");
        assert_eq!(cfg.grace_object, DEFAULT_GRACE_OBJECT);
        assert_eq!(cfg.nodeid, "node-a");
        clear_env();
    }
}
