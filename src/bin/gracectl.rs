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

//! `gracectl`: the thin admin CLI that drives the grace protocol engine.
//!
//! No production `ObjectStoreClient` backend is implemented by this
//! crate (the distributed object store is consumed, not implemented,
//! per the protocol's own external-interfaces section); this binary
//! drives the same in-process reference store the test suite uses, so
//! it doubles as a way to exercise the protocol by hand. A deployment
//! wiring a real backend in would swap the client construction below.

use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::Parser;

use nfs_grace::config::Config;
use nfs_grace::grace::GraceEngine;
use nfs_grace::object_store::memory::MemoryObjectStore;
use nfs_grace::object_store::NodeFlags;
use nfs_grace::sync::SyncGraceEngine;
use nfs_grace::{Error, ErrorKind, Result};

#[derive(Parser)]
#[command(name = "gracectl", about = "Inspect and drive the NFS grace-period protocol engine")]
struct Cli {
    /// Lift the grace period for the listed nodeids instead of starting one.
    #[arg(short = 'l', long = "lift")]
    lift: bool,

    /// Decimal nodeids (< UINT32_MAX) to start or lift grace for.
    nodeids: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gracectl: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let nodeids = cli
        .nodeids
        .iter()
        .map(|s| parse_numeric_nodeid(s))
        .collect::<Result<Vec<_>>>()?;

    let config = Config::load()?;
    let store = MemoryObjectStore::new();
    let engine = SyncGraceEngine::new(GraceEngine::new(store, config.grace_object.clone()));

    engine.create()?;

    if cli.lift {
        if !nodeids.is_empty() {
            engine.lift(&nodeids)?;
        }
    } else if !nodeids.is_empty() {
        engine.start(&nodeids)?;
    }

    let dump = engine.dump()?;
    print_dump(dump.current_epoch, dump.reclaim_epoch, &dump.nodes);
    Ok(())
}

/// The CLI's numeric nodeid flavor: a decimal integer strictly less
/// than `UINT32_MAX`.
fn parse_numeric_nodeid(s: &str) -> Result<String> {
    let value: u64 = s
        .parse()
        .map_err(|_| Error::new(ErrorKind::InvalidNodeId, format!("{} is not a decimal integer", s)))?;
    if value >= u32::MAX as u64 {
        return Err(Error::new(
            ErrorKind::InvalidNodeId,
            format!("{} is not less than UINT32_MAX", s),
        ));
    }
    Ok(value.to_string())
}

fn print_dump(current_epoch: u64, reclaim_epoch: u64, nodes: &BTreeMap<String, NodeFlags>) {
    println!("epoch: C={} R={}", current_epoch, reclaim_epoch);
    if nodes.is_empty() {
        println!("node map: (empty)");
        return;
    }
    println!("node map:");
    for (nodeid, flags) in nodes {
        println!(
            "  {:>10}  M={} E={} N={}",
            nodeid,
            flags.member(),
            flags.enforcing(),
            flags.needs_grace()
        );
    }
}
