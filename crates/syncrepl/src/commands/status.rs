//! `status`: dumps each configured replica's static settings as JSON.
//!
//! This binary links no concrete transport or storage engine (see
//! [`crate::runtime`]), so there is no live session to report counters
//! from; an embedding application with a real [`syncrepl_session::Transport`]
//! can expose the richer per-replica monitor state spec §7 describes
//! (cookie age, retry budget remaining, last error) by querying its own
//! running [`syncrepl_scheduler::Scheduler`] instead of this command.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::config;

#[derive(Serialize)]
struct ReplicaStatus {
    rid: u16,
    provider: String,
    searchbase: String,
    protocol: String,
    syncdata: String,
    interval_secs: u64,
    retry_exhausted: bool,
    context_dn: String,
}

pub fn run(config_path: &Path) -> Result<()> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;

    let directives = match syncrepl_config::parse_config(&text) {
        Ok(d) => d,
        Err(err) => bail!("{}: {err}", config_path.display()),
    };

    let statuses: Vec<ReplicaStatus> = directives
        .into_iter()
        .map(|directive| {
            let resolved = config::resolve(directive.clone());
            ReplicaStatus {
                rid: directive.rid,
                provider: directive.provider,
                searchbase: directive.search.base,
                protocol: format!("{:?}", directive.protocol),
                syncdata: format!("{:?}", directive.syncdata),
                interval_secs: directive.interval.as_secs(),
                retry_exhausted: directive.retry.is_exhausted(),
                context_dn: resolved.context_dn,
            }
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}
