//! `start`: runs every configured replica until interrupted.
//!
//! Replicas that share a `context_dn` (spec §5 "shared-resource policy":
//! multiple replicas writing into the same local database) share one
//! [`CookieState`] and one [`CookiePersistor`], matching the guarantee
//! the session machine assumes when staging and committing CSNs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use syncrepl_csn::CookieState;
use syncrepl_persist::CookiePersistor;
use syncrepl_scheduler::{Scheduler, SchedulerConfig};
use tracing::info;

use crate::config;
use crate::runtime::{self, NullBackend};

pub fn run(config_path: &Path, workers: Option<usize>) -> Result<()> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;

    let directives = match syncrepl_config::parse_config(&text) {
        Ok(d) => d,
        Err(err) => bail!("{}: {err}", config_path.display()),
    };
    if directives.is_empty() {
        bail!("{}: no replica directives found", config_path.display());
    }

    let backend = Arc::new(NullBackend);
    let mut cookie_states: HashMap<String, Arc<CookieState>> = HashMap::new();
    let mut persistors: HashMap<String, Arc<CookiePersistor>> = HashMap::new();

    let mut scheduler = Scheduler::new(SchedulerConfig {
        worker_count: workers.unwrap_or_else(|| SchedulerConfig::default().worker_count),
    });
    scheduler.start();

    for directive in directives {
        let rid = directive.rid;
        let resolved = config::resolve(directive);

        let persistor = persistors
            .entry(resolved.context_dn.clone())
            .or_insert_with(|| Arc::new(CookiePersistor::new(resolved.context_dn.clone())))
            .clone();

        let cookie_state = cookie_states
            .entry(resolved.context_dn.clone())
            .or_insert_with(|| runtime::initial_cookie_state(&persistor, &backend))
            .clone();

        let task = runtime::build_task(resolved, backend.clone(), cookie_state, persistor);
        info!(rid, "registering replica");
        scheduler.register(task, std::time::Duration::ZERO);
    }

    info!(workers = scheduler.worker_count(), "syncrepl running, press Ctrl+C to stop");

    let shutdown_signal = Arc::new(AtomicBool::new(false));
    {
        let shutdown_signal = shutdown_signal.clone();
        ctrlc::set_handler(move || shutdown_signal.store(true, Ordering::Release))
            .context("installing Ctrl+C handler")?;
    }
    while !shutdown_signal.load(Ordering::Acquire) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    info!("shutting down");
    scheduler.shutdown();
    Ok(())
}
