//! `check-config`: parses the directive file and reports what each
//! replica resolved to, without opening any connection.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::config;

pub fn run(config_path: &Path) -> Result<()> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;

    let directives = match syncrepl_config::parse_config(&text) {
        Ok(d) => d,
        Err(err) => bail!("{}: {err}", config_path.display()),
    };

    if directives.is_empty() {
        println!("no replica directives found in {}", config_path.display());
        return Ok(());
    }

    for directive in &directives {
        let resolved = config::resolve(directive.clone());
        println!(
            "rid={:<4} provider={:<30} searchbase={:<30} protocol={:?} syncdata={:?} interval={}s context={}",
            directive.rid,
            directive.provider,
            directive.search.base,
            directive.protocol,
            directive.syncdata,
            directive.interval.as_secs(),
            resolved.context_dn,
        );
    }

    println!("{} replica directive(s) ok", directives.len());
    Ok(())
}
