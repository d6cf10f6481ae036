/*
 * This file is part of lsstor.
 *
 * Copyright (C) 2025 lsstor contributors
 *
 * lsstor is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lsstor is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lsstor. If not, see <https://www.gnu.org/licenses/>.
 */

use std::io::{self, Write};
use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, warn};

use lsstor::cli::Cli;
use lsstor::config::{self, Settings};
use lsstor::logger;
use lsstor::output;
use lsstor::topology::{Topology, TopologyRecord};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init_logging(cli.verbose);

    let warnings = match cli.validate() {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    for w in warnings {
        warn!("{}", w);
    }

    let saved = match config::load_saved_config() {
        Ok(c) => c,
        Err(e) => {
            warn!("ignoring config file: {}", e);
            None
        }
    };
    let settings = Settings::resolve(saved.as_ref(), &cli.overrides());
    debug!(
        "sysfs root {}, dev root {}, lunhex {}",
        settings.sysfs_root.display(),
        settings.dev_root.display(),
        settings.lunhex
    );

    let filter = match cli.address_filter() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: bad filter: {}", e);
            process::exit(1);
        }
    };

    let topo = Topology::with_options(&settings, cli.enrich_options());
    let sections = output::collect_sections(&topo, &filter, cli.hosts, cli.no_nvme);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.json_output() {
        let borrowed: Vec<(&str, &[TopologyRecord])> =
            sections.iter().map(|(k, v)| (*k, v.as_slice())).collect();
        match cli.json_file() {
            Some(path) => output::write_json_file(path, &borrowed)
                .with_context(|| format!("unable to write JSON to {}", path.display()))?,
            None => output::write_json(&mut out, &borrowed).context("failed to write JSON listing")?,
        }
    } else {
        let opts = cli.output_options(&settings);
        for (_, records) in &sections {
            output::write_text(&mut out, records, &opts).context("failed to write listing")?;
        }
    }
    out.flush()?;
    Ok(())
}
