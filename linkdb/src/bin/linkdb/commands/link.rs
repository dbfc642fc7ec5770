use std::collections::BTreeMap;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Table};
use serde::Serialize;

use crate::context::{ConnectArgs, LinkContext, TopologyArgs};
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &str = "\
Examples:
  linkdb link topology.toml             Create missing collections and indexes
  linkdb link topology.toml --no-wait   Return before index builds finish
  REDIS_URL=redis://10.0.0.5:6379 linkdb link topology.toml";

#[derive(Args)]
pub struct LinkArgs {
    #[command(flatten)]
    pub topology: TopologyArgs,

    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Return as soon as collections exist, without waiting for index builds
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Debug, Serialize)]
pub struct LinkReport {
    pub layout: BTreeMap<String, Vec<String>>,
    pub aliases: Vec<String>,
    pub conflicts: Vec<String>,
}

impl LinkReport {
    pub fn from_context(ctx: &LinkContext) -> Self {
        Self {
            layout: ctx.manager.get_layout(),
            aliases: ctx.manager.aliases(),
            conflicts: ctx.conflict_messages(),
        }
    }
}

impl TableDisplay for LinkReport {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table();
        output.add_table_header(&mut table, &["Database", "Collection", "Alias"]);
        for (database, collections) in &self.layout {
            for collection in collections {
                let alias = if self.aliases.contains(collection) { collection.clone() } else { "-".to_string() };
                table.add_row(vec![Cell::new(database), Cell::new(collection), Cell::new(alias)]);
            }
        }
        table
    }
}

pub async fn handle_link(args: LinkArgs, output: &OutputManager) -> Result<()> {
    let ctx = LinkContext::new(&args.topology, &args.connect)?;
    output.verbose(&format!(
        "Linking {} database(s) under prefix '{}'",
        ctx.topology.databases.len(),
        args.connect.prefix
    ));

    output.progress("Linking databases");
    let linked = ctx.manager.initialize(&ctx.topology).await;
    output.clear_line();

    if !args.no_wait {
        output.progress("Waiting for index builds");
        ctx.manager.settle_indexes().await;
        output.clear_line();
    }

    let report = LinkReport::from_context(&ctx);
    output.display(&report)?;
    for conflict in &report.conflicts {
        output.warning(conflict);
    }
    let failed_indexes = ctx.events.count("index_failed");
    if failed_indexes > 0 {
        output.warning(&format!("{failed_indexes} index build(s) failed, see the log for details"));
    }

    match linked {
        Ok(()) => {
            output.success(&format!("Linked {} database(s)", report.layout.len()));
            Ok(())
        }
        Err(err) => {
            output.error(&err.to_string());
            Err(err.into())
        }
    }
}
