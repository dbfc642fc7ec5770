use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Table};
use serde::Serialize;

use crate::context::{ConnectArgs, LinkContext, TopologyArgs};
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &str = "\
Examples:
  linkdb probe topology.toml reporting   Link 'reporting' only if the server has it";

#[derive(Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub topology: TopologyArgs,

    /// Database to look for
    pub database: String,

    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    database: String,
    linked: bool,
    collections: Vec<String>,
}

impl TableDisplay for ProbeReport {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table();
        output.add_table_header(&mut table, &["Database", "Linked", "Collections"]);
        table.add_row(vec![
            Cell::new(&self.database),
            Cell::new(if self.linked { "yes" } else { "no" }),
            Cell::new(self.collections.join(", ")),
        ]);
        table
    }
}

pub async fn handle_probe(args: ProbeArgs, output: &OutputManager) -> Result<()> {
    let ctx = LinkContext::new(&args.topology, &args.connect)?;

    output.progress("Linking topology");
    let initialized = ctx.manager.initialize(&ctx.topology).await;
    output.clear_line();
    if let Err(err) = initialized {
        output.error(&err.to_string());
        return Err(err.into());
    }

    output.verbose(&format!("Looking for '{}'", args.database));
    let linked = ctx.manager.link_database_if_exists(&args.database).await?;

    let report = ProbeReport {
        collections: ctx.manager.get_collection_names(Some(&args.database)),
        database: args.database,
        linked,
    };
    output.display(&report)?;

    if report.linked {
        output.success(&format!("'{}' is linked", report.database));
    } else {
        output.info(&format!("'{}' does not exist, nothing was created", report.database));
    }
    Ok(())
}
