use std::collections::BTreeSet;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Table};
use linkdb::{CONTROL_NAMES, Topology, is_reserved};
use serde::Serialize;

use crate::context::{TopologyArgs, load_topology};
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &str = "\
Examples:
  linkdb check topology.toml                 Show databases, collections and indexes
  linkdb --output json check topology.json   Machine-readable plan";

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub topology: TopologyArgs,
}

#[derive(Debug, Serialize)]
struct CollectionPlan {
    database: String,
    address: String,
    collection: String,
    indexes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Plan {
    collections: Vec<CollectionPlan>,
    /// Names the alias namespace would refuse, in linking order.
    conflicts: Vec<String>,
    skipped: Vec<String>,
}

impl Plan {
    fn from_topology(topology: &Topology) -> Self {
        let defaults = topology.default_target();
        let mut claimed: BTreeSet<String> = CONTROL_NAMES.iter().map(|name| name.to_string()).collect();
        let mut collections = Vec::new();
        let mut conflicts = Vec::new();
        let mut skipped = Vec::new();

        let mut claim = |name: &str, path: String, conflicts: &mut Vec<String>| {
            if !claimed.insert(name.to_string()) {
                conflicts.push(format!("'{name}' is already taken, use {path}"));
            }
        };

        for (database, defs) in &topology.databases {
            if is_reserved(database) {
                skipped.push(database.clone());
                continue;
            }
            let target = match topology.overrides.get(database) {
                Some(overrides) => defaults.apply(overrides),
                None => defaults.clone(),
            };
            claim(database, format!("databases.{database}"), &mut conflicts);

            for (collection, specs) in defs {
                if is_reserved(collection) {
                    skipped.push(format!("{database}.{collection}"));
                    continue;
                }
                claim(collection, format!("databases.{database}.{collection}"), &mut conflicts);
                collections.push(CollectionPlan {
                    database: database.clone(),
                    address: format!("{}:{}", target.host, target.port),
                    collection: collection.clone(),
                    indexes: specs.iter().map(|spec| spec.name()).collect(),
                });
            }
        }

        Self {
            collections,
            conflicts,
            skipped,
        }
    }
}

impl TableDisplay for Plan {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table();
        output.add_table_header(&mut table, &["Database", "Address", "Collection", "Indexes"]);
        for plan in &self.collections {
            let indexes = if plan.indexes.is_empty() {
                "-".to_string()
            } else {
                plan.indexes.join(", ")
            };
            table.add_row(vec![
                Cell::new(&plan.database),
                Cell::new(&plan.address),
                Cell::new(&plan.collection),
                Cell::new(indexes),
            ]);
        }
        table
    }
}

pub async fn handle_check(args: CheckArgs, output: &OutputManager) -> Result<()> {
    let topology = load_topology(&args.topology)?;
    output.verbose(&format!("Loaded {}", args.topology.topology.display()));

    let plan = Plan::from_topology(&topology);
    output.heading(&format!("{} database(s)", topology.databases.len()));
    output.display(&plan)?;

    for name in &plan.skipped {
        output.warning(&format!("'{name}' uses a reserved name and will not be managed"));
    }
    for conflict in &plan.conflicts {
        output.warning(conflict);
    }
    output.success("Topology is valid");
    Ok(())
}
