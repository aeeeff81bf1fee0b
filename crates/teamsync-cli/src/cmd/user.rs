use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use teamsync_core::Role;

#[derive(Subcommand)]
pub enum UserSubcommand {
    /// List users, ordered by name
    List {
        /// Only users with this role (admin, user, ...)
        #[arg(long)]
        role: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: UserSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        UserSubcommand::List { role } => list(root, role, json),
    }
}

fn list(root: &Path, role: Option<String>, json: bool) -> anyhow::Result<()> {
    let service = super::open_service(root)?;
    let role = role.map(Role::from);
    let users = service
        .users()
        .list(role.as_ref())
        .context("failed to list users")?;

    if json {
        print_json(&users)?;
        return Ok(());
    }

    if users.is_empty() {
        println!("No users.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = users
        .iter()
        .map(|u| vec![u.id.clone(), u.name.clone(), u.role.to_string()])
        .collect();
    print_table(&["ID", "NAME", "ROLE"], rows);
    Ok(())
}
