use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum MemberSubcommand {
    /// Add a user to a team
    Add { team: String, user: String },
    /// Remove a member from a team
    Remove { team: String, member: String },
}

pub fn run(root: &Path, subcmd: MemberSubcommand, json: bool) -> anyhow::Result<()> {
    let service = super::open_service(root)?;
    match subcmd {
        MemberSubcommand::Add { team, user } => {
            let member = service
                .add_member(&team, &user)
                .with_context(|| format!("failed to add '{user}' to team '{team}'"))?;
            if json {
                print_json(&member)?;
            } else {
                println!("Added {} ({}) to team '{team}'.", member.name, member.id);
            }
        }
        MemberSubcommand::Remove { team, member } => {
            let removed = service
                .remove_member(&team, &member)
                .with_context(|| format!("failed to remove '{member}' from team '{team}'"))?;
            if json {
                print_json(&serde_json::json!({ "team": team, "member": member, "removed": removed }))?;
            } else if removed {
                println!("Removed '{member}' from team '{team}'.");
            } else {
                println!("'{member}' is not a member of team '{team}'.");
            }
        }
    }
    Ok(())
}
