use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use teamsync_core::{NewTeam, Team};

#[derive(Subcommand)]
pub enum TeamSubcommand {
    /// List teams, oldest first
    List {
        /// Only teams with this member
        #[arg(long)]
        member: Option<String>,
    },
    /// Show a team with its questions and answers
    Show { id: String },
    /// Create a team
    Create {
        name: String,
        #[arg(long)]
        category: String,
        /// Question text (repeatable: --question "Goal?" --question "Risks?")
        #[arg(long = "question", required = true)]
        questions: Vec<String>,
        /// Member user id (repeatable)
        #[arg(long = "member", required = true)]
        members: Vec<String>,
    },
    /// Delete a team with all its members and answers
    Delete { id: String },
}

pub fn run(root: &Path, subcmd: TeamSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TeamSubcommand::List { member } => list(root, member.as_deref(), json),
        TeamSubcommand::Show { id } => show(root, &id, json),
        TeamSubcommand::Create {
            name,
            category,
            questions,
            members,
        } => create(
            root,
            NewTeam {
                name,
                category,
                questions,
                member_ids: members,
            },
            json,
        ),
        TeamSubcommand::Delete { id } => delete(root, &id, json),
    }
}

fn list(root: &Path, member: Option<&str>, json: bool) -> anyhow::Result<()> {
    let service = super::open_service(root)?;
    let teams = match member {
        Some(m) => service.teams_for_member(m),
        None => service.list_teams(),
    }
    .context("failed to list teams")?;

    if json {
        print_json(&teams)?;
        return Ok(());
    }

    if teams.is_empty() {
        println!("No teams.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = teams
        .iter()
        .map(|t| {
            vec![
                t.id.clone(),
                t.name.clone(),
                t.category.clone(),
                t.questions.len().to_string(),
                t.members.len().to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "CATEGORY", "QUESTIONS", "MEMBERS"], rows);
    Ok(())
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let service = super::open_service(root)?;
    let team = service
        .team(id)
        .with_context(|| format!("failed to read team '{id}'"))?
        .with_context(|| format!("team '{id}' not found"))?;

    if json {
        print_json(&team)?;
        return Ok(());
    }

    print_team(&team);
    Ok(())
}

fn print_team(team: &Team) {
    println!("Team:     {} ({})", team.name, team.category);
    println!("Id:       {}", team.id);
    if let Some(at) = team.created_at {
        println!("Created:  {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("Questions:");
    for (i, q) in team.questions.iter().enumerate() {
        println!("  {i}. {q}");
    }
    println!("Members:");
    if team.members.is_empty() {
        println!("  (none)");
    }
    for member in team.members.values() {
        let done = member.completion(&team.questions);
        println!(
            "  {} ({})  {}/{} answered",
            member.name, member.id, done.answered, done.total
        );
        for (idx, answer) in &member.answers {
            let marker = if *idx < team.questions.len() { "" } else { "  [orphaned]" };
            println!("    {idx}: {}{marker}", answer.text);
        }
    }
}

fn create(root: &Path, new: NewTeam, json: bool) -> anyhow::Result<()> {
    let service = super::open_service(root)?;
    let team = service.create_team(new).context("failed to create team")?;

    if json {
        print_json(&team)?;
    } else {
        println!("Created team '{}' ({}).", team.name, team.id);
    }
    Ok(())
}

fn delete(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let service = super::open_service(root)?;
    let deleted = service
        .delete_team(id)
        .with_context(|| format!("failed to delete team '{id}'"))?;

    if json {
        print_json(&serde_json::json!({ "id": id, "deleted": deleted }))?;
    } else if deleted {
        println!("Deleted team '{id}'.");
    } else {
        println!("Team '{id}' does not exist.");
    }
    Ok(())
}
