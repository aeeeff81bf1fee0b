use crate::output::print_json;
use anyhow::Context;
use std::path::Path;

pub fn import(root: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let data: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let service = super::open_service(root)?;
    service.store().import(data).context("import rejected")?;
    let teams = service.list_teams()?.len();
    let users = service.users().list(None)?.len();

    if json {
        print_json(&serde_json::json!({ "teams": teams, "users": users }))?;
    } else {
        println!("Imported {teams} team(s) and {users} user(s).");
    }
    Ok(())
}

pub fn export(root: &Path) -> anyhow::Result<()> {
    let service = super::open_service(root)?;
    let tree = service.store().export().context("failed to export data")?;
    print_json(&tree)
}
