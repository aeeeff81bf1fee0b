use crate::output::print_json;
use anyhow::Context;
use std::path::Path;
use teamsync_core::Identity;

pub fn run(
    root: &Path,
    team: &str,
    member: &str,
    index: usize,
    text: &str,
    identity: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let service = super::open_service(root)?;
    let caller = match identity {
        Some(id) => Some(Identity::new(id, service.users().display_name(id)?)),
        None => None,
    };
    let answer = service
        .record_answer(caller.as_ref(), team, member, index, text)
        .with_context(|| format!("failed to record answer {index} for '{member}'"))?;

    if json {
        print_json(&answer)?;
    } else {
        println!("Recorded answer {index} for '{member}' in team '{team}'.");
    }
    Ok(())
}
