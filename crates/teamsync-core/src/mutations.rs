//! Team mutations and reads.
//!
//! Each operation touches the narrowest path that expresses it, so writers
//! working on different members or answer slots never overwrite each other.
//! Checks that depend on current state (team exists, member exists) run
//! inside the same batch as the write.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, TeamSyncError};
use crate::identity::Identity;
use crate::paths;
use crate::projection::{Projection, View};
use crate::store::{Batch, EntityStore};
use crate::team::{collect_teams, Answer, Member, Team};
use crate::users::UserDirectory;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewTeam {
    pub name: String,
    pub category: String,
    pub questions: Vec<String>,
    pub member_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// TeamIdGenerator
// ---------------------------------------------------------------------------

/// Time-based team ids that sort in creation order.
///
/// Ids are millisecond timestamps padded to 13 digits; two ids handed out in
/// the same millisecond are bumped so every id is strictly greater than the
/// previous one, or than any id passed to [`TeamIdGenerator::observe`].
#[derive(Debug, Default)]
pub struct TeamIdGenerator {
    last: AtomicU64,
}

impl TeamIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let prev = match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        format!("{:013}", now.max(prev.saturating_add(1)))
    }

    /// Make every later id sort after `id`.
    pub fn observe(&self, id: u64) {
        self.last.fetch_max(id, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// TeamService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TeamService {
    store: EntityStore,
    config: Arc<Config>,
    ids: Arc<TeamIdGenerator>,
}

impl TeamService {
    pub fn new(store: EntityStore, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
            ids: Arc::new(TeamIdGenerator::new()),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn users(&self) -> UserDirectory {
        UserDirectory::new(self.store.clone(), self.config.unknown_member_name.clone())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create a team under a fresh id with the given members and no answers.
    pub fn create_team(&self, new: NewTeam) -> Result<Team> {
        let name = new.name.trim().to_string();
        let category = new.category.trim().to_string();
        if name.is_empty() {
            return Err(invalid("team name is required"));
        }
        if category.is_empty() {
            return Err(invalid("category is required"));
        }
        if !self.config.allows_category(&category) {
            return Err(invalid(format!(
                "unknown category '{category}' (expected one of: {})",
                self.config.categories.join(", ")
            )));
        }

        let questions: Vec<String> = new.questions.iter().map(|q| q.trim().to_string()).collect();
        if questions.is_empty() {
            return Err(invalid("at least one question is required"));
        }
        if let Some(pos) = questions.iter().position(|q| q.is_empty()) {
            return Err(invalid(format!("question {} is blank", pos + 1)));
        }

        let member_ids: Vec<String> = new.member_ids.iter().map(|m| m.trim().to_string()).collect();
        if member_ids.is_empty() {
            return Err(invalid("at least one member is required"));
        }
        let mut seen = HashSet::new();
        for id in &member_ids {
            paths::validate_segment(id)?;
            if !seen.insert(id.as_str()) {
                return Err(invalid(format!("member '{id}' is listed more than once")));
            }
        }

        let created_at = now_millis();
        let team = self.store.batch(|b| {
            if let Some(newest) = newest_team_id(b) {
                self.ids.observe(newest);
            }
            let mut id = self.ids.next_id();
            while b.exists(&paths::team(&id)?) {
                id = self.ids.next_id();
            }
            let mut members = BTreeMap::new();
            for member_id in &member_ids {
                let name = user_name(b, member_id)?
                    .unwrap_or_else(|| self.config.unknown_member_name.clone());
                members.insert(member_id.clone(), Member::new(member_id.clone(), name));
            }
            let team = Team {
                id,
                name,
                category,
                created_at: Some(created_at),
                questions,
                members,
            };
            b.write(&paths::team(&team.id)?, team.to_value());
            Ok(team)
        })?;
        info!(team = %team.id, name = %team.name, members = team.members.len(), "created team");
        Ok(team)
    }

    /// Remove the team and everything under it. `false` if it did not exist.
    pub fn delete_team(&self, team_id: &str) -> Result<bool> {
        let path = paths::team(team_id)?;
        let removed = self.store.remove(&path)?;
        if removed {
            info!(team = %team_id, "deleted team");
        }
        Ok(removed)
    }

    /// Add `user_id` to the team with no answers. Siblings are untouched.
    pub fn add_member(&self, team_id: &str, user_id: &str) -> Result<Member> {
        let team_path = paths::team(team_id)?;
        let member_path = paths::member(team_id, user_id)?;
        let member = self.store.batch(|b| {
            if !b.exists(&team_path) {
                return Err(TeamSyncError::TeamNotFound(team_id.to_string()));
            }
            upgrade_legacy_members(b, team_id)?;
            if b.exists(&member_path) {
                return Err(TeamSyncError::MemberExists {
                    team: team_id.to_string(),
                    member: user_id.to_string(),
                });
            }
            let name = user_name(b, user_id)?
                .unwrap_or_else(|| self.config.unknown_member_name.clone());
            b.patch(&member_path, fields(json!({ "name": name, "answers": {} })))?;
            Ok(Member::new(user_id, name))
        })?;
        info!(team = %team_id, member = %user_id, "added member");
        Ok(member)
    }

    /// Remove one member. `false` if the team or member was not there.
    pub fn remove_member(&self, team_id: &str, member_id: &str) -> Result<bool> {
        let team_path = paths::team(team_id)?;
        let member_path = paths::member(team_id, member_id)?;
        let removed = self.store.batch(|b| {
            if !b.exists(&team_path) {
                return Ok(false);
            }
            upgrade_legacy_members(b, team_id)?;
            Ok(b.remove(&member_path))
        })?;
        if removed {
            info!(team = %team_id, member = %member_id, "removed member");
        }
        Ok(removed)
    }

    /// Store `text` as `member_id`'s answer to question `question_index`.
    ///
    /// Only the member may answer for themselves. Indices past the current
    /// question list are stored but do not count toward completion.
    pub fn record_answer(
        &self,
        caller: Option<&Identity>,
        team_id: &str,
        member_id: &str,
        question_index: usize,
        text: &str,
    ) -> Result<Answer> {
        let Some(caller) = caller else {
            return Err(TeamSyncError::Forbidden("sign in to record answers".into()));
        };
        if caller.id != member_id {
            return Err(TeamSyncError::Forbidden(format!(
                "'{}' cannot answer for '{member_id}'",
                caller.id
            )));
        }
        if text.trim().is_empty() {
            return Err(invalid("answer text is required"));
        }

        let team_path = paths::team(team_id)?;
        let member_path = paths::member(team_id, member_id)?;
        let answer_path = paths::answer(team_id, member_id, question_index)?;
        let answer = Answer {
            question_index,
            text: text.to_string(),
            submitted_at: Some(now_millis()),
        };

        self.store.batch(|b| {
            if !b.exists(&team_path) {
                return Err(TeamSyncError::TeamNotFound(team_id.to_string()));
            }
            upgrade_legacy_members(b, team_id)?;
            if !b.exists(&member_path) {
                return Err(TeamSyncError::MemberNotFound {
                    team: team_id.to_string(),
                    member: member_id.to_string(),
                });
            }
            b.patch(&answer_path, fields(answer.to_value()))
        })?;
        debug!(team = %team_id, member = %member_id, question = question_index, "recorded answer");
        Ok(answer)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Every team, oldest first.
    pub fn list_teams(&self) -> Result<Vec<Team>> {
        let fallback = &self.config.unknown_member_name;
        Ok(collect_teams(self.store.read(&paths::teams())?.as_ref())
            .into_iter()
            .map(|t| t.with_display_names(fallback))
            .collect())
    }

    /// Teams that list `user_id` as a member, whatever shape the members
    /// are stored in.
    pub fn teams_for_member(&self, user_id: &str) -> Result<Vec<Team>> {
        Ok(self
            .list_teams()?
            .into_iter()
            .filter(|t| t.has_member(user_id))
            .collect())
    }

    pub fn team(&self, team_id: &str) -> Result<Option<Team>> {
        match self.store.read(&paths::team(team_id)?)? {
            Some(raw) => Ok(Some(
                Team::from_snapshot(team_id, &raw)?
                    .with_display_names(&self.config.unknown_member_name),
            )),
            None => Ok(None),
        }
    }

    /// Open a live projection of `view` that names members the way the
    /// reads above do.
    pub fn project<V: View>(&self, view: V) -> Result<Projection<V>> {
        Ok(Projection::open(&self.store, view)?
            .with_fallback_name(self.config.unknown_member_name.clone()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Rewrite a members list stored as an array into the keyed map, so that
/// member-scoped paths address the right record.
fn upgrade_legacy_members(b: &mut Batch, team_id: &str) -> Result<()> {
    let members_path = paths::members(team_id)?;
    if !matches!(b.read(&members_path), Some(Value::Array(_))) {
        return Ok(());
    }
    let team_path = paths::team(team_id)?;
    let raw = b.read(&team_path).cloned().unwrap_or(Value::Null);
    let team = Team::from_snapshot(team_id, &raw)?;
    info!(team = %team_id, members = team.members.len(), "rewriting legacy member list");
    b.write(&members_path, team.members_value());
    Ok(())
}

fn user_name(b: &Batch, user_id: &str) -> Result<Option<String>> {
    let path = paths::user(user_id)?.child("name")?;
    Ok(b
        .read(&path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string))
}

/// Largest stored team id in the generator's 13-digit form. Ids of other
/// shapes do not take part in creation order.
fn newest_team_id(b: &Batch) -> Option<u64> {
    b.read(&paths::teams())?
        .as_object()?
        .keys()
        .filter(|k| k.len() == 13 && k.bytes().all(|c| c.is_ascii_digit()))
        .filter_map(|k| k.parse::<u64>().ok())
        .max()
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn invalid(message: impl Into<String>) -> TeamSyncError {
    TeamSyncError::ValidationFailed(message.into())
}

/// Now, truncated to the millisecond precision the store keeps.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
