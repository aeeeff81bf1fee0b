//! Team aggregate: the canonical in-memory form of a `teams/{id}` subtree.
//!
//! The store has held members both as a list of `{id, name}` records (or
//! bare ids) and as a map keyed by member id, and answers both as maps keyed
//! by question index and as arrays. [`Team::from_snapshot`] accepts every one
//! of those shapes and always yields members as a map; nothing outside this
//! module looks at the raw shape. The conversion is pure and idempotent:
//! building from [`Team::to_value`] returns the same team.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{Result, TeamSyncError};

// ---------------------------------------------------------------------------
// Canonical types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_index: usize,
    pub text: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub answers: BTreeMap<usize, Answer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    pub questions: Vec<String>,
    pub members: BTreeMap<String, Member>,
}

/// How many of the current questions a member has answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub answered: usize,
    pub total: usize,
}

impl Completion {
    pub fn is_complete(&self) -> bool {
        self.answered == self.total
    }
}

impl Answer {
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("text".into(), json!(self.text));
        if let Some(at) = self.submitted_at {
            obj.insert("submittedAt".into(), json!(at.timestamp_millis()));
        }
        Value::Object(obj)
    }
}

impl Member {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            answers: BTreeMap::new(),
        }
    }

    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.name.trim().is_empty() {
            fallback
        } else {
            &self.name
        }
    }

    /// Answers to questions that still exist. Indices past the end of
    /// `questions` and blank answers do not count.
    pub fn completion(&self, questions: &[String]) -> Completion {
        let answered = self
            .answers
            .iter()
            .filter(|(idx, a)| **idx < questions.len() && !a.text.trim().is_empty())
            .count();
        Completion {
            answered,
            total: questions.len(),
        }
    }

    /// Stored form: `{ name, answers: { "<index>": { text, submittedAt } } }`.
    pub fn to_value(&self) -> Value {
        let answers: Map<String, Value> = self
            .answers
            .iter()
            .map(|(idx, a)| (idx.to_string(), a.to_value()))
            .collect();
        json!({ "name": self.name, "answers": answers })
    }
}

impl Team {
    /// Build the canonical team from the raw value stored at `teams/{id}`.
    pub fn from_snapshot(id: &str, raw: &Value) -> Result<Self> {
        let Value::Object(fields) = raw else {
            return Err(TeamSyncError::Malformed {
                path: format!("teams/{id}"),
                reason: "team record is not an object".into(),
            });
        };

        let created_at = fields
            .get("createdAt")
            .and_then(parse_time)
            .or_else(|| created_from_id(id));

        Ok(Self {
            id: id.to_string(),
            name: string_field(fields, "name"),
            category: string_field(fields, "category"),
            created_at,
            questions: fields
                .get("questions")
                .map(|q| parse_questions(id, q))
                .unwrap_or_default(),
            members: fields
                .get("members")
                .map(|m| parse_members(id, m))
                .unwrap_or_default(),
        })
    }

    /// Stored form of the team, without its id (the id is the key).
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".into(), json!(self.name));
        obj.insert("category".into(), json!(self.category));
        if let Some(at) = self.created_at {
            obj.insert("createdAt".into(), json!(at.timestamp_millis()));
        }
        obj.insert("questions".into(), json!(self.questions));
        obj.insert("members".into(), self.members_value());
        Value::Object(obj)
    }

    /// Stored form of the members map.
    pub fn members_value(&self) -> Value {
        let members: Map<String, Value> = self
            .members
            .iter()
            .map(|(id, m)| (id.clone(), m.to_value()))
            .collect();
        Value::Object(members)
    }

    /// Give members stored without a name the fallback display name.
    pub fn with_display_names(mut self, fallback: &str) -> Self {
        for member in self.members.values_mut() {
            if member.name.trim().is_empty() {
                member.name = fallback.to_string();
            }
        }
        self
    }

    pub fn has_member(&self, member_id: &str) -> bool {
        self.members.contains_key(member_id)
    }

    pub fn question(&self, index: usize) -> Option<&str> {
        self.questions.get(index).map(String::as_str)
    }

    pub fn completion(&self, member_id: &str) -> Option<Completion> {
        self.members
            .get(member_id)
            .map(|m| m.completion(&self.questions))
    }

    /// Answers whose question no longer exists, as `(member_id, answer)`.
    pub fn orphaned_answers(&self) -> Vec<(&str, &Answer)> {
        self.members
            .values()
            .flat_map(|m| {
                m.answers
                    .iter()
                    .filter(|(idx, _)| **idx >= self.questions.len())
                    .map(move |(_, a)| (m.id.as_str(), a))
            })
            .collect()
    }
}

/// Canonical stored form of a raw team value. Idempotent.
pub fn normalize_team(id: &str, raw: &Value) -> Result<Value> {
    Ok(Team::from_snapshot(id, raw)?.to_value())
}

/// Build every team under a raw `teams` snapshot, ordered by id.
///
/// Ids are time-based, so id order is creation order. Records that are not
/// teams at all are skipped.
pub fn collect_teams(raw: Option<&Value>) -> Vec<Team> {
    let Some(Value::Object(teams)) = raw else {
        return Vec::new();
    };
    let mut out: Vec<Team> = teams
        .iter()
        .filter_map(|(id, value)| match Team::from_snapshot(id, value) {
            Ok(team) => Some(team),
            Err(e) => {
                warn!(team = %id, error = %e, "skipping malformed team");
                None
            }
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// The two shapes a stored `members` field can take.
enum MemberShape<'a> {
    List(&'a [Value]),
    Map(&'a Map<String, Value>),
}

impl<'a> MemberShape<'a> {
    fn of(raw: &'a Value) -> Option<Self> {
        match raw {
            Value::Array(items) => Some(MemberShape::List(items)),
            Value::Object(map) => Some(MemberShape::Map(map)),
            _ => None,
        }
    }
}

fn parse_members(team_id: &str, raw: &Value) -> BTreeMap<String, Member> {
    let mut members = BTreeMap::new();
    match MemberShape::of(raw) {
        Some(MemberShape::List(items)) => {
            for item in items {
                let member = match item {
                    Value::Null => continue,
                    Value::String(id) => Some(Member::new(id.clone(), "")),
                    Value::Object(fields) => match fields.get("id").and_then(scalar_string) {
                        Some(id) => Some(member_from_fields(id, fields)),
                        None => None,
                    },
                    _ => None,
                };
                let Some(member) = member else {
                    warn!(team = %team_id, "dropping list member without an id");
                    continue;
                };
                if members.contains_key(&member.id) {
                    warn!(team = %team_id, member = %member.id, "duplicate member in list, keeping first");
                    continue;
                }
                members.insert(member.id.clone(), member);
            }
        }
        Some(MemberShape::Map(entries)) => {
            for (id, item) in entries {
                let member = match item {
                    Value::Null => continue,
                    Value::Object(fields) => {
                        if let Some(inner) = fields.get("id").and_then(scalar_string) {
                            if &inner != id {
                                warn!(team = %team_id, key = %id, inner = %inner, "member id field disagrees with key, using key");
                            }
                        }
                        member_from_fields(id.clone(), fields)
                    }
                    Value::String(name) => Member::new(id.clone(), name.clone()),
                    // `{ uid: true }` marks membership without details.
                    _ => Member::new(id.clone(), ""),
                };
                members.insert(id.clone(), member);
            }
        }
        None => warn!(team = %team_id, "members field is neither a list nor a map, ignoring"),
    }
    members
}

fn member_from_fields(id: String, fields: &Map<String, Value>) -> Member {
    let answers = fields
        .get("answers")
        .map(|a| parse_answers(&id, a))
        .unwrap_or_default();
    Member {
        name: string_field(fields, "name"),
        id,
        answers,
    }
}

fn parse_answers(member_id: &str, raw: &Value) -> BTreeMap<usize, Answer> {
    indexed_entries(member_id, raw)
        .into_iter()
        .filter_map(|(idx, value)| {
            let answer = parse_answer(idx, value);
            if answer.is_none() {
                warn!(member = %member_id, index = idx, "dropping unreadable answer");
            }
            answer.map(|a| (idx, a))
        })
        .collect()
}

fn parse_answer(question_index: usize, raw: &Value) -> Option<Answer> {
    match raw {
        Value::Object(fields) => {
            // Older clients wrote `{ answer, timestamp }`.
            let text = fields
                .get("text")
                .or_else(|| fields.get("answer"))
                .and_then(scalar_string)
                .unwrap_or_default();
            let submitted_at = fields
                .get("submittedAt")
                .or_else(|| fields.get("timestamp"))
                .and_then(parse_time);
            Some(Answer {
                question_index,
                text,
                submitted_at,
            })
        }
        Value::String(text) => Some(Answer {
            question_index,
            text: text.clone(),
            submitted_at: None,
        }),
        _ => None,
    }
}

/// Most blank slots a question list may gain from holes in its indices.
const MAX_QUESTION_GAP: usize = 64;

fn parse_questions(team_id: &str, raw: &Value) -> Vec<String> {
    let mut entries = indexed_entries(team_id, raw);
    let limit = entries.len().saturating_add(MAX_QUESTION_GAP);
    entries.retain(|(idx, _)| {
        if *idx < limit {
            return true;
        }
        warn!(team = %team_id, index = idx, "ignoring out-of-range question index");
        false
    });
    let len = entries.last().map_or(0, |(idx, _)| idx + 1);
    // Holes stay as blank questions so answer indices keep pointing at the
    // same question.
    let mut questions = vec![String::new(); len];
    for (idx, value) in entries {
        questions[idx] = scalar_string(value).unwrap_or_default();
    }
    questions
}

/// Entries of an index-keyed collection stored as an array or as a map with
/// numeric keys, sorted by index. Nulls are holes.
fn indexed_entries<'a>(owner: &str, raw: &'a Value) -> Vec<(usize, &'a Value)> {
    let mut entries: Vec<(usize, &Value)> = match raw {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .filter_map(|(k, v)| match k.parse::<usize>() {
                Ok(idx) => Some((idx, v)),
                Err(_) => {
                    warn!(owner = %owner, key = %k, "ignoring non-numeric index");
                    None
                }
            })
            .collect(),
        _ => {
            warn!(owner = %owner, "expected a list or an index-keyed map");
            Vec::new()
        }
    };
    entries.sort_by_key(|(idx, _)| *idx);
    entries
}

fn string_field(fields: &Map<String, Value>, key: &str) -> String {
    fields.get(key).and_then(scalar_string).unwrap_or_default()
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                s.parse::<i64>()
                    .ok()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            }),
        _ => None,
    }
}

/// Team ids were, and still are, millisecond timestamps.
fn created_from_id(id: &str) -> Option<DateTime<Utc>> {
    id.parse::<i64>()
        .ok()
        .filter(|ms| *ms >= 1_000_000_000_000)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
