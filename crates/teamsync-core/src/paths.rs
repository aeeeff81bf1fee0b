use crate::error::{Result, TeamSyncError};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const TEAMS: &str = "teams";
pub const USERS: &str = "users";
pub const MEMBERS: &str = "members";
pub const ANSWERS: &str = "answers";

pub const CONFIG_FILE: &str = "teamsync.yaml";
pub const DEFAULT_DATA_FILE: &str = "teamsync-data.json";

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Segment validation
// ---------------------------------------------------------------------------

static SEGMENT_RE: OnceLock<Regex> = OnceLock::new();

// Same key rules as the realtime database: no `.`, `#`, `$`, `[`, `]`, `/`
// and no control characters.
fn segment_re() -> &'static Regex {
    SEGMENT_RE.get_or_init(|| Regex::new(r"^[^./#$\[\]\x00-\x1f\x7f]+$").unwrap())
}

pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment.len() > 768 || !segment_re().is_match(segment) {
        return Err(TeamSyncError::invalid_path(
            segment,
            "keys must be non-empty and must not contain '.', '#', '$', '[', ']', '/' or control characters",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// StorePath
// ---------------------------------------------------------------------------

/// A validated `/`-delimited location in the entity tree.
///
/// Every path other than [`StorePath::root`] starts at `teams` or `users`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The whole tree. Only import/export address it.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(TeamSyncError::invalid_path(raw, "path is empty"));
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        for seg in &segments {
            validate_segment(seg).map_err(|_| {
                TeamSyncError::invalid_path(raw, format!("invalid segment '{seg}'"))
            })?;
        }
        if segments[0] != TEAMS && segments[0] != USERS {
            return Err(TeamSyncError::invalid_path(
                raw,
                "paths must start at 'teams' or 'users'",
            ));
        }
        Ok(Self { segments })
    }

    pub fn child(&self, segment: impl AsRef<str>) -> Result<Self> {
        let segment = segment.as_ref();
        validate_segment(segment)?;
        if self.segments.is_empty() && segment != TEAMS && segment != USERS {
            return Err(TeamSyncError::invalid_path(
                segment,
                "paths must start at 'teams' or 'users'",
            ));
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// True if `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// True if a write at one path can change the value at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for StorePath {
    type Err = TeamSyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn teams() -> StorePath {
    StorePath {
        segments: vec![TEAMS.to_string()],
    }
}

pub fn users() -> StorePath {
    StorePath {
        segments: vec![USERS.to_string()],
    }
}

pub fn team(team_id: &str) -> Result<StorePath> {
    teams().child(team_id)
}

pub fn members(team_id: &str) -> Result<StorePath> {
    team(team_id)?.child(MEMBERS)
}

pub fn member(team_id: &str, member_id: &str) -> Result<StorePath> {
    members(team_id)?.child(member_id)
}

pub fn answers(team_id: &str, member_id: &str) -> Result<StorePath> {
    member(team_id, member_id)?.child(ANSWERS)
}

pub fn answer(team_id: &str, member_id: &str, question_index: usize) -> Result<StorePath> {
    answers(team_id, member_id)?.child(question_index.to_string())
}

pub fn user(user_id: &str) -> Result<StorePath> {
    users().child(user_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
