//! Client-side state projections.
//!
//! A [`Projection`] owns exactly one subscription on the subtree its
//! [`View`] needs and rebuilds its whole state from every pushed snapshot.
//! There is no local merging and no optimistic state: what the projection
//! shows is always the last committed value it was sent.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::default_unknown_member_name;
use crate::error::{Result, TeamSyncError};
use crate::identity::Identity;
use crate::paths::{self, StorePath};
use crate::store::EntityStore;
use crate::subscription::{SnapshotEvent, Subscription, SubscriptionId};
use crate::team::{collect_teams, Completion, Member, Team};

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// What a surface shows and which subtree it needs for it.
pub trait View: Clone + Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn path(&self) -> Result<StorePath>;

    /// Build the output from the current value at [`View::path`]. Members
    /// without a name show `fallback_name`. An error leaves the projection
    /// unavailable until the next snapshot.
    fn build(&self, snapshot: Option<&Value>, fallback_name: &str) -> Result<Self::Output>;
}

/// All teams, or only those listing `member`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamListView {
    pub member: Option<String>,
}

impl View for TeamListView {
    type Output = Vec<Team>;

    fn path(&self) -> Result<StorePath> {
        Ok(paths::teams())
    }

    fn build(&self, snapshot: Option<&Value>, fallback_name: &str) -> Result<Vec<Team>> {
        Ok(collect_teams(snapshot)
            .into_iter()
            .filter(|t| self.member.as_ref().map_or(true, |id| t.has_member(id)))
            .map(|t| t.with_display_names(fallback_name))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamDetailView {
    pub team_id: String,
}

impl View for TeamDetailView {
    type Output = Team;

    fn path(&self) -> Result<StorePath> {
        paths::team(&self.team_id)
    }

    fn build(&self, snapshot: Option<&Value>, fallback_name: &str) -> Result<Team> {
        let raw = snapshot.ok_or_else(|| TeamSyncError::TeamNotFound(self.team_id.clone()))?;
        Ok(Team::from_snapshot(&self.team_id, raw)?.with_display_names(fallback_name))
    }
}

/// One member's answer sheet. `member_id` is `None` while signed out.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberAnswersView {
    pub team_id: String,
    pub member_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAnswers {
    pub team_id: String,
    pub team_name: String,
    pub questions: Vec<String>,
    pub member: Member,
    pub completion: Completion,
}

impl View for MemberAnswersView {
    type Output = MemberAnswers;

    fn path(&self) -> Result<StorePath> {
        paths::team(&self.team_id)
    }

    fn build(&self, snapshot: Option<&Value>, fallback_name: &str) -> Result<MemberAnswers> {
        let Some(member_id) = &self.member_id else {
            return Err(TeamSyncError::Forbidden("not signed in".into()));
        };
        let raw = snapshot.ok_or_else(|| TeamSyncError::TeamNotFound(self.team_id.clone()))?;
        let mut team = Team::from_snapshot(&self.team_id, raw)?.with_display_names(fallback_name);
        let member = team
            .members
            .remove(member_id)
            .ok_or_else(|| TeamSyncError::MemberNotFound {
                team: self.team_id.clone(),
                member: member_id.clone(),
            })?;
        let completion = member.completion(&team.questions);
        Ok(MemberAnswers {
            team_id: team.id,
            team_name: team.name,
            questions: team.questions,
            member,
            completion,
        })
    }
}

// ---------------------------------------------------------------------------
// ProjectionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionState<T> {
    /// No snapshot applied yet.
    Loading,
    Ready(T),
    /// The last snapshot could not be shown; carries the reason.
    Unavailable(String),
}

impl<T> ProjectionState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, ProjectionState::Loading)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            ProjectionState::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProjectionState::Unavailable(reason) => Some(reason.as_str()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

pub struct Projection<V: View> {
    store: EntityStore,
    view: V,
    subscription: Option<Subscription>,
    revision: Option<u64>,
    fallback_name: String,
    state: ProjectionState<V::Output>,
}

impl<V: View> Projection<V> {
    /// Subscribe to the view's subtree. The state stays `Loading` until the
    /// first snapshot is applied with [`Projection::sync`] or
    /// [`Projection::changed`].
    pub fn open(store: &EntityStore, view: V) -> Result<Self> {
        let subscription = store.subscribe(&view.path()?)?;
        Ok(Self {
            store: store.clone(),
            view,
            subscription: Some(subscription),
            revision: None,
            fallback_name: default_unknown_member_name(),
            state: ProjectionState::Loading,
        })
    }

    /// Show members without a name as `name`. Takes effect from the next
    /// applied snapshot.
    pub fn with_fallback_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_name = name.into();
        self
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn state(&self) -> &ProjectionState<V::Output> {
        &self.state
    }

    /// Revision of the last applied snapshot.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.as_ref().map(Subscription::id)
    }

    /// Replace the state with the one built from `event`.
    ///
    /// Returns `Ok(false)` for a snapshot that is not newer than the one
    /// already shown, and `StaleSubscription` for an event from any
    /// subscription other than the current one.
    pub fn apply(&mut self, event: SnapshotEvent) -> Result<bool> {
        if self.subscription_id() != Some(event.subscription) {
            return Err(TeamSyncError::StaleSubscription(event.subscription));
        }
        if self.revision.is_some_and(|r| event.revision <= r) {
            return Ok(false);
        }
        self.revision = Some(event.revision);
        self.state = match self.view.build(event.value.as_ref(), &self.fallback_name) {
            Ok(output) => ProjectionState::Ready(output),
            Err(e) => {
                if !matches!(e.kind(), crate::error::ErrorKind::NotFound) {
                    warn!(path = %event.path, error = %e, "projection unavailable");
                }
                ProjectionState::Unavailable(e.to_string())
            }
        };
        Ok(true)
    }

    /// Apply every snapshot already delivered. Returns how many changed the
    /// state.
    pub fn sync(&mut self) -> Result<usize> {
        let mut applied = 0;
        while let Some(event) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            if self.apply(event)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Wait for the next snapshot and apply it. `Ok(false)` once the
    /// subscription has ended.
    pub async fn changed(&mut self) -> Result<bool> {
        let Some(subscription) = self.subscription.as_mut() else {
            return Ok(false);
        };
        match subscription.recv().await {
            Some(event) => {
                self.apply(event)?;
                Ok(true)
            }
            None => {
                self.state = ProjectionState::Unavailable("store closed".into());
                Ok(false)
            }
        }
    }

    /// Point the projection at another view. The old subscription is
    /// released before the new one opens, so nothing from the old subtree
    /// can be applied afterwards.
    pub fn retarget(&mut self, view: V) -> Result<()> {
        let path = view.path()?;
        self.release();
        self.view = view;
        self.revision = None;
        self.state = ProjectionState::Loading;
        self.subscription = Some(self.store.subscribe(&path)?);
        debug!(path = %path, "projection retargeted");
        Ok(())
    }

    /// Release the subscription. The state is left as it was.
    pub fn close(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl Projection<MemberAnswersView> {
    /// Answer sheet for whoever is signed in.
    pub fn for_identity(
        store: &EntityStore,
        team_id: impl Into<String>,
        identity: Option<&Identity>,
    ) -> Result<Self> {
        Self::open(
            store,
            MemberAnswersView {
                team_id: team_id.into(),
                member_id: identity.map(|i| i.id.clone()),
            },
        )
    }

    /// Switch to `identity`'s answers if it differs from the current member.
    /// Returns whether the projection was retargeted.
    pub fn follow_identity(&mut self, identity: Option<&Identity>) -> Result<bool> {
        let member_id = identity.map(|i| i.id.clone());
        if member_id == self.view.member_id {
            return Ok(false);
        }
        let view = MemberAnswersView {
            team_id: self.view.team_id.clone(),
            member_id,
        };
        self.retarget(view)?;
        Ok(true)
    }
}
