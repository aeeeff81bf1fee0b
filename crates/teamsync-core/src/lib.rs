//! `teamsync-core` keeps team, member and answer state consistent between a
//! server-authoritative entity store and any number of connected clients.
//!
//! ```text
//! TeamService (mutations)
//!     │  scoped writes / batches
//!     ▼
//! EntityStore ── Subscription fan-out ──► Projection<View>
//!                                             │
//!                                             ▼
//!                                  Team::from_snapshot (builder)
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod io;
pub mod mutations;
pub mod paths;
pub mod projection;
pub mod store;
pub mod subscription;
pub mod team;
pub mod users;

mod tree;

pub use error::{ErrorKind, Result, TeamSyncError};
pub use identity::{Identity, IdentityProvider, SessionIdentity, StaticIdentity};
pub use mutations::{NewTeam, TeamIdGenerator, TeamService};
pub use paths::StorePath;
pub use projection::{
    MemberAnswers, MemberAnswersView, Projection, ProjectionState, TeamDetailView, TeamListView,
    View,
};
pub use store::{Batch, EntityStore};
pub use subscription::{SnapshotEvent, Subscription, SubscriptionId, SubscriptionToken};
pub use team::{Answer, Completion, Member, Team};
pub use users::{Role, User, UserDirectory};
