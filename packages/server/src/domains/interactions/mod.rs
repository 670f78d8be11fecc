pub mod active_users;
pub mod ingest;
pub mod models;
pub mod processor;
pub mod store;

pub use active_users::ActiveUsersResponder;
pub use ingest::{IngestError, InteractionIngest};
pub use models::{
    pair_key, ActiveUserEntry, GetMostActiveUsersRequest, InteractionEvent, InteractionKind,
    MostActiveUsersResult, MutualMatchEvent,
};
pub use processor::{InteractionProcessor, ProcessError};
pub use store::{InteractionStore, LikeOutcome, PgInteractionStore, StoreError};
