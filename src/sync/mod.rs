pub mod engine;
pub mod error;
pub mod notifier;
pub mod pending;

pub use engine::{LoadOutcome, MutationReceipt, PushOutcome, SyncEngine};
pub use error::{LoadFailure, SyncError};
pub use notifier::{
    ChangeCause, ChangeEvent, ChangeNotifier, HandlerResult, MutationFailure, SubscriptionToken,
};
pub use pending::{PendingMutation, PriorState};
