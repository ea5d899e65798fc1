pub mod error;
pub mod types;

pub use error::{ContentionError, Result};
pub use types::{
    ActorId, Counter, MembershipKey, MembershipOutcome, MembershipRecord, RemovalOutcome,
    ResourceId, RetryOutcome, WriteOutcome,
};
