pub mod ballot;
pub mod eligibility;
pub mod lifecycle;
pub mod tally;

pub use ballot::{submit_votes, BallotDraft};
pub use lifecycle::{can_manage, PollManager};
pub use tally::aggregate_results;
