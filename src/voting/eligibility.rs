use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::{Ineligibility, Result};
use crate::models::Poll;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligibility {
    pub can_vote: bool,
    pub reason: Option<Ineligibility>,
}

impl Eligibility {
    pub fn eligible() -> Self {
        Self { can_vote: true, reason: None }
    }

    pub fn denied(reason: Ineligibility) -> Self {
        Self { can_vote: false, reason: Some(reason) }
    }
}

/// Rules in order: status, deadline, prior votes. The vote lookup only runs when
/// the first two pass, so a closed poll reports its closure whatever the history.
pub async fn check_eligibility(
    database: &Database,
    poll_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Eligibility> {
    let poll = database.get_poll(poll_id).await?;
    check_loaded(database, &poll, user_id, now).await
}

/// Same rules against a poll the caller already loaded.
pub async fn check_loaded(
    database: &Database,
    poll: &Poll,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Eligibility> {
    if let Some(reason) = poll_closed_reason(poll, now) {
        return Ok(Eligibility::denied(reason));
    }
    if database.user_has_voted(&poll.id, user_id).await? {
        return Ok(Eligibility::denied(Ineligibility::AlreadyVoted));
    }
    Ok(Eligibility::eligible())
}

pub fn poll_closed_reason(poll: &Poll, now: DateTime<Utc>) -> Option<Ineligibility> {
    if !poll.is_active() {
        Some(Ineligibility::NotActive)
    } else if poll.deadline_passed(now) {
        Some(Ineligibility::DeadlinePassed)
    } else {
        None
    }
}
