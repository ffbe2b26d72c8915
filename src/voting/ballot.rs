use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Ineligibility, PollError, Result};
use crate::models::{Poll, SubPoll, Vote, VoteChoice};
use crate::voting::eligibility;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotEntry {
    pub sub_poll_id: String,
    pub vote: VoteChoice,
}

#[derive(Debug, Clone)]
pub struct BallotSubmission {
    pub poll_id: String,
    pub votes: Vec<BallotEntry>,
    pub comment: Option<String>,
}

/// Choices a member has picked so far, before submitting.
#[derive(Debug, Clone, Default)]
pub struct BallotDraft {
    choices: HashMap<String, VoteChoice>,
}

impl BallotDraft {
    pub fn choose(&mut self, sub_poll_id: &str, vote: VoteChoice) {
        self.choices.insert(sub_poll_id.to_string(), vote);
    }

    pub fn choice(&self, sub_poll_id: &str) -> Option<VoteChoice> {
        self.choices.get(sub_poll_id).copied()
    }

    pub fn missing<'a>(&self, poll: &'a Poll) -> Vec<&'a SubPoll> {
        poll.sub_polls
            .iter()
            .filter(|s| !self.choices.contains_key(&s.id))
            .collect()
    }

    pub fn answered(&self, poll: &Poll) -> usize {
        poll.sub_polls.len() - self.missing(poll).len()
    }

    /// Orders entries like the poll's questions; choices for questions no longer on the poll are dropped.
    pub fn into_submission(self, poll: &Poll, comment: Option<String>) -> BallotSubmission {
        let votes = poll
            .sub_polls
            .iter()
            .filter_map(|s| {
                self.choices.get(&s.id).map(|vote| BallotEntry {
                    sub_poll_id: s.id.clone(),
                    vote: *vote,
                })
            })
            .collect();
        BallotSubmission {
            poll_id: poll.id.clone(),
            votes,
            comment,
        }
    }
}

/// Exactly one entry per question of the poll, nothing else.
pub fn validate(poll: &Poll, submission: &BallotSubmission) -> Result<()> {
    if submission.poll_id != poll.id {
        return Err(PollError::Validation("ballot belongs to a different poll".to_string()));
    }

    let mut seen = HashSet::new();
    for entry in &submission.votes {
        if poll.sub_poll(&entry.sub_poll_id).is_none() {
            return Err(PollError::SubPollNotFound(entry.sub_poll_id.clone()));
        }
        if !seen.insert(entry.sub_poll_id.as_str()) {
            return Err(PollError::Validation("a question was answered twice".to_string()));
        }
    }

    let missing: Vec<&str> = poll
        .sub_polls
        .iter()
        .filter(|s| !seen.contains(s.id.as_str()))
        .map(|s| s.title.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(PollError::Validation(format!(
            "every question needs an answer; missing: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Validates, re-checks eligibility and writes the whole ballot in one transaction.
pub async fn submit_votes(
    database: &Database,
    user_id: &str,
    submission: BallotSubmission,
    now: DateTime<Utc>,
) -> Result<Vec<Vote>> {
    let poll = database.get_poll(&submission.poll_id).await?;
    validate(&poll, &submission)?;

    let eligibility = eligibility::check_loaded(database, &poll, user_id, now).await?;
    if let Some(reason) = eligibility.reason {
        return Err(PollError::NotEligible(reason));
    }

    let comment = normalize_comment(submission.comment);
    let votes: Vec<Vote> = submission
        .votes
        .into_iter()
        .map(|entry| Vote {
            id: Uuid::new_v4().to_string(),
            poll_id: poll.id.clone(),
            sub_poll_id: entry.sub_poll_id,
            user_id: user_id.to_string(),
            vote: entry.vote,
            comment: comment.clone(),
            voted_at: now,
        })
        .collect();

    match database.insert_votes(&votes).await {
        Ok(()) => {
            info!("Recorded ballot of {} vote(s) on poll {}", votes.len(), poll.id);
            Ok(votes)
        }
        Err(PollError::Database(sqlx::Error::Database(e))) if e.is_unique_violation() => {
            warn!("Concurrent ballot on poll {} rejected by unique constraint", poll.id);
            Err(PollError::NotEligible(Ineligibility::AlreadyVoted))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPoll, PollStatus, SubPollDraft};
    use chrono::Duration;

    async fn setup() -> (Database, Poll) {
        let db = Database::in_memory().await.unwrap();
        let poll = Poll::new(NewPoll {
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            title: "General assembly".to_string(),
            description: String::new(),
            deadline: Utc::now() + Duration::days(1),
            is_secret: true,
            notify_members: false,
            created_by: "chair".to_string(),
            sub_polls: vec![
                SubPollDraft { title: "Q1".to_string(), description: String::new() },
                SubPollDraft { title: "Q2".to_string(), description: String::new() },
            ],
        });
        db.insert_poll(&poll, None).await.unwrap();
        (db, poll)
    }

    fn full_ballot(poll: &Poll, comment: Option<&str>) -> BallotSubmission {
        BallotSubmission {
            poll_id: poll.id.clone(),
            votes: vec![
                BallotEntry { sub_poll_id: poll.sub_polls[0].id.clone(), vote: VoteChoice::Favor },
                BallotEntry { sub_poll_id: poll.sub_polls[1].id.clone(), vote: VoteChoice::Against },
            ],
            comment: comment.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn full_ballot_writes_one_row_per_question_with_shared_metadata() {
        let (db, poll) = setup().await;
        let now = Utc::now();
        let votes = submit_votes(&db, "u1", full_ballot(&poll, Some("  see minutes ")), now)
            .await
            .unwrap();

        assert_eq!(votes.len(), 2);
        let stored = db.get_user_poll_votes(&poll.id, "u1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|v| v.voted_at == now));
        assert!(stored.iter().all(|v| v.comment.as_deref() == Some("see minutes")));
    }

    #[tokio::test]
    async fn partial_ballot_is_rejected_without_writes() {
        let (db, poll) = setup().await;
        let mut ballot = full_ballot(&poll, None);
        ballot.votes.pop();

        let err = submit_votes(&db, "u1", ballot, Utc::now()).await.unwrap_err();
        assert!(matches!(err, PollError::Validation(_)));
        assert_eq!(db.count_poll_votes(&poll.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_and_foreign_questions_are_rejected() {
        let (db, poll) = setup().await;

        let mut doubled = full_ballot(&poll, None);
        doubled.votes[1].sub_poll_id = poll.sub_polls[0].id.clone();
        assert!(matches!(validate(&poll, &doubled), Err(PollError::Validation(_))));

        let mut foreign = full_ballot(&poll, None);
        foreign.votes[0].sub_poll_id = "not-a-question".to_string();
        let err = submit_votes(&db, "u1", foreign, Utc::now()).await.unwrap_err();
        assert!(matches!(err, PollError::SubPollNotFound(_)));
        assert_eq!(db.count_poll_votes(&poll.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_ballot_from_same_member_is_refused() {
        let (db, poll) = setup().await;
        submit_votes(&db, "u1", full_ballot(&poll, None), Utc::now()).await.unwrap();

        let err = submit_votes(&db, "u1", full_ballot(&poll, None), Utc::now()).await.unwrap_err();
        assert!(matches!(err, PollError::NotEligible(Ineligibility::AlreadyVoted)));
        assert_eq!(db.count_poll_votes(&poll.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn closed_poll_refuses_ballots() {
        let (db, poll) = setup().await;
        db.set_poll_status(&poll.id, PollStatus::Completed, None).await.unwrap();

        let err = submit_votes(&db, "u1", full_ballot(&poll, None), Utc::now()).await.unwrap_err();
        assert!(matches!(err, PollError::NotEligible(Ineligibility::NotActive)));
    }

    #[test]
    fn draft_tracks_missing_questions_in_poll_order() {
        let poll = Poll::new(NewPoll {
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            title: "t".to_string(),
            description: String::new(),
            deadline: Utc::now() + Duration::days(1),
            is_secret: false,
            notify_members: false,
            created_by: "chair".to_string(),
            sub_polls: vec![
                SubPollDraft { title: "A".to_string(), description: String::new() },
                SubPollDraft { title: "B".to_string(), description: String::new() },
            ],
        });
        let mut draft = BallotDraft::default();
        draft.choose(&poll.sub_polls[1].id, VoteChoice::Abstain);
        assert_eq!(draft.answered(&poll), 1);
        assert_eq!(draft.missing(&poll)[0].title, "A");

        draft.choose(&poll.sub_polls[0].id, VoteChoice::Favor);
        draft.choose(&poll.sub_polls[0].id, VoteChoice::Against);
        let submission = draft.into_submission(&poll, None);
        assert_eq!(submission.votes[0].vote, VoteChoice::Against);
        assert_eq!(submission.votes[1].sub_poll_id, poll.sub_polls[1].id);
        assert!(validate(&poll, &submission).is_ok());
    }
}
