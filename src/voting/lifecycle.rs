use chrono::{DateTime, Utc};
use log::info;
use std::sync::Arc;

use crate::db::Database;
use crate::error::{PollError, Result};
use crate::events::{CloseReason, EventBus, PollEvent};
use crate::models::{
    NewAttachment, NewPoll, Poll, PollAttachment, PollEdit, PollStatus, SubPollEdit,
};

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub poll: Poll,
    /// Members who already voted saw the old wording.
    pub had_votes: bool,
}

/// Mutations of poll and vote state. Every change that others may care about goes out on the event bus.
pub struct PollManager {
    database: Arc<Database>,
    events: Option<EventBus>,
}

impl PollManager {
    pub fn new(database: Arc<Database>, events: Option<EventBus>) -> Self {
        Self { database, events }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_handle(&self) -> Arc<Database> {
        Arc::clone(&self.database)
    }

    fn publish(&self, event: PollEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    pub async fn create(
        &self,
        new_poll: NewPoll,
        attachment: Option<NewAttachment>,
        now: DateTime<Utc>,
    ) -> Result<Poll> {
        if new_poll.title.trim().is_empty() {
            return Err(PollError::Validation("a poll needs a title".to_string()));
        }
        if new_poll.sub_polls.is_empty() {
            return Err(PollError::Validation("a poll needs at least one question".to_string()));
        }
        if new_poll.sub_polls.iter().any(|s| s.title.trim().is_empty()) {
            return Err(PollError::Validation("every question needs a title".to_string()));
        }
        if new_poll.deadline <= now {
            return Err(PollError::Validation("the deadline must be in the future".to_string()));
        }

        let poll = Poll::new(new_poll);
        let attachment = attachment.map(|a| PollAttachment::new(&poll.id, a));
        self.database.insert_poll(&poll, attachment.as_ref()).await?;

        info!(
            "Created poll {} '{}' with {} question(s) by {}",
            poll.id,
            poll.title,
            poll.sub_polls.len(),
            poll.created_by
        );
        self.publish(PollEvent::Created { poll_id: poll.id.clone() });
        Ok(poll)
    }

    /// Updates metadata and question wording. Votes are left as they are.
    pub async fn edit(
        &self,
        poll_id: &str,
        edit: PollEdit,
        sub_poll_edits: Vec<SubPollEdit>,
        now: DateTime<Utc>,
    ) -> Result<EditOutcome> {
        let mut poll = self.database.get_poll(poll_id).await?;
        let had_votes = self.database.count_poll_votes(poll_id).await? > 0;

        if let Some(title) = edit.title {
            if title.trim().is_empty() {
                return Err(PollError::Validation("a poll needs a title".to_string()));
            }
            poll.title = title;
        }
        if let Some(description) = edit.description {
            poll.description = description;
        }
        if let Some(deadline) = edit.deadline {
            if deadline <= now {
                return Err(PollError::Validation("the deadline must be in the future".to_string()));
            }
            poll.deadline = deadline;
        }
        if let Some(is_secret) = edit.is_secret {
            // Ballots cast in secret must stay secret.
            if poll.is_secret && !is_secret && had_votes {
                return Err(PollError::Validation(
                    "a secret poll cannot be made open once members have voted".to_string(),
                ));
            }
            poll.is_secret = is_secret;
        }
        if let Some(notify_members) = edit.notify_members {
            poll.notify_members = notify_members;
        }

        for sub_edit in sub_poll_edits {
            let sub_poll = poll
                .sub_polls
                .iter_mut()
                .find(|s| s.id == sub_edit.sub_poll_id)
                .ok_or_else(|| PollError::SubPollNotFound(sub_edit.sub_poll_id.clone()))?;
            if let Some(title) = sub_edit.title {
                if title.trim().is_empty() {
                    return Err(PollError::Validation("every question needs a title".to_string()));
                }
                sub_poll.title = title;
            }
            if let Some(description) = sub_edit.description {
                sub_poll.description = description;
            }
        }

        self.database.update_poll(&poll).await?;

        info!("Edited poll {} (had votes: {})", poll_id, had_votes);
        self.publish(PollEvent::Edited { poll_id: poll_id.to_string(), had_votes });
        Ok(EditOutcome { poll, had_votes })
    }

    pub async fn complete(&self, poll_id: &str) -> Result<Poll> {
        self.complete_with(poll_id, CloseReason::Manual).await
    }

    /// Completing an already completed poll is a no-op and publishes nothing.
    pub async fn complete_with(&self, poll_id: &str, reason: CloseReason) -> Result<Poll> {
        let mut poll = self.database.get_poll(poll_id).await?;
        if poll.status == PollStatus::Completed {
            return Ok(poll);
        }

        if !self.database.set_poll_status(poll_id, PollStatus::Completed, None).await? {
            return Err(PollError::PollNotFound);
        }
        poll.status = PollStatus::Completed;

        info!("Completed poll {} ({:?})", poll_id, reason);
        self.publish(PollEvent::Completed { poll_id: poll_id.to_string(), reason });
        Ok(poll)
    }

    /// Lets voting resume. Existing votes are kept.
    pub async fn reopen(
        &self,
        poll_id: &str,
        new_deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Poll> {
        if let Some(deadline) = new_deadline {
            if deadline <= now {
                return Err(PollError::Validation("the deadline must be in the future".to_string()));
            }
        }

        let mut poll = self.database.get_poll(poll_id).await?;
        if !self.database.set_poll_status(poll_id, PollStatus::Active, new_deadline).await? {
            return Err(PollError::PollNotFound);
        }
        poll.status = PollStatus::Active;
        if let Some(deadline) = new_deadline {
            poll.deadline = deadline;
        }

        info!("Reopened poll {} until {}", poll_id, poll.deadline.to_rfc3339());
        self.publish(PollEvent::Reopened { poll_id: poll_id.to_string() });
        Ok(poll)
    }

    /// Deletes one member's ballot so they can vote again.
    pub async fn reset_user_votes(&self, poll_id: &str, user_id: &str) -> Result<u64> {
        self.database.get_poll(poll_id).await?;
        let removed = self.database.delete_user_votes(poll_id, user_id).await?;

        info!("Reset {} vote(s) of user {} on poll {}", removed, user_id, poll_id);
        self.publish(PollEvent::VotesReset {
            poll_id: poll_id.to_string(),
            user_id: Some(user_id.to_string()),
            removed,
        });
        Ok(removed)
    }

    /// Deletes every vote on the poll. Irreversible, so the caller must confirm.
    pub async fn reset_all_votes(&self, poll_id: &str, confirmed: bool) -> Result<u64> {
        if !confirmed {
            return Err(PollError::Validation(
                "resetting all votes cannot be undone; confirm to continue".to_string(),
            ));
        }
        self.database.get_poll(poll_id).await?;
        let removed = self.database.delete_all_votes(poll_id).await?;

        info!("Reset all {} vote(s) on poll {}", removed, poll_id);
        self.publish(PollEvent::VotesReset {
            poll_id: poll_id.to_string(),
            user_id: None,
            removed,
        });
        Ok(removed)
    }

    pub async fn add_attachment(&self, poll_id: &str, attachment: NewAttachment) -> Result<PollAttachment> {
        self.database.get_poll(poll_id).await?;
        let attachment = PollAttachment::new(poll_id, attachment);
        self.database.insert_attachment(&attachment).await?;
        info!("Attached {} to poll {}", attachment.file_name, poll_id);
        Ok(attachment)
    }

    pub async fn attachments(&self, poll_id: &str) -> Result<Vec<PollAttachment>> {
        self.database.get_poll(poll_id).await?;
        self.database.list_attachments(poll_id).await
    }
}

/// Managers may manage every poll; authors may manage their own.
pub fn can_manage(poll: &Poll, user_id: &str, has_manager_role: bool) -> bool {
    has_manager_role || poll.created_by == user_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Ineligibility;
    use crate::models::{SubPollDraft, VoteChoice};
    use crate::voting::ballot::{submit_votes, BallotEntry, BallotSubmission};
    use crate::voting::eligibility::check_eligibility;
    use crate::voting::tally::{aggregate_results, ballot_breakdown};
    use chrono::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn manager() -> (PollManager, UnboundedReceiver<PollEvent>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let (bus, rx) = EventBus::channel();
        (PollManager::new(db, Some(bus)), rx)
    }

    fn new_poll(questions: usize) -> NewPoll {
        NewPoll {
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            title: "Bureau meeting".to_string(),
            description: "Agenda items".to_string(),
            deadline: Utc::now() + Duration::days(3),
            is_secret: true,
            notify_members: true,
            created_by: "chair".to_string(),
            sub_polls: (1..=questions)
                .map(|i| SubPollDraft { title: format!("Item {}", i), description: String::new() })
                .collect(),
        }
    }

    async fn vote_all(manager: &PollManager, poll: &Poll, user_id: &str, choice: VoteChoice) {
        let submission = BallotSubmission {
            poll_id: poll.id.clone(),
            votes: poll
                .sub_polls
                .iter()
                .map(|s| BallotEntry { sub_poll_id: s.id.clone(), vote: choice })
                .collect(),
            comment: None,
        };
        submit_votes(manager.database(), user_id, submission, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn create_validates_before_writing() {
        let (manager, _rx) = manager().await;
        let now = Utc::now();

        let err = manager.create(new_poll(0), None, now).await.unwrap_err();
        assert!(matches!(err, PollError::Validation(_)));

        let mut past = new_poll(1);
        past.deadline = now - Duration::minutes(1);
        assert!(matches!(manager.create(past, None, now).await, Err(PollError::Validation(_))));

        let mut blank = new_poll(2);
        blank.sub_polls[1].title = "  ".to_string();
        assert!(matches!(manager.create(blank, None, now).await, Err(PollError::Validation(_))));

        assert!(manager.database().list_polls("g", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_stores_poll_with_attachment_and_announces_it() {
        let (manager, mut rx) = manager().await;
        let poll = manager
            .create(
                new_poll(2),
                Some(NewAttachment {
                    file_name: "minutes.pdf".to_string(),
                    path: "https://cdn.example/minutes.pdf".to_string(),
                    size: 10,
                    mime_type: None,
                    uploaded_by: "chair".to_string(),
                }),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(manager.attachments(&poll.id).await.unwrap().len(), 1);
        assert_eq!(rx.recv().await, Some(PollEvent::Created { poll_id: poll.id.clone() }));
    }

    #[tokio::test]
    async fn edit_keeps_votes_and_reports_them() {
        let (manager, _rx) = manager().await;
        let now = Utc::now();
        let poll = manager.create(new_poll(2), None, now).await.unwrap();
        vote_all(&manager, &poll, "u1", VoteChoice::Favor).await;

        let outcome = manager
            .edit(
                &poll.id,
                PollEdit { title: Some("Bureau meeting (amended)".to_string()), ..Default::default() },
                vec![SubPollEdit {
                    sub_poll_id: poll.sub_polls[1].id.clone(),
                    title: Some("Item 2, amended".to_string()),
                    description: Some("new wording".to_string()),
                }],
                now,
            )
            .await
            .unwrap();

        assert!(outcome.had_votes);
        let stored = manager.database().get_poll(&poll.id).await.unwrap();
        assert_eq!(stored.title, "Bureau meeting (amended)");
        assert_eq!(stored.sub_polls[1].description, "new wording");
        assert_eq!(manager.database().count_poll_votes(&poll.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn secret_ballots_stay_secret_after_voting() {
        let (manager, _rx) = manager().await;
        let poll = manager.create(new_poll(1), None, Utc::now()).await.unwrap();
        vote_all(&manager, &poll, "alice", VoteChoice::Against).await;

        let open = PollEdit { is_secret: Some(false), ..PollEdit::default() };
        let err = manager.edit(&poll.id, open, Vec::new(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, PollError::Validation(_)));

        let stored = manager.database().get_poll(&poll.id).await.unwrap();
        assert!(stored.is_secret);
        let votes = manager.database().get_poll_votes(&poll.id).await.unwrap();
        assert!(matches!(ballot_breakdown(&stored, &votes), Err(PollError::SecretBallot)));
    }

    #[tokio::test]
    async fn ballot_secrecy_can_change_before_voting_and_tighten_after() {
        let (manager, _rx) = manager().await;
        let poll = manager.create(new_poll(1), None, Utc::now()).await.unwrap();

        let open = PollEdit { is_secret: Some(false), ..PollEdit::default() };
        let outcome = manager.edit(&poll.id, open, Vec::new(), Utc::now()).await.unwrap();
        assert!(!outcome.poll.is_secret);

        vote_all(&manager, &poll, "bob", VoteChoice::Favor).await;
        let secret = PollEdit { is_secret: Some(true), ..PollEdit::default() };
        let outcome = manager.edit(&poll.id, secret, Vec::new(), Utc::now()).await.unwrap();
        assert!(outcome.poll.is_secret);
        assert!(outcome.had_votes);
    }

    #[tokio::test]
    async fn edit_rejects_questions_from_other_polls() {
        let (manager, _rx) = manager().await;
        let now = Utc::now();
        let poll = manager.create(new_poll(1), None, now).await.unwrap();
        let other = manager.create(new_poll(1), None, now).await.unwrap();

        let err = manager
            .edit(
                &poll.id,
                PollEdit::default(),
                vec![SubPollEdit {
                    sub_poll_id: other.sub_polls[0].id.clone(),
                    title: Some("hijack".to_string()),
                    description: None,
                }],
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::SubPollNotFound(_)));
    }

    #[tokio::test]
    async fn complete_then_reopen_keeps_votes() {
        let (manager, mut rx) = manager().await;
        let now = Utc::now();
        let poll = manager.create(new_poll(1), None, now).await.unwrap();
        vote_all(&manager, &poll, "u1", VoteChoice::Against).await;
        let _ = rx.recv().await;

        manager.complete(&poll.id).await.unwrap();
        let eligibility = check_eligibility(manager.database(), &poll.id, "u2", now).await.unwrap();
        assert_eq!(eligibility.reason, Some(Ineligibility::NotActive));

        // Second completion is silent.
        manager.complete(&poll.id).await.unwrap();

        let extended = now + Duration::days(7);
        let reopened = manager.reopen(&poll.id, Some(extended), now).await.unwrap();
        assert!(reopened.is_active());
        assert_eq!(reopened.deadline, extended);
        assert!(check_eligibility(manager.database(), &poll.id, "u2", now).await.unwrap().can_vote);
        assert_eq!(manager.database().count_poll_votes(&poll.id).await.unwrap(), 1);

        assert_eq!(
            rx.recv().await,
            Some(PollEvent::Completed { poll_id: poll.id.clone(), reason: CloseReason::Manual })
        );
        assert_eq!(rx.recv().await, Some(PollEvent::Reopened { poll_id: poll.id.clone() }));
    }

    #[tokio::test]
    async fn reset_user_votes_restores_eligibility() {
        let (manager, _rx) = manager().await;
        let now = Utc::now();
        let poll = manager.create(new_poll(2), None, now).await.unwrap();
        vote_all(&manager, &poll, "u1", VoteChoice::Favor).await;
        vote_all(&manager, &poll, "u2", VoteChoice::Abstain).await;

        let before = check_eligibility(manager.database(), &poll.id, "u1", now).await.unwrap();
        assert_eq!(before.reason, Some(Ineligibility::AlreadyVoted));

        assert_eq!(manager.reset_user_votes(&poll.id, "u1").await.unwrap(), 2);
        assert!(check_eligibility(manager.database(), &poll.id, "u1", now).await.unwrap().can_vote);
        assert!(!check_eligibility(manager.database(), &poll.id, "u2", now).await.unwrap().can_vote);
    }

    #[tokio::test]
    async fn reset_all_votes_requires_confirmation_and_zeroes_results() {
        let (manager, _rx) = manager().await;
        let poll = manager.create(new_poll(2), None, Utc::now()).await.unwrap();
        for user in ["a", "b", "c"] {
            vote_all(&manager, &poll, user, VoteChoice::Favor).await;
        }

        let err = manager.reset_all_votes(&poll.id, false).await.unwrap_err();
        assert!(matches!(err, PollError::Validation(_)));
        assert_eq!(manager.database().count_poll_votes(&poll.id).await.unwrap(), 6);

        assert_eq!(manager.reset_all_votes(&poll.id, true).await.unwrap(), 6);
        let results = aggregate_results(manager.database(), &poll.id).await.unwrap();
        assert_eq!(results.sub_polls.len(), 2);
        assert!(results.sub_polls.iter().all(|r| r.tally.total == 0 && r.tally.favor == 0));
    }

    #[tokio::test]
    async fn lifecycle_on_missing_poll_is_not_found() {
        let (manager, _rx) = manager().await;
        assert!(matches!(manager.complete("nope").await, Err(PollError::PollNotFound)));
        assert!(matches!(manager.reset_user_votes("nope", "u").await, Err(PollError::PollNotFound)));
        assert!(matches!(manager.reopen("nope", None, Utc::now()).await, Err(PollError::PollNotFound)));
    }

    #[test]
    fn authors_and_managers_can_manage() {
        let poll = Poll::new(new_poll(1));
        assert!(can_manage(&poll, "chair", false));
        assert!(can_manage(&poll, "someone", true));
        assert!(!can_manage(&poll, "someone", false));
    }
}
