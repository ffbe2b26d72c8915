use log::{debug, error, info};
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::db::Database;
use crate::error::{PollError, Result};
use crate::events::{CloseReason, PollEvent};
use crate::handlers::render::{announcement_components, clip_message, discord_timestamp, poll_embed};
use crate::handlers::{results_message, BallotDrafts};
use crate::models::Poll;

/// Mirrors lifecycle events into the poll's channel until every publisher is gone.
pub async fn run_announcer(
    mut events: UnboundedReceiver<PollEvent>,
    http: Arc<Http>,
    database: Arc<Database>,
    drafts: Arc<BallotDrafts>,
) {
    info!("Poll announcer started");
    while let Some(event) = events.recv().await {
        forget_drafts(&drafts, &event).await;
        if let Err(e) = announce(&http, &database, &event).await {
            error!("Failed to announce event for poll {}: {}", event.poll_id(), e);
        }
    }
    info!("Poll event channel closed, announcer stopping");
}

/// Nobody can submit to a completed poll, so its unsubmitted ballots go.
async fn forget_drafts(drafts: &BallotDrafts, event: &PollEvent) {
    if let PollEvent::Completed { poll_id, .. } = event {
        let dropped = drafts.remove_poll(poll_id).await;
        if dropped > 0 {
            debug!("Dropped {} unsubmitted ballot(s) for completed poll {}", dropped, poll_id);
        }
    }
}

async fn announce(http: &Http, database: &Database, event: &PollEvent) -> Result<()> {
    match event {
        PollEvent::Created { poll_id } => {
            debug!("Poll {} created", poll_id);
            Ok(())
        }
        PollEvent::Edited { poll_id, had_votes } => {
            debug!("Poll {} edited (had votes: {})", poll_id, had_votes);
            Ok(())
        }
        PollEvent::VotesReset { poll_id, user_id: Some(_), removed } => {
            debug!("Reset {} vote(s) of one member on poll {}", removed, poll_id);
            Ok(())
        }
        PollEvent::Completed { poll_id, .. } => {
            let poll = database.get_poll(poll_id).await?;
            refresh_announcement(http, database, &poll).await?;
            let results = results_message(database, &poll).await?;
            let notice = notice_for(event, &poll).unwrap_or_default();
            post(http, &poll, clip_message(format!("{}\n{}", notice, results))).await
        }
        PollEvent::Reopened { poll_id } | PollEvent::VotesReset { poll_id, .. } => {
            let poll = database.get_poll(poll_id).await?;
            refresh_announcement(http, database, &poll).await?;
            match notice_for(event, &poll) {
                Some(notice) => post(http, &poll, notice).await,
                None => Ok(()),
            }
        }
    }
}

/// Channel notice for an event. Individual resets and edits stay quiet.
fn notice_for(event: &PollEvent, poll: &Poll) -> Option<String> {
    match event {
        PollEvent::Completed { reason: CloseReason::Manual, .. } => {
            Some(format!("Voting on **{}** was closed.", poll.title))
        }
        PollEvent::Completed { reason: CloseReason::DeadlineReached, .. } => {
            Some(format!("The deadline for **{}** has passed.", poll.title))
        }
        PollEvent::Reopened { .. } => Some(format!(
            "**{}** is open for voting again until {}. Earlier votes still count.",
            poll.title,
            discord_timestamp(poll.deadline)
        )),
        PollEvent::VotesReset { user_id: None, removed, .. } => Some(format!(
            "All {} vote(s) on **{}** were reset. Please vote again.",
            removed, poll.title
        )),
        _ => None,
    }
}

async fn post(http: &Http, poll: &Poll, content: String) -> Result<()> {
    ChannelId(parse_id(&poll.channel_id, "channel")?)
        .send_message(http, |m| m.content(content))
        .await?;
    Ok(())
}

/// Re-renders the announcement so the embed and the vote button follow the poll's state.
pub async fn refresh_announcement(http: &Http, database: &Database, poll: &Poll) -> Result<()> {
    let message_id = match &poll.message_id {
        Some(id) => parse_id(id, "message")?,
        None => {
            debug!("Poll {} has no announcement to refresh", poll.id);
            return Ok(());
        }
    };
    let attachments = database.list_attachments(&poll.id).await?;

    ChannelId(parse_id(&poll.channel_id, "channel")?)
        .edit_message(http, MessageId(message_id), |m| {
            m.embed(|e| poll_embed(e, poll, &attachments))
                .components(|c| announcement_components(c, poll))
        })
        .await?;
    Ok(())
}

fn parse_id(value: &str, kind: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| PollError::CorruptRow(format!("invalid {} id: {}", kind, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPoll, SubPollDraft, VoteChoice};
    use chrono::{Duration, Utc};

    fn poll() -> Poll {
        Poll::new(NewPoll {
            guild_id: "1".to_string(),
            channel_id: "2".to_string(),
            title: "Bylaws".to_string(),
            description: String::new(),
            deadline: Utc::now() + Duration::days(1),
            is_secret: true,
            notify_members: false,
            created_by: "3".to_string(),
            sub_polls: vec![SubPollDraft { title: "Adopt".to_string(), description: String::new() }],
        })
    }

    #[test]
    fn only_poll_wide_changes_are_announced() {
        let poll = poll();
        let id = poll.id.clone();

        let closed = notice_for(&PollEvent::Completed { poll_id: id.clone(), reason: CloseReason::DeadlineReached }, &poll);
        assert!(closed.unwrap().contains("deadline"));
        assert!(notice_for(&PollEvent::Reopened { poll_id: id.clone() }, &poll).unwrap().contains("Earlier votes still count"));
        assert!(
            notice_for(&PollEvent::VotesReset { poll_id: id.clone(), user_id: None, removed: 4 }, &poll)
                .unwrap()
                .contains("All 4 vote(s)")
        );

        assert_eq!(
            notice_for(&PollEvent::VotesReset { poll_id: id.clone(), user_id: Some("9".to_string()), removed: 1 }, &poll),
            None
        );
        assert_eq!(notice_for(&PollEvent::Edited { poll_id: id, had_votes: true }, &poll), None);
    }

    #[tokio::test]
    async fn completion_clears_the_polls_drafts() {
        let drafts = BallotDrafts::default();
        let now = Utc::now();
        drafts.update("p1", "u1", now, |d| d.choose("q1", VoteChoice::Favor)).await;
        drafts.update("p2", "u1", now, |d| d.choose("q1", VoteChoice::Favor)).await;

        forget_drafts(&drafts, &PollEvent::Reopened { poll_id: "p1".to_string() }).await;
        assert_eq!(drafts.len().await, 2);

        let completed = PollEvent::Completed { poll_id: "p1".to_string(), reason: CloseReason::Manual };
        forget_drafts(&drafts, &completed).await;
        assert_eq!(drafts.len().await, 1);
        assert_eq!(drafts.get("p1", "u1").await.choice("q1"), None);
    }

    #[test]
    fn bad_snowflakes_are_reported() {
        assert_eq!(parse_id("1234", "channel").unwrap(), 1234);
        assert!(matches!(parse_id("abc", "channel"), Err(PollError::CorruptRow(_))));
    }
}
