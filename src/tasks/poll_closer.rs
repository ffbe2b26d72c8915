use chrono::{DateTime, Utc};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::interval;

use crate::error::Result;
use crate::events::CloseReason;
use crate::voting::PollManager;

pub async fn check_expired_polls_task(manager: Arc<PollManager>, check_interval_secs: u64) {
    info!("Starting background task to close expired polls every {}s", check_interval_secs);
    let mut interval = interval(StdDuration::from_secs(check_interval_secs.max(1)));

    loop {
        interval.tick().await;
        if let Err(e) = close_expired_polls(&manager, Utc::now()).await {
            error!("Failed to query for expired polls: {}", e);
        }
    }
}

/// Completes every active poll whose deadline is before `now`. One failing poll does not stop the rest.
pub async fn close_expired_polls(manager: &PollManager, now: DateTime<Utc>) -> Result<usize> {
    let expired = manager.database().get_expired_polls(now).await?;
    if expired.is_empty() {
        return Ok(0);
    }

    info!("Found {} expired poll(s).", expired.len());
    let mut closed = 0;
    for poll in expired {
        match manager.complete_with(&poll.id, CloseReason::DeadlineReached).await {
            Ok(_) => closed += 1,
            Err(e) => error!("Error closing expired poll {}: {}", poll.id, e),
        }
    }
    Ok(closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::events::{EventBus, PollEvent};
    use crate::models::{NewPoll, PollStatus, SubPollDraft};
    use chrono::Duration;

    fn new_poll(title: &str, deadline: DateTime<Utc>) -> NewPoll {
        NewPoll {
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            title: title.to_string(),
            description: String::new(),
            deadline,
            is_secret: true,
            notify_members: false,
            created_by: "chair".to_string(),
            sub_polls: vec![SubPollDraft { title: "Q".to_string(), description: String::new() }],
        }
    }

    #[tokio::test]
    async fn closes_only_polls_past_their_deadline() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let (bus, mut rx) = EventBus::channel();
        let manager = PollManager::new(db, Some(bus));

        let start = Utc::now();
        let short = manager.create(new_poll("short", start + Duration::minutes(5)), None, start).await.unwrap();
        let long = manager.create(new_poll("long", start + Duration::days(5)), None, start).await.unwrap();
        let _ = rx.recv().await;
        let _ = rx.recv().await;

        let later = start + Duration::hours(1);
        assert_eq!(close_expired_polls(&manager, later).await.unwrap(), 1);

        let db = manager.database();
        assert_eq!(db.get_poll(&short.id).await.unwrap().status, PollStatus::Completed);
        assert_eq!(db.get_poll(&long.id).await.unwrap().status, PollStatus::Active);
        assert_eq!(
            rx.recv().await,
            Some(PollEvent::Completed { poll_id: short.id.clone(), reason: CloseReason::DeadlineReached })
        );

        // Nothing left to close on the next tick.
        assert_eq!(close_expired_polls(&manager, later).await.unwrap(), 0);
    }
}
