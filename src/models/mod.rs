use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PollError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: Option<String>,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub status: PollStatus,
    pub is_secret: bool,
    pub notify_members: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub sub_polls: Vec<SubPoll>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPoll {
    pub id: String,
    pub poll_id: String,
    pub title: String,
    pub description: String,
    pub position: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Favor,
    Against,
    Abstain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub poll_id: String,
    pub sub_poll_id: String,
    pub user_id: String,
    pub vote: VoteChoice,
    pub comment: Option<String>,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollAttachment {
    pub id: String,
    pub poll_id: String,
    pub file_name: String,
    pub path: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

/// A committee member as seen by the poll core. Owned by the guild, never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub roles: Vec<String>,
}

// Inputs for the lifecycle operations

#[derive(Debug, Clone)]
pub struct NewPoll {
    pub guild_id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub is_secret: bool,
    pub notify_members: bool,
    pub created_by: String,
    pub sub_polls: Vec<SubPollDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPollDraft {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct PollEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub is_secret: Option<bool>,
    pub notify_members: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SubPollEdit {
    pub sub_poll_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file_name: String,
    pub path: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub uploaded_by: String,
}

impl Poll {
    pub fn new(new_poll: NewPoll) -> Self {
        let id = Uuid::new_v4().to_string();
        let sub_polls = new_poll
            .sub_polls
            .into_iter()
            .enumerate()
            .map(|(position, draft)| SubPoll {
                id: Uuid::new_v4().to_string(),
                poll_id: id.clone(),
                title: draft.title,
                description: draft.description,
                position: position as i64,
            })
            .collect();

        Self {
            id,
            guild_id: new_poll.guild_id,
            channel_id: new_poll.channel_id,
            message_id: None,
            title: new_poll.title,
            description: new_poll.description,
            deadline: new_poll.deadline,
            status: PollStatus::Active,
            is_secret: new_poll.is_secret,
            notify_members: new_poll.notify_members,
            created_by: new_poll.created_by,
            created_at: Utc::now(),
            sub_polls,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PollStatus::Active
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    pub fn sub_poll(&self, sub_poll_id: &str) -> Option<&SubPoll> {
        self.sub_polls.iter().find(|s| s.id == sub_poll_id)
    }
}

impl PollAttachment {
    pub fn new(poll_id: &str, attachment: NewAttachment) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            poll_id: poll_id.to_string(),
            file_name: attachment.file_name,
            path: attachment.path,
            size: attachment.size,
            mime_type: attachment.mime_type,
            uploaded_by: attachment.uploaded_by,
            created_at: Utc::now(),
        }
    }
}

impl Member {
    pub fn display_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Active => "active",
            PollStatus::Completed => "completed",
        }
    }
}

impl FromStr for PollStatus {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PollStatus::Active),
            "completed" => Ok(PollStatus::Completed),
            other => Err(PollError::CorruptRow(format!("unknown poll status: {}", other))),
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollStatus::Active => write!(f, "Active"),
            PollStatus::Completed => write!(f, "Completed"),
        }
    }
}

impl VoteChoice {
    pub const ALL: [VoteChoice; 3] = [VoteChoice::Favor, VoteChoice::Against, VoteChoice::Abstain];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteChoice::Favor => "favor",
            VoteChoice::Against => "against",
            VoteChoice::Abstain => "abstain",
        }
    }
}

impl FromStr for VoteChoice {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "favor" => Ok(VoteChoice::Favor),
            "against" => Ok(VoteChoice::Against),
            "abstain" => Ok(VoteChoice::Abstain),
            other => Err(PollError::CorruptRow(format!("unknown vote value: {}", other))),
        }
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteChoice::Favor => write!(f, "Favor"),
            VoteChoice::Against => write!(f, "Against"),
            VoteChoice::Abstain => write!(f, "Abstain"),
        }
    }
}
