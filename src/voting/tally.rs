use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::db::Database;
use crate::error::{PollError, Result};
use crate::models::{Member, Poll, SubPoll, Vote, VoteChoice};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubPollTally {
    pub favor: u64,
    pub against: u64,
    pub abstain: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Favor,
    Against,
    Abstain,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPollResult {
    pub sub_poll_id: String,
    pub title: String,
    pub tally: SubPollTally,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResults {
    pub poll_id: String,
    /// In question order.
    pub sub_polls: Vec<SubPollResult>,
    pub voters: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participation {
    pub voted: Vec<Member>,
    pub pending: Vec<Member>,
}

/// One member's full ballot. Only ever built for open (non-secret) polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotLine {
    pub user_id: String,
    pub choices: Vec<(String, VoteChoice)>,
    pub comment: Option<String>,
}

impl SubPollTally {
    pub fn record(&mut self, choice: VoteChoice) {
        match choice {
            VoteChoice::Favor => self.favor += 1,
            VoteChoice::Against => self.against += 1,
            VoteChoice::Abstain => self.abstain += 1,
        }
        self.total += 1;
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::from_counts(self.favor, self.against, self.abstain)
    }
}

impl Outcome {
    /// Strict maximum wins; ties and empty tallies have no outcome.
    pub fn from_counts(favor: u64, against: u64, abstain: u64) -> Self {
        if favor > against && favor > abstain {
            Outcome::Favor
        } else if against > favor && against > abstain {
            Outcome::Against
        } else if abstain > favor && abstain > against {
            Outcome::Abstain
        } else {
            Outcome::None
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Favor => write!(f, "In favor"),
            Outcome::Against => write!(f, "Against"),
            Outcome::Abstain => write!(f, "Abstain"),
            Outcome::None => write!(f, "No outcome"),
        }
    }
}

impl PollResults {
    /// Summary across all questions. Each question's own outcome is what decides it.
    pub fn overall(&self) -> Outcome {
        let sum = self.sub_polls.iter().fold(SubPollTally::default(), |mut acc, r| {
            acc.favor += r.tally.favor;
            acc.against += r.tally.against;
            acc.abstain += r.tally.abstain;
            acc.total += r.tally.total;
            acc
        });
        sum.outcome()
    }
}

/// Counts every vote against the known questions; votes for unknown questions are skipped.
pub fn tally_votes(poll_id: &str, sub_polls: &[SubPoll], votes: &[Vote]) -> PollResults {
    let mut results: Vec<SubPollResult> = sub_polls
        .iter()
        .map(|s| SubPollResult {
            sub_poll_id: s.id.clone(),
            title: s.title.clone(),
            tally: SubPollTally::default(),
        })
        .collect();
    let index: HashMap<&str, usize> = sub_polls
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut voters = HashSet::new();
    for vote in votes {
        if let Some(&i) = index.get(vote.sub_poll_id.as_str()) {
            results[i].tally.record(vote.vote);
            voters.insert(vote.user_id.as_str());
        }
    }

    PollResults {
        poll_id: poll_id.to_string(),
        sub_polls: results,
        voters: voters.len(),
    }
}

pub async fn aggregate_results(database: &Database, poll_id: &str) -> Result<PollResults> {
    let sub_polls = database.get_sub_polls(poll_id).await?;
    if sub_polls.is_empty() {
        // Polls always have at least one question; none means the poll is gone.
        database.get_poll(poll_id).await?;
    }
    let votes = database.get_poll_votes(poll_id).await?;
    Ok(tally_votes(poll_id, &sub_polls, &votes))
}

/// Splits members into voted and pending. Vote values never leave this function.
pub fn participation(members: &[Member], votes: &[Vote]) -> Participation {
    let voters: HashSet<&str> = votes.iter().map(|v| v.user_id.as_str()).collect();
    let (voted, pending): (Vec<Member>, Vec<Member>) = members
        .iter()
        .cloned()
        .partition(|m| voters.contains(m.id.as_str()));
    Participation { voted, pending }
}

/// Distinct ballot comments, without the identity of their authors.
pub fn anonymous_comments(votes: &[Vote]) -> Vec<String> {
    let mut by_user: BTreeMap<&str, &str> = BTreeMap::new();
    for vote in votes {
        if let Some(comment) = vote.comment.as_deref() {
            by_user.entry(vote.user_id.as_str()).or_insert(comment);
        }
    }
    let mut comments: Vec<String> = by_user.into_values().map(str::to_string).collect();
    comments.sort();
    comments
}

pub fn ballot_breakdown(poll: &Poll, votes: &[Vote]) -> Result<Vec<BallotLine>> {
    if poll.is_secret {
        return Err(PollError::SecretBallot);
    }

    let position: HashMap<&str, i64> = poll
        .sub_polls
        .iter()
        .map(|s| (s.id.as_str(), s.position))
        .collect();

    let mut lines: BTreeMap<&str, BallotLine> = BTreeMap::new();
    for vote in votes.iter().filter(|v| position.contains_key(v.sub_poll_id.as_str())) {
        let line = lines.entry(vote.user_id.as_str()).or_insert_with(|| BallotLine {
            user_id: vote.user_id.clone(),
            choices: Vec::new(),
            comment: vote.comment.clone(),
        });
        line.choices.push((vote.sub_poll_id.clone(), vote.vote));
    }

    let mut lines: Vec<BallotLine> = lines.into_values().collect();
    for line in &mut lines {
        line.choices
            .sort_by_key(|(sub_poll_id, _)| position.get(sub_poll_id.as_str()).copied().unwrap_or(i64::MAX));
    }
    Ok(lines)
}
