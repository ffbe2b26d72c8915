use chrono::{DateTime, Utc};
use serenity::builder::{CreateComponents, CreateEmbed};
use serenity::model::application::component::ButtonStyle;

use crate::handlers::ComponentAction;
use crate::models::{Member, Poll, PollAttachment, PollStatus, VoteChoice};
use crate::voting::tally::{BallotLine, Participation, PollResults};

const MESSAGE_LIMIT: usize = 1900;
const ACTIVE_COLOUR: u32 = 0x2e86de;
const CLOSED_COLOUR: u32 = 0x7f8c8d;

/// Cuts on a character boundary and marks the cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

pub fn clip_message(text: String) -> String {
    if text.chars().count() <= MESSAGE_LIMIT {
        text
    } else {
        truncate(&text, MESSAGE_LIMIT)
    }
}

pub fn discord_timestamp(at: DateTime<Utc>) -> String {
    format!("<t:{0}:F> (<t:{0}:R>)", at.timestamp())
}

pub fn choice_symbol(choice: VoteChoice) -> &'static str {
    match choice {
        VoteChoice::Favor => "👍",
        VoteChoice::Against => "👎",
        VoteChoice::Abstain => "✋",
    }
}

pub fn poll_embed<'a>(
    embed: &'a mut CreateEmbed,
    poll: &Poll,
    attachments: &[PollAttachment],
) -> &'a mut CreateEmbed {
    let mut description = String::new();
    if !poll.description.is_empty() {
        description.push_str(&poll.description);
        description.push_str("\n\n");
    }
    for (i, sub_poll) in poll.sub_polls.iter().enumerate() {
        description.push_str(&format!("**{}. {}**\n", i + 1, sub_poll.title));
        if !sub_poll.description.is_empty() {
            description.push_str(&format!("{}\n", sub_poll.description));
        }
    }

    embed
        .title(truncate(&poll.title, 256))
        .description(truncate(&description, 4000))
        .colour(if poll.is_active() { ACTIVE_COLOUR } else { CLOSED_COLOUR })
        .field("Deadline", discord_timestamp(poll.deadline), false)
        .field("Status", poll.status.to_string(), true)
        .field("Ballot", if poll.is_secret { "Secret" } else { "Open" }, true)
        .field("Poll ID", &poll.id, false);

    if !attachments.is_empty() {
        let links = attachments
            .iter()
            .map(|a| format!("[{}]({})", a.file_name, a.path))
            .collect::<Vec<_>>()
            .join("\n");
        embed.field("Attachments", truncate(&links, 1024), false);
    }
    embed
}

/// Vote and results buttons under the announcement. Voting is disabled once the poll is completed.
pub fn announcement_components<'a>(components: &'a mut CreateComponents, poll: &Poll) -> &'a mut CreateComponents {
    components.create_action_row(|row| {
        row.create_button(|btn| {
            btn.custom_id(ComponentAction::OpenBallot { poll_id: poll.id.clone() }.custom_id())
                .label("Cast vote")
                .style(ButtonStyle::Primary)
                .disabled(poll.status == PollStatus::Completed)
        })
        .create_button(|btn| {
            btn.custom_id(ComponentAction::ShowResults { poll_id: poll.id.clone() }.custom_id())
                .label("Results")
                .style(ButtonStyle::Secondary)
        })
    })
}

pub fn results_text(poll: &Poll, results: &PollResults, comments: &[String]) -> String {
    let mut text = format!("**Results: {}** ({})\n", poll.title, poll.status);
    text.push_str(&format!("{} member(s) voted.\n\n", results.voters));

    for (i, result) in results.sub_polls.iter().enumerate() {
        let tally = &result.tally;
        text.push_str(&format!(
            "**{}. {}**\n{} {} · {} {} · {} {} ({} vote(s)): {}\n",
            i + 1,
            result.title,
            choice_symbol(VoteChoice::Favor),
            tally.favor,
            choice_symbol(VoteChoice::Against),
            tally.against,
            choice_symbol(VoteChoice::Abstain),
            tally.abstain,
            tally.total,
            tally.outcome(),
        ));
    }

    if results.sub_polls.len() > 1 {
        text.push_str(&format!("\nAcross all questions: {}\n", results.overall()));
    }

    if !comments.is_empty() {
        text.push_str("\n**Comments**\n");
        for comment in comments {
            text.push_str(&format!("> {}\n", truncate(comment, 300)));
        }
    }
    clip_message(text)
}

pub fn participation_text(poll: &Poll, participation: &Participation) -> String {
    let names = |members: &[Member]| -> String {
        if members.is_empty() {
            "nobody".to_string()
        } else {
            members.iter().map(|m| m.display_name()).collect::<Vec<_>>().join(", ")
        }
    };

    clip_message(format!(
        "**Participation: {}**\nVoted ({}): {}\nPending ({}): {}",
        poll.title,
        participation.voted.len(),
        names(&participation.voted),
        participation.pending.len(),
        names(&participation.pending),
    ))
}

pub fn breakdown_text(poll: &Poll, lines: &[BallotLine]) -> String {
    let mut text = format!("**Ballots: {}**\n", poll.title);
    if lines.is_empty() {
        text.push_str("No ballots yet.");
    }
    for line in lines {
        let choices = line
            .choices
            .iter()
            .map(|(sub_poll_id, choice)| {
                let number = poll
                    .sub_polls
                    .iter()
                    .position(|s| &s.id == sub_poll_id)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                format!("{}: {}", number, choice)
            })
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str(&format!("<@{}>: {}", line.user_id, choices));
        if let Some(comment) = &line.comment {
            text.push_str(&format!(" ({})", truncate(comment, 100)));
        }
        text.push('\n');
    }
    clip_message(text)
}
