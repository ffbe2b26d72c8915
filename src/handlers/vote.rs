use chrono::Utc;
use log::info;
use serenity::builder::CreateComponents;
use serenity::model::application::component::{ActionRowComponent, ButtonStyle, InputTextStyle};
use serenity::model::application::interaction::message_component::MessageComponentInteraction;
use serenity::model::application::interaction::modal::ModalSubmitInteraction;
use serenity::model::application::interaction::InteractionResponseType;
use serenity::prelude::*;

use crate::db::Database;
use crate::error::{Ineligibility, PollError, Result};
use crate::handlers::render::{choice_symbol, clip_message, results_text, truncate};
use crate::handlers::{comment_modal_id, has_role, AppState, ComponentAction};
use crate::models::{Poll, Vote, VoteChoice};
use crate::voting::eligibility::{self, check_eligibility, poll_closed_reason};
use crate::voting::tally::anonymous_comments;
use crate::voting::{aggregate_results, submit_votes, BallotDraft};

const QUESTIONS_PER_PAGE: usize = 4;

fn page_count(poll: &Poll) -> usize {
    poll.sub_polls.len().div_ceil(QUESTIONS_PER_PAGE).max(1)
}

fn selected_style(choice: VoteChoice) -> ButtonStyle {
    match choice {
        VoteChoice::Favor => ButtonStyle::Success,
        VoteChoice::Against => ButtonStyle::Danger,
        VoteChoice::Abstain => ButtonStyle::Primary,
    }
}

fn ballot_content(poll: &Poll, draft: &BallotDraft, page: usize) -> String {
    let mut content = format!(
        "**{}**\nPick one answer per question, then submit. Votes cannot be changed afterwards.",
        poll.title
    );
    if page_count(poll) > 1 {
        content.push_str(&format!("\nPage {} of {}", page + 1, page_count(poll)));
    }
    content.push_str(&format!(
        "\nAnswered {} of {}",
        draft.answered(poll),
        poll.sub_polls.len()
    ));
    content
}

/// One row per question (label plus three answers), then a navigation row. Discord allows five rows.
fn ballot_components<'a>(
    components: &'a mut CreateComponents,
    poll: &Poll,
    draft: &BallotDraft,
    page: usize,
) -> &'a mut CreateComponents {
    let pages = page_count(poll);
    let start = page * QUESTIONS_PER_PAGE;

    for (index, sub_poll) in poll.sub_polls.iter().enumerate().skip(start).take(QUESTIONS_PER_PAGE) {
        let selected = draft.choice(&sub_poll.id);
        components.create_action_row(|row| {
            row.create_button(|btn| {
                btn.custom_id(ComponentAction::Label { sub_poll_id: sub_poll.id.clone() }.custom_id())
                    .label(truncate(&format!("{}. {}", index + 1, sub_poll.title), 80))
                    .style(ButtonStyle::Secondary)
                    .disabled(true)
            });
            for choice in VoteChoice::ALL {
                let style = if selected == Some(choice) {
                    selected_style(choice)
                } else {
                    ButtonStyle::Secondary
                };
                row.create_button(|btn| {
                    btn.custom_id(
                        ComponentAction::Choose {
                            poll_id: poll.id.clone(),
                            sub_poll_id: sub_poll.id.clone(),
                            choice,
                            page,
                        }
                        .custom_id(),
                    )
                    .label(format!("{} {}", choice_symbol(choice), choice))
                    .style(style)
                });
            }
            row
        });
    }

    let complete = draft.missing(poll).is_empty();
    components.create_action_row(|row| {
        if page > 0 {
            row.create_button(|btn| {
                btn.custom_id(ComponentAction::Page { poll_id: poll.id.clone(), page: page - 1 }.custom_id())
                    .label("◀ Previous")
                    .style(ButtonStyle::Secondary)
            });
        }
        row.create_button(|btn| {
            btn.custom_id(ComponentAction::Submit { poll_id: poll.id.clone() }.custom_id())
                .label(format!("Submit ({}/{})", draft.answered(poll), poll.sub_polls.len()))
                .style(ButtonStyle::Success)
                .disabled(!complete)
        });
        if page + 1 < pages {
            row.create_button(|btn| {
                btn.custom_id(ComponentAction::Page { poll_id: poll.id.clone(), page: page + 1 }.custom_id())
                    .label("Next ▶")
                    .style(ButtonStyle::Secondary)
            });
        }
        row
    });
    components
}

async fn send_ballot(
    ctx: &Context,
    component: &MessageComponentInteraction,
    poll: &Poll,
    draft: &BallotDraft,
    page: usize,
    kind: InteractionResponseType,
) -> Result<()> {
    let page = page.min(page_count(poll) - 1);
    let content = ballot_content(poll, draft, page);
    component
        .create_interaction_response(&ctx.http, |response| {
            response.kind(kind).interaction_response_data(|message| {
                message
                    .ephemeral(true)
                    .content(content)
                    .components(|c| ballot_components(c, poll, draft, page))
            })
        })
        .await?;
    Ok(())
}

/// Replaces the ballot message with a notice and drops its buttons.
async fn close_ballot(ctx: &Context, component: &MessageComponentInteraction, notice: String) -> Result<()> {
    component
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::UpdateMessage)
                .interaction_response_data(|message| message.content(notice).components(|c| c))
        })
        .await?;
    Ok(())
}

async fn reply_ephemeral(ctx: &Context, component: &MessageComponentInteraction, content: String) -> Result<()> {
    component
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|message| message.content(content).ephemeral(true))
        })
        .await?;
    Ok(())
}

pub async fn open_ballot(
    state: &AppState,
    ctx: &Context,
    component: &MessageComponentInteraction,
    poll_id: &str,
) -> Result<()> {
    if !has_role(component.member.as_ref(), state.config.committee_role_id) {
        return reply_ephemeral(ctx, component, "Only committee members can vote in this poll.".to_string()).await;
    }

    let database = state.manager.database();
    let user_id = component.user.id.to_string();

    // Status and deadline may have changed since the announcement was posted.
    let eligibility = check_eligibility(database, poll_id, &user_id, Utc::now()).await?;
    match eligibility.reason {
        Some(Ineligibility::AlreadyVoted) => {
            let poll = database.get_poll(poll_id).await?;
            let votes = database.get_user_poll_votes(poll_id, &user_id).await?;
            let text = format!("You already voted. {}", ballot_summary(&poll, &votes));
            return reply_ephemeral(ctx, component, clip_message(text)).await;
        }
        Some(reason) => {
            return reply_ephemeral(ctx, component, PollError::NotEligible(reason).user_message()).await;
        }
        None => {}
    }

    info!("Opening ballot for user {} on poll {}", user_id, poll_id);
    let poll = database.get_poll(poll_id).await?;
    let draft = state.drafts.get(poll_id, &user_id).await;
    send_ballot(ctx, component, &poll, &draft, 0, InteractionResponseType::ChannelMessageWithSource).await
}

pub async fn record_choice(
    state: &AppState,
    ctx: &Context,
    component: &MessageComponentInteraction,
    poll_id: &str,
    sub_poll_id: &str,
    choice: VoteChoice,
    page: usize,
) -> Result<()> {
    let poll = state.manager.database().get_poll(poll_id).await?;
    if let Some(reason) = poll_closed_reason(&poll, Utc::now()) {
        return close_ballot(ctx, component, PollError::NotEligible(reason).user_message()).await;
    }
    if poll.sub_poll(sub_poll_id).is_none() {
        return Err(PollError::SubPollNotFound(sub_poll_id.to_string()));
    }

    let user_id = component.user.id.to_string();
    let draft = state
        .drafts
        .update(poll_id, &user_id, Utc::now(), |d| d.choose(sub_poll_id, choice))
        .await;
    send_ballot(ctx, component, &poll, &draft, page, InteractionResponseType::UpdateMessage).await
}

pub async fn show_page(
    state: &AppState,
    ctx: &Context,
    component: &MessageComponentInteraction,
    poll_id: &str,
    page: usize,
) -> Result<()> {
    let poll = state.manager.database().get_poll(poll_id).await?;
    let draft = state.drafts.get(poll_id, &component.user.id.to_string()).await;
    send_ballot(ctx, component, &poll, &draft, page, InteractionResponseType::UpdateMessage).await
}

/// Last stop before writing: re-check eligibility and completeness, then ask for an optional comment.
pub async fn request_comment(
    state: &AppState,
    ctx: &Context,
    component: &MessageComponentInteraction,
    poll_id: &str,
) -> Result<()> {
    let database = state.manager.database();
    let user_id = component.user.id.to_string();
    let poll = database.get_poll(poll_id).await?;

    let eligibility = eligibility::check_loaded(database, &poll, &user_id, Utc::now()).await?;
    if let Some(reason) = eligibility.reason {
        state.drafts.remove(poll_id, &user_id).await;
        return close_ballot(ctx, component, PollError::NotEligible(reason).user_message()).await;
    }

    let draft = state.drafts.get(poll_id, &user_id).await;
    let missing = draft.missing(&poll);
    if !missing.is_empty() {
        let titles = missing.iter().map(|s| s.title.as_str()).collect::<Vec<_>>().join(", ");
        return reply_ephemeral(ctx, component, clip_message(format!("Please answer every question first. Missing: {}", titles))).await;
    }

    component
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::Modal)
                .interaction_response_data(|data| {
                    data.custom_id(comment_modal_id(poll_id))
                        .title(truncate(&format!("Vote: {}", poll.title), 45))
                        .components(|c| {
                            c.create_action_row(|row| {
                                row.create_input_text(|input| {
                                    input
                                        .custom_id("comment")
                                        .label("Comment (optional)")
                                        .style(InputTextStyle::Paragraph)
                                        .required(false)
                                        .max_length(1000)
                                })
                            })
                        })
                })
        })
        .await?;
    Ok(())
}

fn modal_comment(modal: &ModalSubmitInteraction) -> Option<String> {
    modal
        .data
        .components
        .iter()
        .flat_map(|row| row.components.iter())
        .find_map(|component| match component {
            ActionRowComponent::InputText(input) if input.custom_id == "comment" => Some(input.value.clone()),
            _ => None,
        })
}

pub async fn submit_ballot(
    state: &AppState,
    ctx: &Context,
    modal: &ModalSubmitInteraction,
    poll_id: &str,
) -> Result<()> {
    let database = state.manager.database();
    let user_id = modal.user.id.to_string();
    let poll = database.get_poll(poll_id).await?;

    let draft = state.drafts.get(poll_id, &user_id).await;
    let submission = draft.into_submission(&poll, modal_comment(modal));

    let votes = match submit_votes(database, &user_id, submission, Utc::now()).await {
        Ok(votes) => votes,
        Err(e @ PollError::NotEligible(_)) => {
            state.drafts.remove(poll_id, &user_id).await;
            return Err(e);
        }
        Err(e) => return Err(e),
    };
    state.drafts.remove(poll_id, &user_id).await;

    let summary = clip_message(format!("Thank you. {}", ballot_summary(&poll, &votes)));

    modal
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::UpdateMessage)
                .interaction_response_data(|message| message.content(summary).components(|c| c))
        })
        .await?;
    Ok(())
}

/// A member's own recorded choices, in question order. Only ever shown to that member.
fn ballot_summary(poll: &Poll, votes: &[Vote]) -> String {
    let mut summary = format!("Your vote on **{}** is recorded:\n", poll.title);
    for (index, sub_poll) in poll.sub_polls.iter().enumerate() {
        if let Some(vote) = votes.iter().find(|v| v.sub_poll_id == sub_poll.id) {
            summary.push_str(&format!("{}. {}: {} {}\n", index + 1, sub_poll.title, choice_symbol(vote.vote), vote.vote));
        }
    }
    summary
}

/// Per-question tallies plus anonymous comments, as posted in results messages.
pub async fn results_message(database: &Database, poll: &Poll) -> Result<String> {
    let results = aggregate_results(database, &poll.id).await?;
    let votes = database.get_poll_votes(&poll.id).await?;
    Ok(results_text(poll, &results, &anonymous_comments(&votes)))
}

pub async fn show_results(
    state: &AppState,
    ctx: &Context,
    component: &MessageComponentInteraction,
    poll_id: &str,
) -> Result<()> {
    let database = state.manager.database();
    let poll = database.get_poll(poll_id).await?;
    let text = results_message(database, &poll).await?;
    reply_ephemeral(ctx, component, text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPoll, SubPollDraft};
    use chrono::Duration;

    fn poll_with(questions: usize) -> Poll {
        Poll::new(NewPoll {
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            title: "Budget".to_string(),
            description: String::new(),
            deadline: Utc::now() + Duration::days(1),
            is_secret: true,
            notify_members: false,
            created_by: "chair".to_string(),
            sub_polls: (1..=questions)
                .map(|i| SubPollDraft { title: format!("Line {}", i), description: String::new() })
                .collect(),
        })
    }

    #[test]
    fn ballot_pages_hold_four_questions() {
        assert_eq!(page_count(&poll_with(1)), 1);
        assert_eq!(page_count(&poll_with(4)), 1);
        assert_eq!(page_count(&poll_with(5)), 2);
        assert_eq!(page_count(&poll_with(9)), 3);
    }

    #[test]
    fn ballot_content_shows_progress() {
        let poll = poll_with(5);
        let mut draft = BallotDraft::default();
        draft.choose(&poll.sub_polls[4].id, VoteChoice::Favor);
        let content = ballot_content(&poll, &draft, 1);
        assert!(content.contains("Page 2 of 2"));
        assert!(content.contains("Answered 1 of 5"));
    }

    #[test]
    fn ballot_summary_follows_question_order() {
        let poll = poll_with(2);
        let vote = |index: usize, choice: VoteChoice| Vote {
            id: uuid::Uuid::new_v4().to_string(),
            poll_id: poll.id.clone(),
            sub_poll_id: poll.sub_polls[index].id.clone(),
            user_id: "u1".to_string(),
            vote: choice,
            comment: None,
            voted_at: Utc::now(),
        };
        let votes = vec![vote(1, VoteChoice::Abstain), vote(0, VoteChoice::Favor)];

        let summary = ballot_summary(&poll, &votes);
        let first = summary.find("1. Line 1").unwrap();
        let second = summary.find("2. Line 2").unwrap();
        assert!(first < second);
        assert!(summary.contains("Line 2: ✋ Abstain"));
    }
}
