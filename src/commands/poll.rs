use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;
use serenity::model::application::interaction::application_command::{
    ApplicationCommandInteraction, CommandDataOption, CommandDataOptionValue,
};
use serenity::model::application::interaction::InteractionResponseType;
use serenity::model::channel::Attachment;
use serenity::model::id::UserId;
use serenity::prelude::*;
use std::future::Future;

use crate::error::{PollError, Result};
use crate::handlers::render::{breakdown_text, clip_message, discord_timestamp, poll_embed, announcement_components};
use crate::handlers::{has_role, results_message, AppState};
use crate::models::{Member, NewAttachment, NewPoll, Poll, PollEdit, PollStatus, SubPollDraft, SubPollEdit};
use crate::tasks::announcer::refresh_announcement;
use crate::voting::can_manage;
use crate::voting::tally::{ballot_breakdown, participation};

const MAX_QUESTIONS: usize = 20;
/// Largest page the member list endpoint returns.
const MEMBER_PAGE_SIZE: u64 = 1000;

lazy_static! {
    static ref RELATIVE_DEADLINE: Regex =
        Regex::new(r"(?i)^(\d+)\s*(m|mins?|minutes?|h|hrs?|hours?|d|days?|w|weeks?)$").unwrap();
}

pub fn create_poll_command(command: &mut CreateApplicationCommand) -> &mut CreateApplicationCommand {
    command
        .name("poll")
        .description("Create and manage committee polls")
        .create_option(|option| {
            option
                .name("create")
                .description("Create a new poll")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("title")
                        .description("Poll title")
                        .kind(CommandOptionType::String)
                        .required(true)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("questions")
                        .description("Questions separated by |, optionally 'title :: description'")
                        .kind(CommandOptionType::String)
                        .required(true)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("deadline")
                        .description("Relative (48h, 3d) or UTC time (2026-11-01 18:00)")
                        .kind(CommandOptionType::String)
                        .required(true)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("description")
                        .description("What the poll is about")
                        .kind(CommandOptionType::String)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("secret")
                        .description("Hide who voted what (default: yes)")
                        .kind(CommandOptionType::Boolean)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("notify")
                        .description("Mention committee members in the announcement")
                        .kind(CommandOptionType::Boolean)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("attachment")
                        .description("Supporting document")
                        .kind(CommandOptionType::Attachment)
                })
        })
        .create_option(|option| {
            option
                .name("edit")
                .description("Edit a poll's details")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
                .create_sub_option(|sub_option| {
                    sub_option.name("title").description("New title").kind(CommandOptionType::String)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("description")
                        .description("New description")
                        .kind(CommandOptionType::String)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("deadline")
                        .description("New deadline, relative (48h) or UTC time")
                        .kind(CommandOptionType::String)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("secret")
                        .description("Hide who voted what")
                        .kind(CommandOptionType::Boolean)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("notify")
                        .description("Mention committee members")
                        .kind(CommandOptionType::Boolean)
                })
        })
        .create_option(|option| {
            option
                .name("edit_question")
                .description("Change the wording of one question")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("number")
                        .description("Question number as shown in the poll")
                        .kind(CommandOptionType::Integer)
                        .required(true)
                })
                .create_sub_option(|sub_option| {
                    sub_option.name("title").description("New title").kind(CommandOptionType::String)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("description")
                        .description("New description")
                        .kind(CommandOptionType::String)
                })
        })
        .create_option(|option| {
            option
                .name("complete")
                .description("Close a poll to new votes")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
        })
        .create_option(|option| {
            option
                .name("reopen")
                .description("Reopen a completed poll; existing votes are kept")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("deadline")
                        .description("New deadline, needed if the old one has passed")
                        .kind(CommandOptionType::String)
                })
        })
        .create_option(|option| {
            option
                .name("results")
                .description("Show the results of a poll")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("ballots")
                        .description("List individual ballots (open polls only)")
                        .kind(CommandOptionType::Boolean)
                })
        })
        .create_option(|option| {
            option
                .name("status")
                .description("Show who has voted and who is still pending")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
        })
        .create_option(|option| {
            option
                .name("reset_votes")
                .description("Delete one member's votes, or all votes with confirm")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("member")
                        .description("Only reset this member's ballot")
                        .kind(CommandOptionType::User)
                })
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("confirm")
                        .description("Required to delete every vote; cannot be undone")
                        .kind(CommandOptionType::Boolean)
                })
        })
        .create_option(|option| {
            option
                .name("attach")
                .description("Attach a document to a poll")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("file")
                        .description("Document to attach")
                        .kind(CommandOptionType::Attachment)
                        .required(true)
                })
        })
        .create_option(|option| {
            option
                .name("attachments")
                .description("List a poll's documents")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| poll_id_option(sub_option))
        })
        .create_option(|option| {
            option
                .name("list")
                .description("List polls in this server")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub_option| {
                    sub_option
                        .name("status")
                        .description("Only polls with this status")
                        .kind(CommandOptionType::String)
                        .add_string_choice("Active", "active")
                        .add_string_choice("Completed", "completed")
                })
        })
}

fn poll_id_option(
    sub_option: &mut serenity::builder::CreateApplicationCommandOption,
) -> &mut serenity::builder::CreateApplicationCommandOption {
    sub_option
        .name("poll_id")
        .description("ID of the poll")
        .kind(CommandOptionType::String)
        .required(true)
}

pub async fn handle_poll_command(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
) -> Result<()> {
    let subcommand = match command.data.options.first() {
        Some(option) => option,
        None => {
            send_response(ctx, command, "No subcommand provided").await?;
            return Ok(());
        }
    };
    let options = subcommand.options.as_slice();

    match subcommand.name.as_str() {
        "create" => handle_create_poll(state, ctx, command, options).await,
        "edit" => handle_edit_poll(state, ctx, command, options).await,
        "edit_question" => handle_edit_question(state, ctx, command, options).await,
        "complete" => handle_complete_poll(state, ctx, command, options).await,
        "reopen" => handle_reopen_poll(state, ctx, command, options).await,
        "results" => handle_results(state, ctx, command, options).await,
        "status" => handle_status(state, ctx, command, options).await,
        "reset_votes" => handle_reset_votes(state, ctx, command, options).await,
        "attach" => handle_attach(state, ctx, command, options).await,
        "attachments" => handle_attachments(state, ctx, command, options).await,
        "list" => handle_list(state, ctx, command, options).await,
        _ => {
            send_response(ctx, command, "Unknown subcommand").await?;
            Ok(())
        }
    }
}

// Option helpers

fn find<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a CommandDataOptionValue> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.resolved.as_ref())
}

fn string_option(options: &[CommandDataOption], name: &str) -> Option<String> {
    match find(options, name) {
        Some(CommandDataOptionValue::String(value)) => Some(value.clone()),
        _ => None,
    }
}

fn required_string(options: &[CommandDataOption], name: &str) -> Result<String> {
    string_option(options, name).ok_or_else(|| PollError::Validation(format!("missing option `{}`", name)))
}

fn integer_option(options: &[CommandDataOption], name: &str) -> Option<i64> {
    match find(options, name) {
        Some(CommandDataOptionValue::Integer(value)) => Some(*value),
        _ => None,
    }
}

fn bool_option(options: &[CommandDataOption], name: &str) -> Option<bool> {
    match find(options, name) {
        Some(CommandDataOptionValue::Boolean(value)) => Some(*value),
        _ => None,
    }
}

fn user_option(options: &[CommandDataOption], name: &str) -> Option<UserId> {
    match find(options, name) {
        Some(CommandDataOptionValue::User(user, _)) => Some(user.id),
        _ => None,
    }
}

fn attachment_option(options: &[CommandDataOption], name: &str) -> Option<Attachment> {
    match find(options, name) {
        Some(CommandDataOptionValue::Attachment(attachment)) => Some(attachment.clone()),
        _ => None,
    }
}

fn to_new_attachment(attachment: Attachment, uploaded_by: String) -> NewAttachment {
    NewAttachment {
        file_name: attachment.filename,
        path: attachment.url,
        size: attachment.size,
        mime_type: attachment.content_type,
        uploaded_by,
    }
}

// Parsing

/// Accepts `90m`, `48h`, `3d`, `2w`, `2026-11-01 18:00`, `2026-11-01` (end of day) or RFC 3339, all UTC.
pub fn parse_deadline(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    let deadline = if let Some(caps) = RELATIVE_DEADLINE.captures(input) {
        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| PollError::Validation(format!("deadline amount is too large: {}", &caps[1])))?;
        let unit = caps[2].to_lowercase();
        let at = match unit.chars().next() {
            Some('m') => Duration::try_minutes(amount),
            Some('h') => Duration::try_hours(amount),
            Some('d') => Duration::try_days(amount),
            _ => Duration::try_weeks(amount),
        }
        .and_then(|duration| now.checked_add_signed(duration))
        .ok_or_else(|| PollError::Validation(format!("deadline is too far away: {}", input)))?;
        at
    } else if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        at.with_timezone(&Utc)
    } else if let Ok(at) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M") {
        at.and_utc()
    } else if let Ok(day) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        day.and_hms_opt(23, 59, 59)
            .ok_or_else(|| PollError::Validation(format!("invalid date: {}", input)))?
            .and_utc()
    } else {
        return Err(PollError::Validation(format!(
            "could not read deadline `{}`; use e.g. 48h, 3d or 2026-11-01 18:00",
            input
        )));
    };

    if deadline <= now {
        return Err(PollError::Validation("the deadline must be in the future".to_string()));
    }
    Ok(deadline)
}

/// `First question | Second question :: with a description`
pub fn parse_questions(input: &str) -> Result<Vec<SubPollDraft>> {
    let questions: Vec<SubPollDraft> = input
        .split('|')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| match q.split_once("::") {
            Some((title, description)) => SubPollDraft {
                title: title.trim().to_string(),
                description: description.trim().to_string(),
            },
            None => SubPollDraft {
                title: q.to_string(),
                description: String::new(),
            },
        })
        .collect();

    if questions.is_empty() {
        return Err(PollError::Validation("a poll needs at least one question".to_string()));
    }
    if questions.len() > MAX_QUESTIONS {
        return Err(PollError::Validation(format!("a poll can have at most {} questions", MAX_QUESTIONS)));
    }
    Ok(questions)
}

fn to_member(member: &serenity::model::guild::Member) -> Member {
    let display = member.nick.clone().unwrap_or_else(|| member.user.name.clone());
    let (first_name, last_name) = match display.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (display.clone(), String::new()),
    };
    Member {
        id: member.user.id.to_string(),
        first_name,
        last_name,
        email: None,
        phone: None,
        roles: member.roles.iter().map(|r| r.0.to_string()).collect(),
    }
}

/// Follows an `after` cursor until a page comes back short.
async fn collect_pages<T, K, F, Fut>(page_size: u64, mut fetch: F, cursor: impl Fn(&T) -> K) -> Result<Vec<T>>
where
    F: FnMut(Option<K>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut items = Vec::new();
    let mut after = None;
    loop {
        let page = fetch(after).await?;
        let full = page.len() as u64 >= page_size;
        after = page.last().map(&cursor);
        items.extend(page);
        if !full || after.is_none() {
            return Ok(items);
        }
    }
}

// Guards

fn command_guild(command: &ApplicationCommandInteraction) -> Result<String> {
    command
        .guild_id
        .map(|g| g.to_string())
        .ok_or_else(|| PollError::Validation("polls can only be used inside a server".to_string()))
}

/// Loads a poll of this guild. Polls of other guilds look the same as missing ones.
async fn load_poll(state: &AppState, command: &ApplicationCommandInteraction, options: &[CommandDataOption]) -> Result<Poll> {
    let guild_id = command_guild(command)?;
    let poll_id = required_string(options, "poll_id")?;
    let poll = state.manager.database().get_poll(poll_id.trim()).await?;
    if poll.guild_id != guild_id {
        return Err(PollError::PollNotFound);
    }
    Ok(poll)
}

fn ensure_can_manage(state: &AppState, command: &ApplicationCommandInteraction, poll: &Poll) -> Result<()> {
    let is_manager = has_role(command.member.as_ref(), state.config.manager_role_id);
    if can_manage(poll, &command.user.id.to_string(), is_manager) {
        Ok(())
    } else {
        Err(PollError::Forbidden)
    }
}

// Subcommands

async fn handle_create_poll(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let guild_id = command_guild(command)?;
    if !has_role(command.member.as_ref(), state.config.manager_role_id) {
        return Err(PollError::Forbidden);
    }

    let now = Utc::now();
    let user_id = command.user.id.to_string();
    let new_poll = NewPoll {
        guild_id,
        channel_id: command.channel_id.to_string(),
        title: required_string(options, "title")?.trim().to_string(),
        description: string_option(options, "description").unwrap_or_default(),
        deadline: parse_deadline(&required_string(options, "deadline")?, now)?,
        is_secret: bool_option(options, "secret").unwrap_or(true),
        notify_members: bool_option(options, "notify").unwrap_or(false),
        created_by: user_id.clone(),
        sub_polls: parse_questions(&required_string(options, "questions")?)?,
    };
    let attachment = attachment_option(options, "attachment").map(|a| to_new_attachment(a, user_id));

    let poll = state.manager.create(new_poll, attachment, now).await?;
    let attachments = state.manager.database().list_attachments(&poll.id).await?;

    let mention = match (poll.notify_members, state.config.committee_role_id) {
        (true, Some(role_id)) => format!("<@&{}> ", role_id),
        (true, None) => "@here ".to_string(),
        (false, _) => String::new(),
    };
    let message = command
        .channel_id
        .send_message(&ctx.http, |m| {
            m.content(format!("{}A new poll is open until {}", mention, discord_timestamp(poll.deadline)))
                .embed(|e| poll_embed(e, &poll, &attachments))
                .components(|c| announcement_components(c, &poll))
        })
        .await?;
    state
        .manager
        .database()
        .update_poll_message_id(&poll.id, &message.id.to_string())
        .await?;

    info!("Announced poll {} in channel {}", poll.id, command.channel_id);
    send_response(ctx, command, &format!("Poll created. ID: `{}`", poll.id)).await?;
    Ok(())
}

async fn handle_edit_poll(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    ensure_can_manage(state, command, &poll)?;

    let now = Utc::now();
    let deadline = match string_option(options, "deadline") {
        Some(input) => Some(parse_deadline(&input, now)?),
        None => None,
    };
    let edit = PollEdit {
        title: string_option(options, "title").map(|t| t.trim().to_string()),
        description: string_option(options, "description"),
        deadline,
        is_secret: bool_option(options, "secret"),
        notify_members: bool_option(options, "notify"),
    };

    let outcome = state.manager.edit(&poll.id, edit, Vec::new(), now).await?;
    refresh_announcement(&ctx.http, state.manager.database(), &outcome.poll).await?;
    send_response(ctx, command, &edit_reply(&outcome.poll, outcome.had_votes)).await?;
    Ok(())
}

async fn handle_edit_question(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    ensure_can_manage(state, command, &poll)?;

    let number = integer_option(options, "number").unwrap_or(0);
    let sub_poll = usize::try_from(number)
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| poll.sub_polls.get(i))
        .ok_or_else(|| PollError::Validation(format!("question {} does not exist", number)))?;

    let sub_edit = SubPollEdit {
        sub_poll_id: sub_poll.id.clone(),
        title: string_option(options, "title").map(|t| t.trim().to_string()),
        description: string_option(options, "description"),
    };
    let outcome = state
        .manager
        .edit(&poll.id, PollEdit::default(), vec![sub_edit], Utc::now())
        .await?;
    refresh_announcement(&ctx.http, state.manager.database(), &outcome.poll).await?;
    send_response(ctx, command, &edit_reply(&outcome.poll, outcome.had_votes)).await?;
    Ok(())
}

fn edit_reply(poll: &Poll, had_votes: bool) -> String {
    if had_votes && poll.is_active() {
        "Poll updated. Some members already voted on the previous wording; consider resetting their votes.".to_string()
    } else {
        "Poll updated.".to_string()
    }
}

async fn handle_complete_poll(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    ensure_can_manage(state, command, &poll)?;

    state.manager.complete(&poll.id).await?;
    send_response(ctx, command, "Poll completed. Results will be posted in the poll's channel.").await?;
    Ok(())
}

async fn handle_reopen_poll(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    ensure_can_manage(state, command, &poll)?;

    let now = Utc::now();
    let deadline = match string_option(options, "deadline") {
        Some(input) => Some(parse_deadline(&input, now)?),
        None => None,
    };
    // The deadline closer would complete it again on its next pass.
    if deadline.is_none() && poll.deadline_passed(now) {
        return Err(PollError::Validation(
            "the deadline has passed; give a new deadline to reopen this poll".to_string(),
        ));
    }

    let poll = state.manager.reopen(&poll.id, deadline, now).await?;
    send_response(
        ctx,
        command,
        &format!("Poll reopened until {}. Existing votes were kept.", discord_timestamp(poll.deadline)),
    )
    .await?;
    Ok(())
}

async fn handle_results(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    let database = state.manager.database();
    let mut text = results_message(database, &poll).await?;

    if bool_option(options, "ballots").unwrap_or(false) {
        let votes = database.get_poll_votes(&poll.id).await?;
        let lines = ballot_breakdown(&poll, &votes)?;
        text = clip_message(format!("{}\n{}", text, breakdown_text(&poll, &lines)));
    }

    send_response(ctx, command, &text).await?;
    Ok(())
}

async fn handle_status(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    let guild_id = command
        .guild_id
        .ok_or_else(|| PollError::Validation("polls can only be used inside a server".to_string()))?;

    let guild_members = collect_pages(
        MEMBER_PAGE_SIZE,
        |after: Option<UserId>| async move {
            Ok(guild_id.members(&ctx.http, Some(MEMBER_PAGE_SIZE), after).await?)
        },
        |m: &serenity::model::guild::Member| m.user.id,
    )
    .await?;
    let members: Vec<Member> = guild_members
        .iter()
        .filter(|m| !m.user.bot && has_role(Some(*m), state.config.committee_role_id))
        .map(to_member)
        .collect();
    let votes = state.manager.database().get_poll_votes(&poll.id).await?;

    let text = crate::handlers::render::participation_text(&poll, &participation(&members, &votes));
    send_response(ctx, command, &text).await?;
    Ok(())
}

async fn handle_reset_votes(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    ensure_can_manage(state, command, &poll)?;

    let reply = match user_option(options, "member") {
        Some(user_id) => {
            let removed = state.manager.reset_user_votes(&poll.id, &user_id.to_string()).await?;
            format!("Removed {} vote(s) of <@{}>. They can vote again.", removed, user_id)
        }
        None => {
            let confirmed = bool_option(options, "confirm").unwrap_or(false);
            let removed = state.manager.reset_all_votes(&poll.id, confirmed).await?;
            format!("Removed all {} vote(s) from the poll.", removed)
        }
    };
    send_response(ctx, command, &reply).await?;
    Ok(())
}

async fn handle_attach(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    ensure_can_manage(state, command, &poll)?;

    let file = attachment_option(options, "file")
        .ok_or_else(|| PollError::Validation("missing option `file`".to_string()))?;
    let attachment = state
        .manager
        .add_attachment(&poll.id, to_new_attachment(file, command.user.id.to_string()))
        .await?;
    refresh_announcement(&ctx.http, state.manager.database(), &poll).await?;
    send_response(ctx, command, &format!("Attached {}.", attachment.file_name)).await?;
    Ok(())
}

async fn handle_attachments(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let poll = load_poll(state, command, options).await?;
    let attachments = state.manager.attachments(&poll.id).await?;

    let text = if attachments.is_empty() {
        format!("**{}** has no attachments.", poll.title)
    } else {
        let lines = attachments
            .iter()
            .map(|a| format!("[{}]({}) ({} KB)", a.file_name, a.path, a.size.div_ceil(1024)))
            .collect::<Vec<_>>()
            .join("\n");
        clip_message(format!("**Attachments: {}**\n{}", poll.title, lines))
    };
    send_response(ctx, command, &text).await?;
    Ok(())
}

async fn handle_list(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    options: &[CommandDataOption],
) -> Result<()> {
    let guild_id = command_guild(command)?;
    let status = match string_option(options, "status") {
        Some(s) => Some(s.parse::<PollStatus>()?),
        None => None,
    };
    let polls = state.manager.database().list_polls(&guild_id, status).await?;

    let text = if polls.is_empty() {
        "No polls found.".to_string()
    } else {
        let lines = polls
            .iter()
            .map(|p| format!("`{}` **{}** ({}, deadline {})", p.id, p.title, p.status, discord_timestamp(p.deadline)))
            .collect::<Vec<_>>()
            .join("\n");
        clip_message(lines)
    };
    send_response(ctx, command, &text).await?;
    Ok(())
}

async fn send_response(
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    message: &str,
) -> std::result::Result<(), serenity::Error> {
    command
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|data| data.content(message).ephemeral(true))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn relative_deadlines() {
        assert_eq!(parse_deadline("48h", now()).unwrap(), now() + Duration::hours(48));
        assert_eq!(parse_deadline("3 days", now()).unwrap(), now() + Duration::days(3));
        assert_eq!(parse_deadline("90M", now()).unwrap(), now() + Duration::minutes(90));
        assert_eq!(parse_deadline("2w", now()).unwrap(), now() + Duration::weeks(2));
    }

    #[test]
    fn absolute_deadlines_are_utc() {
        assert_eq!(
            parse_deadline("2026-11-01 18:00", now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 11, 1, 18, 0, 0).unwrap()
        );
        assert_eq!(
            parse_deadline("2026-11-01", now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 11, 1, 23, 59, 59).unwrap()
        );
        assert_eq!(
            parse_deadline("2026-11-01T10:00:00+02:00", now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 11, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn past_or_garbled_deadlines_are_rejected() {
        assert!(matches!(parse_deadline("2020-01-01", now()), Err(PollError::Validation(_))));
        assert!(matches!(parse_deadline("0h", now()), Err(PollError::Validation(_))));
        assert!(matches!(parse_deadline("next tuesday", now()), Err(PollError::Validation(_))));
    }

    #[test]
    fn questions_split_on_pipes_with_optional_descriptions() {
        let questions = parse_questions("Approve minutes | Adopt budget :: 2027 draft |  ").unwrap();
        assert_eq!(
            questions,
            vec![
                SubPollDraft { title: "Approve minutes".to_string(), description: String::new() },
                SubPollDraft { title: "Adopt budget".to_string(), description: "2027 draft".to_string() },
            ]
        );
        assert!(parse_questions(" | ").is_err());
        assert!(parse_questions(&vec!["q"; MAX_QUESTIONS + 1].join("|")).is_err());
    }

    #[tokio::test]
    async fn member_pages_are_followed_until_a_short_page() {
        let everyone: Vec<u64> = (1..=7).collect();
        let mut cursors = Vec::new();
        let fetched = collect_pages(
            3,
            |after: Option<u64>| {
                cursors.push(after);
                let start = after.unwrap_or(0) as usize;
                let page: Vec<u64> = everyone.iter().copied().skip(start).take(3).collect();
                async move { Ok(page) }
            },
            |id: &u64| *id,
        )
        .await
        .unwrap();

        assert_eq!(fetched, everyone);
        assert_eq!(cursors, vec![None, Some(3), Some(6)]);
    }

    #[tokio::test]
    async fn an_exactly_full_last_page_costs_one_empty_request() {
        let mut calls = 0;
        let fetched = collect_pages(
            2,
            |after: Option<u64>| {
                calls += 1;
                let page = match after {
                    None => vec![1, 2],
                    Some(_) => vec![],
                };
                async move { Ok(page) }
            },
            |id: &u64| *id,
        )
        .await
        .unwrap();

        assert_eq!(fetched, vec![1, 2]);
        assert_eq!(calls, 2);
    }

    #[test]
    fn edit_reply_warns_when_votes_exist() {
        let poll = Poll::new(NewPoll {
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            title: "t".to_string(),
            description: String::new(),
            deadline: now() + Duration::days(1),
            is_secret: true,
            notify_members: false,
            created_by: "u".to_string(),
            sub_polls: vec![SubPollDraft { title: "q".to_string(), description: String::new() }],
        });
        assert!(edit_reply(&poll, true).contains("already voted"));
        assert_eq!(edit_reply(&poll, false), "Poll updated.");
    }
}
