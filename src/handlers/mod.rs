pub mod render;
mod vote;

use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::message_component::MessageComponentInteraction;
use serenity::model::application::interaction::modal::ModalSubmitInteraction;
use serenity::model::application::interaction::{Interaction, InteractionResponseType};
use serenity::model::guild::Member as GuildMember;
use serenity::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{PollError, Result};
use crate::models::VoteChoice;
use crate::voting::{BallotDraft, PollManager};

pub use vote::results_message;

/// Everything an interaction handler needs, shared across spawned tasks.
pub struct AppState {
    pub manager: Arc<PollManager>,
    pub drafts: Arc<BallotDrafts>,
    pub config: Config,
}

/// Drafts nobody touched for this long are dropped on the next update.
const DRAFT_TTL_HOURS: i64 = 24;

struct StoredDraft {
    draft: BallotDraft,
    touched_at: DateTime<Utc>,
}

/// Unsubmitted ballots, keyed by (poll id, user id). Lost on restart, which only costs a few clicks.
#[derive(Default)]
pub struct BallotDrafts {
    inner: Mutex<HashMap<(String, String), StoredDraft>>,
}

impl BallotDrafts {
    pub async fn get(&self, poll_id: &str, user_id: &str) -> BallotDraft {
        self.inner
            .lock()
            .await
            .get(&(poll_id.to_string(), user_id.to_string()))
            .map(|stored| stored.draft.clone())
            .unwrap_or_default()
    }

    pub async fn update<F>(&self, poll_id: &str, user_id: &str, now: DateTime<Utc>, f: F) -> BallotDraft
    where
        F: FnOnce(&mut BallotDraft),
    {
        let mut drafts = self.inner.lock().await;
        let cutoff = now - Duration::hours(DRAFT_TTL_HOURS);
        drafts.retain(|_, stored| stored.touched_at > cutoff);

        let stored = drafts
            .entry((poll_id.to_string(), user_id.to_string()))
            .or_insert_with(|| StoredDraft { draft: BallotDraft::default(), touched_at: now });
        stored.touched_at = now;
        f(&mut stored.draft);
        stored.draft.clone()
    }

    pub async fn remove(&self, poll_id: &str, user_id: &str) {
        self.inner
            .lock()
            .await
            .remove(&(poll_id.to_string(), user_id.to_string()));
    }

    /// Forgets every member's draft for a poll. Returns how many were dropped.
    pub async fn remove_poll(&self, poll_id: &str) -> usize {
        let mut drafts = self.inner.lock().await;
        let before = drafts.len();
        drafts.retain(|(draft_poll, _), _| draft_poll != poll_id);
        before - drafts.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Button ids carry everything needed to handle the click, so no component state is kept server-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentAction {
    OpenBallot { poll_id: String },
    ShowResults { poll_id: String },
    Choose { poll_id: String, sub_poll_id: String, choice: VoteChoice, page: usize },
    Page { poll_id: String, page: usize },
    Submit { poll_id: String },
    Label { sub_poll_id: String },
}

impl ComponentAction {
    pub fn custom_id(&self) -> String {
        match self {
            ComponentAction::OpenBallot { poll_id } => format!("ballot_{}", poll_id),
            ComponentAction::ShowResults { poll_id } => format!("results_{}", poll_id),
            ComponentAction::Choose { poll_id, sub_poll_id, choice, page } => {
                format!("choice_{}_{}_{}_{}", poll_id, sub_poll_id, choice.as_str(), page)
            }
            ComponentAction::Page { poll_id, page } => format!("page_{}_{}", poll_id, page),
            ComponentAction::Submit { poll_id } => format!("submit_{}", poll_id),
            ComponentAction::Label { sub_poll_id } => format!("label_{}", sub_poll_id),
        }
    }

    pub fn parse(custom_id: &str) -> Option<Self> {
        let parts: Vec<&str> = custom_id.split('_').collect();
        match parts.as_slice() {
            ["ballot", poll_id] => Some(ComponentAction::OpenBallot { poll_id: poll_id.to_string() }),
            ["results", poll_id] => Some(ComponentAction::ShowResults { poll_id: poll_id.to_string() }),
            ["choice", poll_id, sub_poll_id, choice, page] => Some(ComponentAction::Choose {
                poll_id: poll_id.to_string(),
                sub_poll_id: sub_poll_id.to_string(),
                choice: choice.parse().ok()?,
                page: page.parse().ok()?,
            }),
            ["page", poll_id, page] => Some(ComponentAction::Page {
                poll_id: poll_id.to_string(),
                page: page.parse().ok()?,
            }),
            ["submit", poll_id] => Some(ComponentAction::Submit { poll_id: poll_id.to_string() }),
            ["label", sub_poll_id] => Some(ComponentAction::Label { sub_poll_id: sub_poll_id.to_string() }),
            _ => None,
        }
    }
}

const COMMENT_MODAL_PREFIX: &str = "comment_";

pub fn comment_modal_id(poll_id: &str) -> String {
    format!("{}{}", COMMENT_MODAL_PREFIX, poll_id)
}

/// No configured role means the check is open to every guild member.
pub fn has_role(member: Option<&GuildMember>, role_id: Option<u64>) -> bool {
    match role_id {
        None => true,
        Some(role_id) => member
            .map(|m| m.roles.iter().any(|r| r.0 == role_id))
            .unwrap_or(false),
    }
}

pub async fn handle_component(
    state: &AppState,
    ctx: &Context,
    component: &MessageComponentInteraction,
) -> Result<()> {
    let custom_id = &component.data.custom_id;
    info!("Received component interaction: {}", custom_id);

    let action = match ComponentAction::parse(custom_id) {
        Some(action) => action,
        None => {
            warn!("Unhandled component custom_id: {}", custom_id);
            component
                .create_interaction_response(&ctx.http, |response| {
                    response
                        .kind(InteractionResponseType::ChannelMessageWithSource)
                        .interaction_response_data(|message| message.content("Unknown button action.").ephemeral(true))
                })
                .await?;
            return Ok(());
        }
    };

    match action {
        ComponentAction::OpenBallot { poll_id } => vote::open_ballot(state, ctx, component, &poll_id).await,
        ComponentAction::ShowResults { poll_id } => vote::show_results(state, ctx, component, &poll_id).await,
        ComponentAction::Choose { poll_id, sub_poll_id, choice, page } => {
            vote::record_choice(state, ctx, component, &poll_id, &sub_poll_id, choice, page).await
        }
        ComponentAction::Page { poll_id, page } => vote::show_page(state, ctx, component, &poll_id, page).await,
        ComponentAction::Submit { poll_id } => vote::request_comment(state, ctx, component, &poll_id).await,
        ComponentAction::Label { .. } => {
            // Disabled label buttons; acknowledge so the client doesn't show a failure.
            component
                .create_interaction_response(&ctx.http, |response| {
                    response.kind(InteractionResponseType::DeferredUpdateMessage)
                })
                .await?;
            Ok(())
        }
    }
}

pub async fn handle_modal(state: &AppState, ctx: &Context, modal: &ModalSubmitInteraction) -> Result<()> {
    info!("Received modal submission: {}", modal.data.custom_id);
    match modal.data.custom_id.strip_prefix(COMMENT_MODAL_PREFIX) {
        Some(poll_id) => vote::submit_ballot(state, ctx, modal, poll_id).await,
        None => {
            warn!("Unhandled modal custom_id: {}", modal.data.custom_id);
            Ok(())
        }
    }
}

fn log_failure(kind: &str, err: &PollError) {
    if err.is_backend() {
        error!("{} handler error: {:?}", kind, err);
    } else {
        info!("{} rejected: {}", kind, err);
    }
}

pub async fn handle_interaction(state: &AppState, ctx: &Context, interaction: Interaction) {
    match interaction {
        Interaction::ApplicationCommand(command) => {
            if let Err(why) = crate::commands::handle_command(state, ctx, &command).await {
                log_failure("Command", &why);
                report_command_error(ctx, &command, &why).await;
            }
        }
        Interaction::MessageComponent(component) => {
            if let Err(why) = handle_component(state, ctx, &component).await {
                log_failure("Component", &why);
                let message = why.user_message();
                let reported = component
                    .create_interaction_response(&ctx.http, |response| {
                        response
                            .kind(InteractionResponseType::ChannelMessageWithSource)
                            .interaction_response_data(|m| m.content(message).ephemeral(true))
                    })
                    .await;
                if let Err(e) = reported {
                    warn!("Could not report component error to user: {}", e);
                }
            }
        }
        Interaction::ModalSubmit(modal) => {
            if let Err(why) = handle_modal(state, ctx, &modal).await {
                log_failure("Modal", &why);
                let message = why.user_message();
                let reported = modal
                    .create_interaction_response(&ctx.http, |response| {
                        response
                            .kind(InteractionResponseType::ChannelMessageWithSource)
                            .interaction_response_data(|m| m.content(message).ephemeral(true))
                    })
                    .await;
                if let Err(e) = reported {
                    warn!("Could not report modal error to user: {}", e);
                }
            }
        }
        _ => {
            warn!("Unhandled interaction type: {:?}", interaction.kind());
        }
    }
}

async fn report_command_error(ctx: &Context, command: &ApplicationCommandInteraction, err: &PollError) {
    let message = err.user_message();
    let reported = command
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|m| m.content(message).ephemeral(true))
        })
        .await;
    if let Err(e) = reported {
        warn!("Could not report command error to user: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_ids_survive_discord_and_back() {
        let poll_id = uuid::Uuid::new_v4().to_string();
        let sub_poll_id = uuid::Uuid::new_v4().to_string();
        let action = ComponentAction::Choose {
            poll_id: poll_id.clone(),
            sub_poll_id,
            choice: VoteChoice::Abstain,
            page: 2,
        };
        let id = action.custom_id();
        assert!(id.len() <= 100);
        assert_eq!(ComponentAction::parse(&id), Some(action));
        assert_eq!(
            ComponentAction::parse(&format!("ballot_{}", poll_id)),
            Some(ComponentAction::OpenBallot { poll_id })
        );
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert_eq!(ComponentAction::parse("choice_p_s_maybe_0"), None);
        assert_eq!(ComponentAction::parse("page_p_x"), None);
        assert_eq!(ComponentAction::parse("vote_button"), None);
    }

    #[tokio::test]
    async fn drafts_are_kept_per_poll_and_user() {
        let drafts = BallotDrafts::default();
        drafts.update("p1", "u1", Utc::now(), |d| d.choose("q1", VoteChoice::Favor)).await;

        assert_eq!(drafts.get("p1", "u1").await.choice("q1"), Some(VoteChoice::Favor));
        assert_eq!(drafts.get("p1", "u2").await.choice("q1"), None);

        drafts.remove("p1", "u1").await;
        assert_eq!(drafts.get("p1", "u1").await.choice("q1"), None);
    }

    #[tokio::test]
    async fn abandoned_drafts_expire_on_later_updates() {
        let drafts = BallotDrafts::default();
        let start = Utc::now();
        for i in 0..1000 {
            drafts
                .update("p1", &format!("u{}", i), start, |d| d.choose("q1", VoteChoice::Against))
                .await;
        }
        assert_eq!(drafts.len().await, 1000);

        let recent = start + Duration::hours(DRAFT_TTL_HOURS - 1);
        drafts.update("p1", "u0", recent, |d| d.choose("q2", VoteChoice::Favor)).await;
        assert_eq!(drafts.len().await, 1000);

        let next_day = start + Duration::hours(DRAFT_TTL_HOURS + 1);
        drafts.update("p2", "late", next_day, |d| d.choose("q1", VoteChoice::Favor)).await;
        assert_eq!(drafts.len().await, 2);
        assert_eq!(drafts.get("p1", "u0").await.choice("q2"), Some(VoteChoice::Favor));
        assert_eq!(drafts.get("p1", "u1").await.choice("q1"), None);
    }

    #[tokio::test]
    async fn closing_a_poll_forgets_only_its_drafts() {
        let drafts = BallotDrafts::default();
        let now = Utc::now();
        drafts.update("p1", "u1", now, |d| d.choose("q1", VoteChoice::Favor)).await;
        drafts.update("p1", "u2", now, |d| d.choose("q1", VoteChoice::Abstain)).await;
        drafts.update("p2", "u1", now, |d| d.choose("q9", VoteChoice::Against)).await;

        assert_eq!(drafts.remove_poll("p1").await, 2);
        assert_eq!(drafts.len().await, 1);
        assert_eq!(drafts.get("p2", "u1").await.choice("q9"), Some(VoteChoice::Against));
    }

    #[test]
    fn no_configured_role_lets_everyone_through() {
        assert!(has_role(None, None));
        assert!(!has_role(None, Some(42)));
    }
}
