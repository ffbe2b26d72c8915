mod commands;
mod config;
mod db;
mod error;
mod events;
mod handlers;
mod models;
mod tasks;
mod voting;

use config::Config;
use db::Database;
use events::{EventBus, PollEvent};
use handlers::{AppState, BallotDrafts};
use log::{error, info};
use async_trait::async_trait;
use serenity::model::application::interaction::Interaction;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use voting::PollManager;

struct Bot {
    state: Arc<AppState>,
    events: Mutex<Option<UnboundedReceiver<PollEvent>>>,
    started: AtomicBool,
}

#[async_trait]
impl EventHandler for Bot {
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            handlers::handle_interaction(&state, &ctx, interaction).await;
        });
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        match commands::register_commands(&ctx).await {
            Ok(registered) => info!("Registered {} global slash command(s).", registered.len()),
            Err(why) => error!("Failed to register slash commands: {:?}", why),
        }

        // Ready fires again after reconnects; background tasks start once.
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = Arc::clone(&self.state.manager);
        let interval_secs = self.state.config.poll_check_interval_secs;
        tokio::spawn(async move {
            tasks::poll_closer::check_expired_polls_task(manager, interval_secs).await;
        });

        if let Some(events) = self.events.lock().await.take() {
            let http = Arc::clone(&ctx.http);
            let database = self.state.manager.database_handle();
            let drafts = Arc::clone(&self.state.drafts);
            tokio::spawn(async move {
                tasks::announcer::run_announcer(events, http, database, drafts).await;
            });
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let database = match Database::new(&config.database_url, config.database_max_connections).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    let (bus, events) = EventBus::channel();
    let state = Arc::new(AppState {
        manager: Arc::new(PollManager::new(database, Some(bus))),
        drafts: Arc::new(BallotDrafts::default()),
        config,
    });

    // Member lists for participation need the privileged members intent.
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MEMBERS;

    let token = state.config.discord_token.clone();
    let bot = Bot {
        state,
        events: Mutex::new(Some(events)),
        started: AtomicBool::new(false),
    };
    let mut client = match Client::builder(&token, intents).event_handler(bot).await {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating client: {:?}", e);
            return;
        }
    };

    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }
}
