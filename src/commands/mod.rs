pub mod poll;

use serenity::model::application::command::Command;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::InteractionResponseType;
use serenity::prelude::*;

use crate::error::Result;
use crate::handlers::AppState;

pub async fn register_commands(ctx: &Context) -> std::result::Result<Vec<Command>, serenity::Error> {
    Command::set_global_application_commands(&ctx.http, |commands| {
        commands.create_application_command(|command| poll::create_poll_command(command))
    })
    .await
}

pub async fn handle_command(
    state: &AppState,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
) -> Result<()> {
    match command.data.name.as_str() {
        "poll" => poll::handle_poll_command(state, ctx, command).await?,
        _ => {
            command
                .create_interaction_response(&ctx.http, |response| {
                    response
                        .kind(InteractionResponseType::ChannelMessageWithSource)
                        .interaction_response_data(|message| message.content("Unknown command").ephemeral(true))
                })
                .await?;
        }
    }

    Ok(())
}
