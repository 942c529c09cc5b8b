//! Council client - terminal front end for a multi-model LLM council
//!
//! Sends each question to the council backend, streams the three-stage
//! pipeline (individual answers, peer rankings, chairman synthesis) and
//! renders it as it arrives.

mod backend;
mod config;
mod repl;
mod runtime;
mod state_machine;
mod ui;

use backend::BackendClient;
use config::ClientConfig;
use repl::{Command, HELP};
use runtime::{ProductionController, TurnError, TurnOptions, TurnOutcome};
use state_machine::Message;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout belongs to the transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "council_client=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        api_url = %config.api_url,
        web_search = config.web_search,
        "Starting council client"
    );

    let client = BackendClient::new(&config)?;
    let controller = Arc::new(runtime::production_controller(client));

    controller.reload_conversations().await;
    if let Some(id) = &config.conversation_id {
        controller.select(id).await?;
    } else {
        controller.new_conversation().await?;
    }

    let (prompts, prompt_rx) = mpsc::unbounded_channel();
    let feeds = ui::RenderFeeds {
        transcript: controller.subscribe_conversation(),
        busy: controller.subscribe_busy(),
        errors: controller.subscribe_errors(),
        prompts: prompt_rx,
    };
    let renderer = tokio::spawn(ui::render(feeds, std::io::stdout(), config.tick_interval));

    println!("{HELP}");
    let result = run(&controller, &prompts, config.web_search).await;

    renderer.abort();
    tracing::info!("Council client exiting");
    result
}

/// Read-eval loop. Ctrl-C while idle exits.
async fn run(
    controller: &ProductionController,
    prompts: &mpsc::UnboundedSender<String>,
    mut web_search: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(controller, prompts);
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            return Ok(());
        };

        let command = match Command::parse(&line) {
            None => continue,
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                println!("{e}");
                continue;
            }
        };

        match command {
            Command::Ask(content) => ask(controller, &content, TurnOptions { web_search }).await,
            Command::New => match controller.new_conversation().await {
                Ok(created) => println!("Started conversation {}", created.id),
                Err(e) => println!("Could not create conversation: {e}"),
            },
            Command::List => {
                controller.reload_conversations().await;
                list(controller);
            }
            Command::Switch(id) => match controller.select(&id).await {
                Ok(()) => show_history(controller),
                Err(e) => println!("Could not open {id}: {e}"),
            },
            Command::Delete(id) => match controller.delete(&id).await {
                Ok(()) => println!("Deleted {id}"),
                Err(e) => println!("Could not delete {id}: {e}"),
            },
            Command::Search(enabled) => {
                web_search = enabled;
                println!("Web search {}", if enabled { "on" } else { "off" });
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(()),
        }
    }
}

/// Run one turn. Ctrl-C while it runs aborts it instead of exiting.
async fn ask(controller: &ProductionController, content: &str, options: TurnOptions) {
    let turn = controller.send_turn(content, options);
    tokio::pin!(turn);

    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            _ = tokio::signal::ctrl_c() => {
                if controller.abort_current() {
                    println!("\nAborting...");
                }
            }
        }
    };

    match result {
        Ok(TurnOutcome::Completed) => {}
        Ok(TurnOutcome::Cancelled) => println!("(aborted, partial results kept)"),
        Err(e @ TurnError::NoConversation) => println!("{e}"),
        // The renderer reports these from the controller's error feed
        Err(_) => {}
    }
}

/// Printed by the renderer once it has caught up with the transcript
fn prompt(controller: &ProductionController, prompts: &mpsc::UnboundedSender<String>) {
    let title = controller
        .conversation()
        .and_then(|c| c.title)
        .unwrap_or_else(|| "New Conversation".to_string());
    let _ = prompts.send(format!("\n[{title}] > "));
}

fn list(controller: &ProductionController) {
    let selected = controller.selected_id();
    for summary in controller.conversations() {
        let marker = if selected.as_deref() == Some(summary.id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {}  {} ({} messages)",
            summary.id,
            summary.title.as_deref().unwrap_or("New Conversation"),
            summary.message_count
        );
    }
}

fn show_history(controller: &ProductionController) {
    let Some(conversation) = controller.conversation() else {
        return;
    };
    for message in &conversation.messages {
        match message.as_ref() {
            Message::User { content } => println!("> {content}"),
            Message::Assistant(assistant) => {
                if let Some(answer) = &assistant.stage3 {
                    println!("{}: {}", ui::short_model_name(&answer.model), answer.response);
                }
            }
        }
    }
}
