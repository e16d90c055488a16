use std::io::{BufRead, Write};

use tokio_util::sync::CancellationToken;
use tracing::info;

use agentic_chat::api::ApiClient;
use agentic_chat::config::ClientConfig;
use agentic_chat::store::Store;
use agentic_chat::transport::sse::SseClient;
use agentic_chat::transport::ws::{WsClient, WsSender};
use agentic_chat::transport::ClientCommand;
use agentic_chat::turn::{TurnController, TurnPhase};

enum Transport {
    Sse,
    Ws,
}

/// Ctrl-C while a turn streams stops it cooperatively. On the socket transport
/// a stop command goes out to the server before the local cancel fires.
fn stop_on_ctrl_c(
    cancel: CancellationToken,
    stop: Option<(WsSender, String)>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        if let Some((sender, conversation_id)) = stop {
            let _ = sender.send(&ClientCommand::Stop { conversation_id }).await;
        }
        cancel.cancel();
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentic_chat=info".into()),
        )
        .init();

    let config = ClientConfig::from_env();
    let transport = match std::env::var("CHAT_TRANSPORT").as_deref() {
        Ok("ws") => Transport::Ws,
        _ => Transport::Sse,
    };

    let api = ApiClient::new(config.api_base.clone());
    let store = Store::new();
    let controller = TurnController::new(api.clone(), store.clone());
    let sse = SseClient::new(&config);
    let ws = WsClient::new(&config);

    info!("Connected to {}", config.api_base);

    match api.list_conversations().await {
        Ok(conversations) => {
            println!("Conversations:");
            for conv in &conversations {
                println!("  {}  {} ({} messages)", conv.id, conv.title, conv.message_count);
            }
            store.set_conversations(conversations);
        }
        Err(e) => eprintln!("Could not list conversations: {e}"),
    }

    println!("Commands: /new <title>, /open <id>, /delete <id>, /quit. Anything else is sent as a message.");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(title) = line.strip_prefix("/new ") {
            let conv = api.create_conversation(title.trim()).await?;
            println!("Created conversation {}", conv.id);
            store.set_active_conversation(Some(conv.id.clone()));
            store.add_conversation(conv);
            continue;
        }
        if let Some(id) = line.strip_prefix("/open ") {
            let detail = api.get_conversation(id.trim()).await?;
            println!("Opened '{}' ({} messages)", detail.conversation.title, detail.messages.len());
            store.replace_messages(&detail.conversation.id, detail.messages);
            store.set_active_conversation(Some(detail.conversation.id));
            continue;
        }
        if let Some(id) = line.strip_prefix("/delete ") {
            let id = id.trim();
            if api.delete_conversation(id).await? {
                store.delete_conversation(id);
                println!("Deleted {id}");
            }
            continue;
        }
        if line == "/quit" {
            break;
        }

        let Some(conversation_id) = store.active_conversation() else {
            println!("No active conversation. Use /new <title> first.");
            continue;
        };

        let cancel = CancellationToken::new();
        let print_delta = |delta: &str| {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        };
        let outcome = match transport {
            Transport::Sse => {
                let mut stream = sse.open(&conversation_id, None);
                let watcher = stop_on_ctrl_c(cancel.clone(), None);
                let result = controller
                    .run_turn_with_progress(
                        &conversation_id,
                        line.to_string(),
                        Vec::new(),
                        &mut stream,
                        cancel,
                        print_delta,
                    )
                    .await;
                watcher.abort();
                result
            }
            Transport::Ws => {
                let mut handle = ws.open(&conversation_id, None);
                let watcher = stop_on_ctrl_c(
                    cancel.clone(),
                    Some((handle.sender(), conversation_id.clone())),
                );
                let result = controller
                    .run_turn_with_progress(
                        &conversation_id,
                        line.to_string(),
                        Vec::new(),
                        handle.stream_mut(),
                        cancel,
                        print_delta,
                    )
                    .await;
                watcher.abort();
                result
            }
        };

        match outcome {
            Ok(outcome) => {
                println!();
                if let Some(message) = &outcome.message {
                    if let Some(artifact_id) = &message.artifact_id {
                        if let Some(artifact) = store.artifact(artifact_id) {
                            println!("[artifact {}: {}]", artifact.id, artifact.title);
                        }
                    }
                }
                match outcome.phase {
                    TurnPhase::Completed => {}
                    TurnPhase::Stopped => println!("[stopped]"),
                    TurnPhase::Errored => println!("[response incomplete]"),
                    _ => {}
                }
                for violation in &outcome.violations {
                    eprintln!("[protocol violation: {violation}]");
                }
            }
            Err(e) => eprintln!("Turn failed: {e}"),
        }
    }

    Ok(())
}
