use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use doogie_client::views::think_parser::{parse_think_segments, SegmentKind};
use doogie_client::{
    ApiClient, AuthService, ChatController, ChatRepository, ChunkResolution, ChunkResolver,
    ClientConfig, Message, Role, SessionEvent, SessionPhase, TokenStore,
};

#[derive(Parser)]
#[command(name = "doogie", about = "Terminal client for the Doogie chat server")]
struct Cli {
    /// Server base URL (overrides config file and DOOGIE_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the token pair
    Login {
        username: String,
        /// Keep tokens in memory only instead of persisting them
        #[arg(long)]
        session_only: bool,
    },
    /// Drop the stored session
    Logout,
    /// Show the authenticated user
    Whoami,
    /// List chats, most recently updated first
    Chats,
    /// Print a chat transcript
    Show { chat_id: String },
    /// Send a message and stream the reply. Without --chat a new chat is
    /// created from the first message.
    Send {
        message: String,
        #[arg(long)]
        chat: Option<String>,
    },
    /// Delete a chat
    Delete { chat_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::load();
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    debug!(base_url = %config.base_url, "Client configured");

    let token_path = TokenStore::default_path().context("could not resolve a config directory")?;
    let tokens = Arc::new(TokenStore::new(token_path));
    let client = Arc::new(ApiClient::new(config.base_url.clone(), tokens));
    let auth = AuthService::new(client.clone());

    // A lost session anywhere surfaces as one hint to log in again.
    let mut session_rx = client.subscribe_session();
    tokio::spawn(async move {
        if let Ok(SessionEvent::SessionLost) = session_rx.recv().await {
            eprintln!("Session expired. Run `doogie login <username>` to sign in again.");
        }
    });

    match cli.command {
        Command::Login {
            username,
            session_only,
        } => {
            let password = read_password()?;
            let persistent = config.persist_tokens && !session_only;
            auth.login(&username, &password, persistent)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let user = auth
                .current_user()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Logged in as {}", user.username);
        }
        Command::Logout => {
            auth.logout();
            println!("Logged out.");
        }
        Command::Whoami => {
            let user = auth
                .current_user()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{} ({})", user.username, user.id);
        }
        Command::Chats => {
            let controller = build_controller(&client);
            controller
                .load_chats()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            for chat in controller.snapshot().chats {
                println!("{}  {}  {}", chat.id, chat.updated_at.format("%Y-%m-%d %H:%M"), chat.title);
            }
        }
        Command::Show { chat_id } => {
            let controller = build_controller(&client);
            controller
                .select_chat(&chat_id)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let snapshot = controller.snapshot();
            let chat = snapshot.current.context("chat not loaded")?;
            println!("# {}", chat.title);
            for msg in &chat.messages {
                print_message(&controller, msg).await;
            }
        }
        Command::Send { message, chat } => {
            let controller = build_controller(&client);
            if let Some(chat_id) = chat {
                controller
                    .select_chat(&chat_id)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            }
            run_send(&controller, &message).await?;
        }
        Command::Delete { chat_id } => {
            let controller = build_controller(&client);
            controller
                .load_chats()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            controller
                .delete_chat(&chat_id)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Deleted {chat_id}.");
        }
    }

    Ok(())
}

fn build_controller(client: &Arc<ApiClient>) -> Arc<ChatController> {
    let repo = Arc::new(ChatRepository::new(client.clone()));
    let resolver = Arc::new(ChunkResolver::new(client.clone()));
    Arc::new(ChatController::new(repo, resolver))
}

/// Stream the reply to stdout as it grows, then print the final rendering
/// with metadata and resolved citations.
async fn run_send(controller: &Arc<ChatController>, message: &str) -> Result<()> {
    let mut rx = controller.subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            let Some(chat) = &snapshot.current else { continue };
            let Some(msg) = chat.messages.iter().rev().find(|m| m.role == Role::Assistant)
            else {
                continue;
            };
            let content = &msg.content;
            if content.len() >= printed && content.is_char_boundary(printed) {
                print!("{}", &content[printed..]);
                let _ = std::io::stdout().flush();
            }
            printed = content.len();
            if snapshot.phase == SessionPhase::Refreshing {
                break;
            }
        }
    });

    let accepted = controller.send(message).await;
    printer.abort();
    if !accepted {
        bail!("message was rejected (empty, or a stream is already active)");
    }
    println!();

    let snapshot = controller.snapshot();
    if let Some(error) = snapshot.error {
        bail!(error);
    }
    let chat = snapshot.current.context("no chat after send")?;
    if let Some(msg) = chat.messages.iter().rev().find(|m| m.role == Role::Assistant) {
        print_message(controller, msg).await;
    }
    Ok(())
}

/// Render one transcript message: think segments marked, metadata and
/// citations appended for assistant turns.
async fn print_message(controller: &Arc<ChatController>, msg: &Message) {
    let speaker = match msg.role {
        Role::User => "you",
        Role::Assistant => "doogie",
        Role::System => "system",
    };
    println!("\n[{speaker}]");
    for segment in parse_think_segments(&msg.content) {
        match segment.kind {
            SegmentKind::Plain => println!("{}", segment.text.trim_end()),
            SegmentKind::Thinking => {
                let marker = if segment.complete { "thinking" } else { "thinking…" };
                println!("  ({marker}) {}", segment.text.trim());
            }
        }
    }

    if msg.role != Role::Assistant {
        return;
    }
    if let (Some(tokens), Some(tps)) = (msg.tokens, msg.tokens_per_second) {
        let model = msg.model.as_deref().unwrap_or("?");
        let provider = msg.provider.as_deref().unwrap_or("?");
        println!("  -- {tokens} tokens at {tps:.1} tok/s via {model} ({provider})");
    }
    for (chunk_id, resolution) in controller.resolve_citations(&msg.id).await {
        match resolution {
            ChunkResolution::Resolved {
                document_id,
                document_title,
            } => println!("  [{chunk_id}] {document_title} (document {document_id})"),
            // The chunk is gone (documents were reprocessed); show the bare
            // id so it can still be searched for in the admin interface.
            ChunkResolution::Failed => println!("  [{chunk_id}] (search in admin)"),
        }
    }
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var("DOOGIE_PASSWORD") {
        return Ok(password);
    }
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
