//! Operator CLI for the chat store.
//!
//! Reads `WAREHOUSE_*` and `CHAT_STORE_*` settings from the environment (a
//! `.env` file is loaded if present).

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_store::{chat, file, message, provider_session, ChatStore, PageCursor, StoreConfig};
use warehouse_client::{StaticToken, WarehouseConfig};

#[derive(Debug, Parser)]
#[command(name = "store-admin")]
#[command(about = "Inspect and maintain the chat store")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check connectivity with a trivial query
    Ping,

    /// Create the messages and files tables if missing
    EnsureTables,

    /// Show which optional columns the messages table has
    ProbeSchema,

    /// List a user's chats, newest first
    ListChats {
        #[arg(long)]
        user: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Continue after this chat id (older chats)
        #[arg(long)]
        before: Option<String>,
    },

    /// Print a chat with its messages, provider sessions and files
    ShowChat {
        #[arg(long)]
        chat: String,
    },

    /// Count a user's messages in a trailing window
    CountMessages {
        #[arg(long)]
        user: String,

        /// Window length in seconds
        #[arg(long, default_value_t = 86_400)]
        window_secs: u64,
    },

    /// Delete a chat and everything attached to it
    DeleteChat {
        #[arg(long)]
        chat: String,

        /// Required to actually delete
        #[arg(long)]
        yes: bool,
    },

    /// Delete every chat of a user
    DeleteUserChats {
        #[arg(long)]
        user: String,

        /// Required to actually delete
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = ChatStore::connect(
        WarehouseConfig::from_env()?,
        Arc::new(StaticToken::from_env()?),
        StoreConfig::from_env()?,
    )?;

    match cli.command {
        Command::Ping => {
            let ok = store.client().ping().await?;
            println!("{}", if ok { "ok" } else { "unexpected reply" });
        }
        Command::EnsureTables => {
            store.ensure_tables().await?;
            info!("Tables ready");
        }
        Command::ProbeSchema => match store.negotiator().probe().await? {
            Some(snapshot) => {
                println!("cast mode: {}", snapshot.cast_mode);
                if snapshot.disabled.is_empty() {
                    println!("all optional columns present");
                }
                for column in &snapshot.disabled {
                    println!("missing: {}", column);
                }
            }
            None => println!("table not found"),
        },
        Command::ListChats {
            user,
            limit,
            before,
        } => {
            let cursor = before.map(PageCursor::EndingBefore);
            let page = chat::get_chats_by_user_id(&store, &user, limit, cursor.as_ref()).await?;
            for c in &page.chats {
                println!(
                    "{}\t{}\t{}\t{}",
                    c.id,
                    c.created_at.to_rfc3339(),
                    c.visibility.as_str(),
                    c.title
                );
            }
            if page.has_more {
                if let Some(last) = page.chats.last() {
                    println!("more: --before {}", last.id);
                }
            }
        }
        Command::ShowChat { chat: chat_id } => show_chat(&store, &chat_id).await?,
        Command::CountMessages { user, window_secs } => {
            let count = message::get_message_count_by_user_id(
                &store,
                &user,
                Duration::from_secs(window_secs),
            )
            .await?;
            println!("{}", count);
        }
        Command::DeleteChat { chat: chat_id, yes } => {
            if !yes {
                return Err("refusing to delete without --yes".into());
            }
            match chat::delete_chat_by_id(&store, &chat_id).await? {
                Some(deleted) => info!("Deleted chat {} ({})", deleted.id, deleted.title),
                None => info!("Chat {} had no rows", chat_id),
            }
        }
        Command::DeleteUserChats { user, yes } => {
            if !yes {
                return Err("refusing to delete without --yes".into());
            }
            let summary = chat::delete_all_chats_by_user_id(&store, &user).await?;
            println!("deleted {}, failed {}", summary.deleted, summary.failed);
            if summary.failed > 0 {
                return Err(format!("{} chat(s) could not be deleted", summary.failed).into());
            }
        }
    }

    Ok(())
}

async fn show_chat(store: &ChatStore, chat_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(found) = chat::get_chat_by_id(store, chat_id).await? else {
        return Err(format!("chat {} not found", chat_id).into());
    };
    println!("{}", serde_json::to_string_pretty(&found)?);

    for m in message::get_messages_by_chat_id(store, chat_id).await? {
        println!(
            "[{}] {} {}: {}",
            m.created_at.to_rfc3339(),
            m.id,
            m.role.as_str(),
            m.plain_text()
        );
    }
    for session in provider_session::get_provider_sessions_by_chat_id(store, chat_id).await? {
        println!("provider {} -> {}", session.provider, session.session_id);
    }
    for f in file::get_files_by_chat_id(store, chat_id).await? {
        println!("file {} {} ({} bytes)", f.file_id, f.name, f.size_bytes);
    }
    Ok(())
}
