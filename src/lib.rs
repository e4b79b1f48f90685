// Chat session engine for the FindexAI assistant: thread and settings stores,
// the send-message lifecycle, and a terminal host driving them.

pub mod api;
pub mod commands;
pub mod config;
pub mod exchange;
pub mod models;
pub mod settings;
pub mod state;
pub mod storage;
pub mod threads;

use anyhow::{Context, Result};
use commands::{CommandHost, Outcome};
use config::AppConfig;
use state::AppState;
use std::io::Write;
use std::sync::Arc;
use storage::SqliteStore;
use tokio::io::{AsyncBufReadExt, BufReader};

pub fn run() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let config = AppConfig::from_env()?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run_host(config))
}

async fn run_host(config: AppConfig) -> Result<()> {
    let kv = Arc::new(SqliteStore::open(&config.database_path()).await?);
    let state = AppState::from_config(kv.clone(), &config).await?;

    // Start on a thread, as the chat view always shows one
    state.threads.lock().await.ensure_active_thread().await;

    let mut host = CommandHost::new(state).await;
    println!("FindexAI chat. Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let command = match commands::parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match host.execute(command).await {
            Outcome::Continue(text) => println!("{}", text),
            Outcome::Quit => break,
        }
    }

    kv.close().await;
    Ok(())
}
