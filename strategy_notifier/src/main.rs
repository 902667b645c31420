use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use strategy_notifier::{
    FileStorage, Footer, GenerationRecord, HttpStrategyApi, Notification, Notifier,
    NotifierConfig, NotifierError, NotifierHandle, SharedStore, Tone,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the strategy service (overrides STRATEGY_API_URL)
    #[arg(short, long)]
    base_url: Option<String>,

    /// File the generation record is persisted in
    #[arg(short, long, default_value = ".strategy_generation.json")]
    state_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start generating a strategy for a company and follow its progress
    Start { company_id: String },
    /// Resume following whatever generation the state file holds
    Watch,
    /// Print the persisted generation record
    Status,
    /// Clear the record and hide the notification
    Dismiss,
    /// Close the notification; the record is kept while a job is running
    Close,
    /// Print the page of the generated strategy
    View,
}

/// Prints each notification change on its own line.
fn render(notification: &Notification) {
    if !notification.visible {
        return;
    }
    match notification.tone {
        Tone::Progress => println!(
            "⏳ [{:>3}%] {}",
            notification.progress,
            notification
                .step_text
                .as_deref()
                .unwrap_or(&notification.status_text)
        ),
        Tone::Persistent => {
            println!("✅ {}: {}", notification.title, notification.status_text);
            if let Footer::ViewStrategy { strategy_id } = &notification.footer {
                println!("   Action Required: review strategy {}", strategy_id);
            }
        }
        Tone::Error => {
            println!("❌ {}: {}", notification.title, notification.status_text);
            if notification.footer == Footer::Dismiss {
                println!("   Run `strategy_notifier dismiss` to clear it.");
            }
        }
    }
}

fn spawn_notifier(
    config: NotifierConfig,
    store: &SharedStore,
) -> Result<NotifierHandle, NotifierError> {
    let api = Arc::new(HttpStrategyApi::new(&config)?);
    Ok(Notifier::new(config, store.attach(), api, render).start())
}

/// Follows the notifier until nothing is left to show, an error is shown, or Ctrl-C.
async fn follow(
    handle: &NotifierHandle,
    store: &SharedStore,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let tab = store.attach();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                let state = handle.inspect().await?;
                if tab.get_item(key)?.is_none() && !state.notification.visible {
                    break;
                }
                if state.notification.tone == Tone::Error && state.notification.visible {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = NotifierConfig::from_env();
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url);
    }
    let key = config.storage_key.clone();
    let store = SharedStore::new(FileStorage::new(&args.state_file));

    let handle = match args.command {
        Command::Status => {
            match store.attach().get_item(&key)? {
                Some(raw) => {
                    let record = GenerationRecord::from_json(&raw)?;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                None => println!("No generation in progress."),
            }
            return Ok(());
        }
        Command::Start { company_id } => {
            let handle = spawn_notifier(config, &store)?;
            handle.start_generation(company_id)?;
            follow(&handle, &store, &key).await?;
            handle
        }
        Command::Watch => {
            let handle = spawn_notifier(config, &store)?;
            follow(&handle, &store, &key).await?;
            handle
        }
        Command::Dismiss => {
            let handle = spawn_notifier(config, &store)?;
            handle.dismiss()?;
            handle
        }
        Command::Close => {
            let handle = spawn_notifier(config, &store)?;
            handle.close()?;
            handle
        }
        Command::View => {
            let handle = spawn_notifier(config, &store)?;
            match handle.view_strategy().await? {
                Some(url) => println!("{}", url),
                None => eprintln!("❌ No generated strategy to view."),
            }
            handle
        }
    };

    handle.stop().await?;
    Ok(())
}
