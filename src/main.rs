//! VoicePay - Voice-driven UPI payments
//!
//! Demo front end: stdin lines are typed speech or `:commands`, flow outputs
//! are printed as they arrive.

use anyhow::Result;
use clap::Parser;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voicepay::config::{self, Config};
use voicepay::core::format_inr;
use voicepay::flow::{FlowOutput, NoticeLevel, Session, SessionHandle, UserAction};
use voicepay::wallet::RemoteWallet;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log in as this user instead of the configured default
    #[arg(short, long)]
    user: Option<String>,

    /// Use the local SQLite wallet instead of the HTTP backend
    #[arg(long)]
    local: bool,

    /// Recognition mode: auto, native, heuristic or typed
    #[arg(short, long)]
    recognition: Option<String>,

    /// Config file to load instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,
}

const HELP: &str = "\
Type what you would say, or a command:
  :scan <payload>   deliver a decoded payment code
  :listen           listen for \"UPI activate\"
  :manual           open the scanner without voice
  :confirm          confirm the payment
  :cancel           cancel / enter the amount again
  :reset            back to idle
  :done             finish after a payment
  :history          toggle transaction history
  :user <name>      switch user
  :refresh          reload the wallet
  :balance <amount> override the balance
  :quit             exit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_file = args.config.clone().unwrap_or_else(config::config_path);
    let mut config = Config::load_from(&config_file)?;
    if args.local {
        config.backend = "local".to_string();
    }
    if let Some(mode) = &args.recognition {
        config.recognition = mode.clone();
    }
    if let Some(user) = &args.user {
        config.default_user = user.clone();
    }

    // RUST_LOG wins; otherwise --verbose, then the configured level
    let fallback = if args.verbose {
        "debug".to_string()
    } else {
        config.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("💸 VoicePay v{} starting...", env!("CARGO_PKG_VERSION"));

    if !config.uses_local_backend()
        && !RemoteWallet::new(&config.api_base_url).health_check().await
    {
        warn!(
            "⚠️ Wallet API at {} is not answering; use --local for the offline wallet",
            config.api_base_url
        );
    }

    let (session, handle, outputs) = Session::build(&config).await?;
    let printer = tokio::spawn(print_outputs(outputs));
    let task = session.spawn();

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !dispatch(&handle, line) {
            break;
        }
    }

    handle.shutdown();
    task.await?;
    printer.abort();
    info!("✅ VoicePay stopped");
    Ok(())
}

/// Route one input line; false to quit
fn dispatch(handle: &SessionHandle, line: &str) -> bool {
    let Some(command) = line.strip_prefix(':') else {
        if !handle.say(line) {
            println!("(not listening right now; try :listen, :confirm or :reset)");
        }
        return true;
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "q" | "exit" => return false,
        "scan" => {
            handle.scan(arg);
        }
        "listen" => {
            handle.act(UserAction::Listen);
        }
        "manual" => {
            handle.act(UserAction::ScanManually);
        }
        "confirm" => {
            handle.act(UserAction::Confirm);
        }
        "cancel" => {
            handle.act(UserAction::Cancel);
        }
        "reset" => {
            handle.act(UserAction::Reset);
        }
        "done" => {
            handle.act(UserAction::Done);
        }
        "history" => {
            print_history(handle);
            handle.act(UserAction::ToggleHistory);
        }
        "user" if !arg.is_empty() => {
            handle.act(UserAction::SwitchUser(arg.to_string()));
        }
        "refresh" => {
            handle.act(UserAction::Refresh);
        }
        "balance" => match Decimal::from_str(arg) {
            Ok(amount) => {
                handle.act(UserAction::SetBalance(amount));
            }
            Err(_) => println!("usage: :balance <amount>"),
        },
        _ => println!("{}", HELP),
    }
    true
}

fn print_history(handle: &SessionHandle) {
    let Some(snapshot) = handle.wallet().cached() else {
        println!("(no wallet loaded)");
        return;
    };
    println!("Balance: {}", format_inr(snapshot.balance));
    if snapshot.transactions.is_empty() {
        println!("  no transactions yet");
    }
    for tx in &snapshot.transactions {
        println!("  {}", tx.summary());
    }
}

async fn print_outputs(mut outputs: UnboundedReceiver<FlowOutput>) {
    while let Some(output) = outputs.recv().await {
        match output {
            FlowOutput::StateChanged { to, .. } => println!("[{}] {}", to, to.prompt()),
            FlowOutput::Transcript(text) if !text.is_empty() => println!("  heard: {}", text),
            FlowOutput::Transcript(_) => {}
            FlowOutput::Notice(notice) => {
                let mark = match notice.level {
                    NoticeLevel::Info => "ℹ️",
                    NoticeLevel::Success => "✅",
                    NoticeLevel::Warning => "⚠️",
                    NoticeLevel::Error => "❌",
                };
                println!("{} {}: {}", mark, notice.title, notice.message);
            }
            FlowOutput::PaymentRecorded(tx) => println!("  recorded {}", tx.id),
            FlowOutput::Balance(balance) => println!("  balance: {}", format_inr(balance)),
        }
    }
}
