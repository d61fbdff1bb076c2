//! focuslock - focus session enforcer
//!
//! "You are timeboxed, not cryptographically locked."
//!
//! Usage:
//!   focuslock start [MINS]      Run a focus session in the foreground (default: 20 mins)
//!   focuslock start --task "X"  Name what you're working on
//!   focuslock backend           Show which restriction backend this host gets
//!
//! While a session runs, the strongest available restriction backend is
//! engaged and continuously re-asserted. The only way out before the timer
//! expires is the escape hold: press Ctrl-C to begin holding, keep holding
//! for the full threshold, press Ctrl-C again to abandon the attempt.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use focuslock_core::{detect, host_tools, EndReason, SessionConfig, SessionEngine, SessionStart, SessionState};

/// Focuslock - timeboxed focus sessions with a hold-to-unlock escape hatch
#[derive(Parser)]
#[command(name = "focuslock")]
#[command(about = "Focus session enforcer - make the device unusable for anything else")]
#[command(version)]
#[command(after_help = r#"HOW IT WORKS:
    Starting a session engages the strongest restriction backend available
    on this host and keeps re-asserting it until the timer runs out. Ending
    early takes deliberate effort: a sustained 10-second hold.

BACKENDS (strongest first):
    kiosk          fullscreen + keep-above + foreground pinning (wmctrl/xdotool)
    screen-lock    one privileged lock-now request (loginctl/xdg-screensaver/pmset)
    idle-inhibit   keeps the screen awake (systemd-inhibit/caffeinate)

EXAMPLES:
    focuslock start                  # 20-minute session
    focuslock start 45 --task "API"  # custom duration with a task name
    focuslock start 5 --hold-secs 3  # short session, short escape hold
    focuslock backend                # what would this host get?

ESCAPE HOLD:
    Ctrl-C starts the hold. Keep holding (do nothing) for the threshold and
    the session unlocks. A second Ctrl-C abandons the attempt; progress is
    discarded, never carried over.

ALIASES:
    focuslock s     # start
    focuslock b     # backend
"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a focus session in the foreground
    #[command(alias = "s")]
    Start {
        /// Duration in minutes (default: 20)
        #[arg(value_name = "MINS")]
        duration: Option<u64>,

        /// What you're working on
        #[arg(long)]
        task: Option<String>,

        /// Seconds the escape gesture must be held
        #[arg(long, default_value = "10")]
        hold_secs: u64,

        /// Print machine-readable status lines instead of the progress bar
        #[arg(long)]
        json: bool,
    },

    /// Show which restriction backend this host gets
    #[command(alias = "b")]
    Backend {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

// ANSI color codes
const GREEN: &str = "\x1b[0;32m";
const CYAN: &str = "\x1b[0;36m";
const YELLOW: &str = "\x1b[0;33m";
const MAGENTA: &str = "\x1b[0;35m";
const BOLD: &str = "\x1b[1m";
const NC: &str = "\x1b[0m";

/// Check if stdout is a TTY and colors should be used
fn use_colors() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stdout())
}

/// Conditionally apply color
fn color(code: &str, text: &str) -> String {
    if use_colors() {
        format!("{}{}{}", code, text, NC)
    } else {
        text.to_string()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { run_command(cli.command).await })
}

async fn run_command(command: Option<Commands>) -> Result<()> {
    match command {
        Some(Commands::Start {
            duration,
            task,
            hold_secs,
            json,
        }) => cmd_start(duration, task, hold_secs, json).await,
        Some(Commands::Backend { json }) => cmd_backend(json),
        None => cmd_backend(false),
    }
}

/// Run a focus session in the foreground until it ends
async fn cmd_start(
    duration: Option<u64>,
    task: Option<String>,
    hold_secs: u64,
    json: bool,
) -> Result<()> {
    let minutes = duration.unwrap_or(20);
    let config = SessionConfig {
        total: Duration::from_secs(minutes * 60),
        escape_threshold: Duration::from_secs(hold_secs),
        ..Default::default()
    };
    let engine = SessionEngine::new(detect(), config);

    match engine.start_session().await {
        SessionStart::Engaged => {
            println!("{} Focus session started", color(GREEN, "[ok]"));
        }
        SessionStart::Degraded(err) => {
            // Still timeboxed; the countdown governs the session regardless.
            println!("{} Restriction degraded: {}", color(YELLOW, "[warn]"), err);
        }
        SessionStart::AlreadyActive => {
            println!("{} A session is already active", color(CYAN, "[info]"));
            return Ok(());
        }
    }

    let ends_at: DateTime<Local> = Local::now() + chrono::Duration::seconds((minutes * 60) as i64);
    println!();
    println!("{}", color(&format!("{}{}", BOLD, MAGENTA), "FOCUS MODE"));
    println!();
    println!("  {}   {} minutes", color(CYAN, "Duration:"), minutes);
    if let Some(ref t) = task {
        println!("  {}       {}", color(CYAN, "Task:"), t);
    }
    println!("  {}    {}", color(CYAN, "Backend:"), engine.restriction_name());
    println!("  {}    {}", color(CYAN, "Ends at:"), ends_at.format("%H:%M"));
    println!();
    println!(
        "Ctrl-C starts the escape hold ({}s); Ctrl-C again abandons it",
        hold_secs
    );
    println!();

    // Ctrl-C events feed the escape gesture, not process termination.
    let (signal_tx, mut signal_rx) = tokio::sync::mpsc::channel::<()>(4);
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            if signal_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    let mut status_tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                if engine.state() == SessionState::Idle {
                    break;
                }
                render_status(&engine, json);
            }
            Some(()) = signal_rx.recv() => {
                if engine.escape_progress().engaged {
                    engine.on_hold_end();
                    if !json {
                        println!();
                        println!("{} Escape hold abandoned", color(CYAN, "[info]"));
                    }
                } else {
                    engine.on_hold_start();
                    if !json {
                        println!();
                        println!(
                            "{} Escape hold started - keep holding for {}s",
                            color(CYAN, "[info]"),
                            hold_secs
                        );
                    }
                }
            }
        }
        if engine.state() == SessionState::Idle {
            break;
        }
    }

    if !json {
        println!();
        println!();
    }
    match engine.last_end_reason() {
        Some(EndReason::CountdownExpired) => {
            println!("{} Session complete. Take a break.", color(GREEN, "[ok]"));
        }
        Some(EndReason::EscapeCompleted) => {
            println!("{} Session unlocked early via escape hold", color(GREEN, "[ok]"));
        }
        Some(EndReason::ExternalRequest) | None => {
            println!("{} Session ended", color(GREEN, "[ok]"));
        }
    }

    Ok(())
}

/// Render one status line, overwriting the previous one
fn render_status(engine: &SessionEngine, json: bool) {
    let countdown = engine.countdown();
    let escape = engine.escape_progress();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "state": engine.state(),
                "countdown": countdown,
                "escape": escape,
            })
        );
        return;
    }

    let bar_width: usize = 30;
    let filled = (bar_width * countdown.progress_percent() as usize) / 100;
    let bar = format!(
        "{}{}",
        "\u{2588}".repeat(filled),
        "\u{2591}".repeat(bar_width - filled)
    );

    let mins = countdown.remaining_secs / 60;
    let secs = countdown.remaining_secs % 60;
    let mut line = format!("  [{}] {:02}:{:02} remaining", bar, mins, secs);

    if escape.engaged {
        line.push_str(&format!(
            "  (hold {}s/{}s)",
            escape.elapsed.as_secs(),
            escape.threshold.as_secs()
        ));
    }

    print!("\r{}\x1b[K", line);
    let _ = std::io::stdout().flush();
}

/// Show detected backend and host tool availability
fn cmd_backend(json: bool) -> Result<()> {
    let backend = detect();
    let tools = host_tools();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "backend": backend.name(),
                "strength": backend.strength().as_str(),
                "tools": tools.iter().map(|(name, present)| {
                    serde_json::json!({ "name": name, "present": present })
                }).collect::<Vec<_>>(),
            })
        );
        return Ok(());
    }

    println!("{}", color(BOLD, "Restriction backend"));
    println!();
    println!("  {}   {}", color(CYAN, "Selected:"), backend.name());
    println!("  {}   {}", color(CYAN, "Strength:"), backend.strength().as_str());
    println!();
    println!("{}", color(BOLD, "Host tools"));
    println!();
    for (name, present) in tools {
        let symbol = if present {
            color(GREEN, "\u{25cf}")
        } else {
            color(YELLOW, "\u{25cb}")
        };
        println!("  {} {}", symbol, name);
    }

    Ok(())
}
