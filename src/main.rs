//! Muxrun: run many shell commands concurrently, each in its own pane.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads configuration, and drives the main event loop that
//! couples the scheduler (which owns the pty children) to either the
//! split-pane TUI or prefixed line output.

mod app;
mod command;
mod config;
mod error;
mod events;
mod output;
mod pty;
mod scheduler;
mod screen;
mod source;
mod tui;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::tty::IsTty;
use tokio::sync::mpsc;

use crate::app::{App, RunResult};
use crate::command::CommandStatus;
use crate::config::{Config, Mode};
use crate::error::RunError;
use crate::events::Event;
use crate::scheduler::{Scheduler, DEFAULT_GRACE};
use crate::source::TaskSource;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "muxrun",
    version,
    about = "Run shell commands concurrently in split panes",
    styles = help_styles(),
    color = clap::ColorChoice::Always
)]
struct Cli {
    /// Shell command lines to run (one pane each). In xargs mode they form
    /// a single command template applied to each stdin line.
    #[arg(required = true)]
    commands: Vec<String>,
    /// Max commands running at once.
    #[arg(short, long)]
    parallelism: Option<usize>,
    /// Build one command per stdin line from the template.
    #[arg(short = 'x', long)]
    xargs: bool,
    /// Replace token for xargs mode.
    #[arg(short = 'I', long)]
    replace_str: Option<String>,
    /// Cancel everything as soon as one command fails.
    #[arg(long)]
    break_on_fail: bool,
    /// Output mode ("auto", "tty", "plain").
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,
    /// Prepend elapsed time to each line in plain mode.
    #[arg(long)]
    ts: bool,
    /// Path to muxrun.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any muxrun.toml in the current directory.
    #[arg(long)]
    no_config: bool,
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
struct RunSettings {
    parallelism: usize,
    replace_str: String,
    tick: Duration,
    tail_lines: usize,
    mode: Mode,
    break_on_fail: bool,
    timestamp: bool,
}

impl RunSettings {
    fn from_cli(cli: &Cli, config: &Config) -> Result<Self, RunError> {
        let parallelism = cli
            .parallelism
            .or(config.parallelism)
            .unwrap_or(config::DEFAULT_PARALLELISM);
        if parallelism == 0 {
            return Err(RunError::Config("parallelism must be at least 1".into()));
        }
        let replace_str = cli
            .replace_str
            .clone()
            .or_else(|| config.replace_str.clone())
            .unwrap_or_else(|| config::DEFAULT_REPLACE_STR.to_string());
        if replace_str.is_empty() {
            return Err(RunError::Config("replace token must not be empty".into()));
        }
        let tick_ms = config.tick_ms.unwrap_or(config::DEFAULT_TICK_MS).max(1);
        let tail_lines = config.tail_lines.unwrap_or(config::DEFAULT_TAIL_LINES).max(1);
        Ok(Self {
            parallelism,
            replace_str,
            tick: Duration::from_millis(tick_ms),
            tail_lines,
            mode: cli.mode.or(config.mode).unwrap_or_default(),
            break_on_fail: cli.break_on_fail || config.break_on_fail.unwrap_or(false),
            timestamp: cli.ts,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = if cli.no_config {
        Config::default()
    } else {
        match Config::load(cli.config.as_deref()) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("muxrun: {err}");
                std::process::exit(2);
            }
        }
    };
    let settings = match RunSettings::from_cli(&cli, &config) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("muxrun: {err}");
            std::process::exit(2);
        }
    };

    let source = if cli.xargs {
        let template = cli.commands.join(" ");
        TaskSource::xargs(template, settings.replace_str.clone())
    } else {
        TaskSource::fixed(cli.commands.clone())
    };
    // A fixed list shorter than -p doesn't need empty panes.
    let slot_count = match source.known_len() {
        Some(n) => settings.parallelism.min(n.max(1)),
        None => settings.parallelism,
    };

    let use_tui = match settings.mode {
        Mode::Tty => true,
        Mode::Plain => false,
        Mode::Auto => std::io::stdout().is_tty(),
    };

    let result = run_session(source, slot_count, &settings, use_tui).await?;
    print_summary(&result);
    std::process::exit(result.exit_code());
}

async fn run_session(
    source: TaskSource,
    slot_count: usize,
    settings: &RunSettings,
    use_tui: bool,
) -> Result<RunResult> {
    let (pane_cols, pane_rows) = if use_tui {
        let (width, height) = crossterm::terminal::size().map_err(RunError::Terminal)?;
        tui::pane_inner_size(width, height, slot_count)
    } else {
        // Children still get a pty in plain mode; give them a common size.
        (80, 24)
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut scheduler = Scheduler::new(
        source,
        event_tx.clone(),
        slot_count,
        pane_cols,
        pane_rows,
        settings.break_on_fail,
        DEFAULT_GRACE,
    );
    let mut app = App::new(slot_count, pane_cols, pane_rows, settings.tail_lines);

    let mut terminal = if use_tui {
        Some(tui::init_terminal().map_err(RunError::Terminal)?)
    } else {
        None
    };
    if use_tui {
        spawn_input_listener(event_tx.clone());
    }
    spawn_signal_listener(event_tx.clone());

    scheduler.start();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(settings.tick);
    let mut draw_error: Option<std::io::Error> = None;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    Event::CommandDispatched { id, slot, line, pid } => {
                        log::info!("dispatch [{id}] `{line}`");
                        app.on_dispatched(id, slot, line, pid);
                    }
                    Event::CommandSpawnFailed { id, error } => {
                        log::warn!("spawn [{id}] failed: {error}");
                        if terminal.is_none() {
                            eprintln!("muxrun: {error}");
                        }
                        app.on_spawn_failed(id, error);
                    }
                    Event::CommandOutput { id, bytes } => {
                        let completed = app.on_output(id, &bytes);
                        if terminal.is_none() {
                            for line in completed {
                                print_plain_line(id, &line, started, settings.timestamp);
                            }
                        }
                    }
                    Event::CommandExited { id, code, killed } => {
                        log::info!("exit [{id}] code={code:?} killed={killed}");
                        let flushed = app.on_exited(id, code, killed);
                        if terminal.is_none() {
                            if let Some(line) = flushed {
                                print_plain_line(id, &line, started, settings.timestamp);
                            }
                        }
                    }
                    Event::CommandAborted { id, line } => app.on_aborted(id, line),
                    Event::SourceExhausted { total } => app.on_source_exhausted(total),
                    Event::Key(key) => {
                        if is_abort_key(&key) {
                            app.aborted = true;
                            scheduler.cancel_all();
                        }
                    }
                    Event::Resize { .. } => {
                        if let Some(term) = terminal.as_mut() {
                            let _ = term.autoresize();
                        }
                    }
                    Event::Shutdown => {
                        app.aborted = true;
                        scheduler.cancel_all();
                    }
                }
            }
            // Redraws happen here and only here, so the tick interval bounds
            // the redraw rate no matter how chatty the children are.
            _ = ticker.tick() => {
                scheduler.poll();
                if let Some(term) = terminal.as_mut() {
                    if let Err(err) = tui::draw(&app, term) {
                        draw_error = Some(err);
                        scheduler.cancel_all();
                    }
                }
            }
        }

        if app.done() && scheduler.is_idle() {
            break;
        }
        if draw_error.is_some() && scheduler.is_idle() {
            break;
        }
    }

    if let Some(term) = terminal.take() {
        tui::restore_terminal(term).map_err(RunError::Terminal)?;
    }
    if let Some(err) = draw_error {
        return Err(err).context("drawing the pane grid failed");
    }
    Ok(app.into_result())
}

fn is_abort_key(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char('q'))
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}

fn print_plain_line(id: usize, line: &str, started: Instant, timestamp: bool) {
    if timestamp {
        let elapsed = started.elapsed().as_secs_f64();
        println!("[{id}] {elapsed:7.3}s {line}");
    } else {
        println!("[{id}] {line}");
    }
}

/// Prints the per-command outcome after the terminal is back to normal.
/// Failed commands get their retained output tail so the reason survives
/// the panes disappearing.
fn print_summary(result: &RunResult) {
    let total = result.runners.len();
    let succeeded = result
        .runners
        .iter()
        .filter(|r| r.status == CommandStatus::Succeeded)
        .count();
    println!(
        "muxrun: {total} command{} total, {succeeded} succeeded, {} failed",
        if total == 1 { "" } else { "s" },
        total - succeeded,
    );
    for runner in &result.runners {
        let line = &runner.command.line;
        match runner.status {
            CommandStatus::Succeeded => {
                println!("  ok   `{line}` ({:.1}s)", runner.elapsed_secs());
            }
            CommandStatus::Failed { code } => {
                match code {
                    Some(code) => println!("  fail `{line}` (exit {code})"),
                    None => println!("  fail `{line}`"),
                }
                if let Some(error) = &runner.error {
                    println!("       {error}");
                }
                for tail_line in runner.tail.iter() {
                    println!("       {tail_line}");
                }
            }
            CommandStatus::Killed => {
                if runner.pid.is_some() {
                    println!("  kill `{line}`");
                } else {
                    println!("  skip `{line}` (never started)");
                }
            }
            CommandStatus::Running => println!("  ?    `{line}`"),
        }
    }
    if result.aborted {
        println!("muxrun: run aborted before all commands finished");
    }
}

fn spawn_input_listener(tx: mpsc::UnboundedSender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) => {
                    if tx.send(Event::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(crossterm::event::Event::Resize(width, height)) => {
                    let _ = tx.send(Event::Resize { width, height });
                }
                _ => {}
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(Event::Shutdown);
                }
                _ = sigterm.recv() => {
                    let _ = tx.send(Event::Shutdown);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(Event::Shutdown);
        }
    });
}

/// File-backed logging, enabled by pointing MUXRUN_LOG at a path. Logging to
/// stderr would fight with the TUI over the terminal.
fn init_logging() {
    let Ok(path) = std::env::var("MUXRUN_LOG") else {
        return;
    };
    let file = match std::fs::File::create(&path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("muxrun: cannot open log file {path}: {err}");
            return;
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}
