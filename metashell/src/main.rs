use anyhow::Result;
use colored::Colorize;
use metasync::bonus::BonusOutcome;
use metasync::prelude::*;
use metasync::{ENGINE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct MetaHighlighter;

impl Highlighter for MetaHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    const LOGO_TEXT: &str = include_str!("../logo.log");
    println!("{}", LOGO_TEXT.cyan());

    let version_string = format!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    let rule = "-".repeat(64);
    println!("{}", rule.dimmed());
    println!("{}", version_string);
    println!("{}", rule.dimmed());
}

/// Prints bus traffic. Metric reports are noisy, so they hide behind `watch`.
fn register_event_printers(bus: &EventBus, watching: Arc<AtomicBool>) {
    bus.subscribe(Topic::SingularityComplete, |event| {
        if let MetaEvent::SingularityComplete(singularity) = event {
            println!(
                "\n<-- [SINGULARITY] {} ({})",
                singularity.name.magenta().bold(),
                singularity.bonuses.join(", ")
            );
        }
    });

    for source in [SourceKind::Usage, SourceKind::Repository] {
        bus.subscribe(Topic::ConnectionStatus(source), |event| {
            if let MetaEvent::ConnectionStatus(status) = event {
                let label = if status.connected {
                    "connected".green()
                } else {
                    "disconnected".red()
                };
                println!("\n<-- [{}] {} {}", status.source, label, status.endpoint.dimmed());
            }
        });

        let watching = watching.clone();
        bus.subscribe(Topic::MetricsUpdated(source), move |event| {
            if !watching.load(Ordering::Relaxed) {
                return;
            }
            match event {
                MetaEvent::UsageMetricsUpdated(report) => println!(
                    "<-- [USAGE] tokens {} lines {} cost ${:.2}{}",
                    report.snapshot.tokens.total,
                    report.snapshot.code.lines_modified,
                    report.snapshot.session.cost,
                    if report.synthetic { " (fallback)" } else { "" }
                ),
                MetaEvent::RepositoryMetricsUpdated(report) => println!(
                    "<-- [REPOSITORY] commits {} activity {}/100 influence {}{}",
                    report.snapshot.commit_count(),
                    report.activity_score,
                    report.influence_level,
                    if report.synthetic { " (fallback)" } else { "" }
                ),
                _ => {}
            }
        });
    }
}

fn print_resources(state: &MetaState) {
    println!("Resources:");
    for (name, resource) in &state.resources {
        println!(
            "  {:<16} {:<20} {}",
            name.cyan(),
            resource.current.to_string(),
            resource.rate.as_deref().unwrap_or("").dimmed()
        );
    }
    println!("Progress:");
    for (name, track) in &state.progress {
        let next = track
            .next_threshold
            .as_ref()
            .map(|next| format!("-> {}", next))
            .unwrap_or_default();
        println!("  {:<16} {:<20} {}", name.cyan(), track.current.to_string(), next.dimmed());
    }
    println!("Capabilities:");
    for (name, capability) in &state.capabilities {
        println!(
            "  {:<24} {:<9} {:>5.1}",
            name.cyan(),
            capability.status.to_string(),
            capability.efficiency
        );
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  state                          - Dumps the full meta-state as JSON.");
    println!("  resources                      - Shows resources, progress and capabilities.");
    println!("  events                         - Lists the singularity events fired so far.");
    println!("  history [N]                    - Shows the last N history entries (default 10).");
    println!("  upgrades                       - Lists available and completed upgrades.");
    println!("  complete <ID>                  - Completes an available upgrade.");
    println!("  capability <NAME> <STATUS> [E] - Sets a capability's status and efficiency.");
    println!("  bonus <BONUS>...               - Applies bonus strings, e.g. 'data+20%'.");
    println!("  poll                           - Polls every metric source right now.");
    println!("  start                          - Resumes background polling.");
    println!("  stop                           - Stops background polling.");
    println!("  watch <on|off>                 - Toggles printing of metric reports.");
    println!("  exit                           - Quits the shell.");
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let config_path = env::var("METASYNC_CONFIG").unwrap_or_else(|_| "metasync.toml".to_string());
    let config = MetaSyncConfig::load(&config_path)?;

    let watching = Arc::new(AtomicBool::new(false));
    let bus = Arc::new(EventBus::new());
    register_event_printers(&bus, watching.clone());

    let engine = MetaSyncEngine::with_bus(config, bus);
    info!("Starting {} polling in the background...", ENGINE_NAME);
    engine.start().await;

    let mut rl = Editor::new()?;
    rl.set_helper(Some(MetaHighlighter));

    println!("{} is running. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();
                let Some(command) = args.first() else {
                    continue;
                };

                match *command {
                    "state" => match serde_json::to_string_pretty(&engine.state()) {
                        Ok(json) => println!("{}", json),
                        Err(err) => println!("Error: could not render state: {}", err),
                    },
                    "resources" => print_resources(&engine.state()),
                    "events" => {
                        let state = engine.state();
                        if state.singularity_events.is_empty() {
                            println!("No singularity events yet.");
                        }
                        for event in &state.singularity_events {
                            println!(
                                "  {} {:<24} {}",
                                event.timestamp,
                                event.name.magenta(),
                                event.id.dimmed()
                            );
                            println!("      {}", event.description);
                            if !event.bonuses.is_empty() {
                                println!("      bonuses: {}", event.bonuses.join(", "));
                            }
                        }
                    }
                    "history" => {
                        let count = match args.get(1).map(|raw| raw.parse::<usize>()) {
                            None => 10,
                            Some(Ok(count)) => count,
                            Some(Err(_)) => {
                                println!("Usage: history [COUNT]");
                                continue;
                            }
                        };
                        let state = engine.state();
                        let history = &state.development_history;
                        for entry in &history[history.len().saturating_sub(count)..] {
                            println!(
                                "  {} {:<40} {}",
                                entry.timestamp,
                                entry.event,
                                entry.resource_change.dimmed()
                            );
                        }
                    }
                    "upgrades" => {
                        let state = engine.state();
                        println!("Available:");
                        for upgrade in &state.upgrades.available {
                            println!(
                                "  {:<20} {:<24} cost {:<10} {}",
                                upgrade.id.cyan(),
                                upgrade.name,
                                upgrade.cost.to_string(),
                                upgrade.benefit.dimmed()
                            );
                        }
                        println!("Completed:");
                        for upgrade in &state.upgrades.completed {
                            let when = upgrade
                                .completed_at
                                .map(|date| date.to_string())
                                .unwrap_or_default();
                            println!("  {:<20} {:<24} {}", upgrade.id.cyan(), upgrade.name, when);
                        }
                    }
                    "complete" => match args.get(1) {
                        Some(id) => match engine.store().complete_upgrade(id) {
                            Some(upgrade) => println!("--> Completed '{}'.", upgrade.name),
                            None => println!("Error: no available upgrade with id '{}'.", id),
                        },
                        None => println!("Usage: complete <UPGRADE_ID>"),
                    },
                    "capability" => {
                        let (Some(name), Some(status)) = (args.get(1), args.get(2)) else {
                            println!("Usage: capability <NAME> <limited|emerging|active|read> [EFFICIENCY]");
                            continue;
                        };
                        let status = match status.parse::<CapabilityStatus>() {
                            Ok(status) => status,
                            Err(err) => {
                                println!("Error: {}", err);
                                continue;
                            }
                        };
                        let efficiency = match args.get(3).map(|raw| raw.parse::<f64>()) {
                            None => None,
                            Some(Ok(efficiency)) => Some(efficiency),
                            Some(Err(_)) => {
                                println!("Error: efficiency must be a number.");
                                continue;
                            }
                        };
                        let capability = engine.store().update_capability(name, Some(status), efficiency);
                        println!(
                            "--> {} is now {} at {:.1}.",
                            name,
                            capability.status,
                            capability.efficiency
                        );
                    }
                    "bonus" => {
                        if args.len() < 2 {
                            println!("Usage: bonus <BONUS>...   e.g. bonus data+20% metarecursion+1");
                            continue;
                        }
                        let outcomes = engine.store().apply_bonuses(&args[1..]);
                        if outcomes.is_empty() {
                            println!("No valid bonus strings.");
                        }
                        for outcome in outcomes {
                            match outcome {
                                BonusOutcome::Applied { path, from, to } => {
                                    println!("--> {}: {} -> {}", path, from, to)
                                }
                                BonusOutcome::UnknownAlias => println!("--> skipped: unknown resource"),
                                BonusOutcome::MissingTarget => println!("--> skipped: target not present"),
                                BonusOutcome::NotNumeric => println!("--> skipped: target is not numeric"),
                            }
                        }
                    }
                    "poll" => {
                        let outcomes = engine.poll_now().await;
                        if outcomes.is_empty() {
                            println!("No metric sources are configured.");
                        }
                        for outcome in outcomes {
                            let kind = if outcome.synthetic { "fallback" } else { "live" };
                            println!("--> {} poll, {} singularity event(s) fired.", kind, outcome.fired.len());
                        }
                    }
                    "start" => {
                        engine.start().await;
                        println!("--> Polling resumed.");
                    }
                    "stop" => {
                        engine.stop().await;
                        println!("--> Polling stopped.");
                    }
                    "watch" => match args.get(1) {
                        Some(&"on") => {
                            watching.store(true, Ordering::Relaxed);
                            println!("--> Printing metric reports.");
                        }
                        Some(&"off") => {
                            watching.store(false, Ordering::Relaxed);
                            println!("--> Metric reports muted.");
                        }
                        _ => println!("Usage: watch <on|off>"),
                    },
                    "help" => print_help(),
                    "exit" => break,
                    _ => println!("Unknown command: '{}'. Type 'help'.", line.trim()),
                }
            }
            Err(_) => {
                println!("Exiting metashell...");
                break;
            }
        }
    }

    engine.stop().await;
    Ok(())
}
