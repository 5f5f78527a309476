use anyhow::{Context, Result};
use lantern::ai::{BackendManager, StreamEvent};
use lantern::config::Settings;
use lantern::interpreter::is_story_line;
use lantern::session::{GameSession, TurnOutcome};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

fn init_logging() {
    let level = std::env::var("LANTERN_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::WARN);

    // Story goes to stdout, logs stay on stderr.
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints streamed story text a line at a time, holding back choice lists and
/// the `ACTIONS:` line, which are shown parsed once the turn completes.
#[derive(Default)]
struct StoryPrinter {
    pending: String,
}

impl StoryPrinter {
    fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Chunk(text) => {
                self.pending.push_str(&text);
                while let Some(pos) = self.pending.find('\n') {
                    let line: String = self.pending.drain(..=pos).collect();
                    print_story_line(&line);
                }
            }
            StreamEvent::Done { tokens_per_second } => {
                let rest = std::mem::take(&mut self.pending);
                print_story_line(&rest);
                if let Some(tps) = tokens_per_second {
                    tracing::info!("{tps:.1} tokens/s");
                }
            }
        }
    }
}

fn print_story_line(line: &str) {
    let line = line.trim_end();
    if is_story_line(line) {
        println!("{line}");
        let _ = std::io::stdout().flush();
    }
}

fn show(session: &GameSession, outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Narrated {
            turn, discovered, ..
        } => {
            if !session.options().streaming {
                println!("\n{}\n", turn.narrative);
            }
            for name in &discovered.npcs {
                println!("  (met {name})");
            }
            for item in &discovered.inventory {
                println!("  (got {item})");
            }
            for place in &discovered.locations {
                println!("  (found {place})");
            }
        }
        TurnOutcome::Failed { message, .. } => println!("\n{message}\n"),
    }
    show_actions(session);
}

fn show_actions(session: &GameSession) {
    println!();
    for (i, action) in session.actions().iter().enumerate() {
        println!("  {}. {action}", i + 1);
    }
    print!("\n> ");
    let _ = std::io::stdout().flush();
}

async fn list_models(manager: &BackendManager) {
    for client in manager.clients() {
        match client.fetch_available_models().await {
            Ok(models) => println!("{}: {}", client.endpoint(), models.join(", ")),
            Err(err) => println!("{}: {err}", client.endpoint()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply.
    dotenvy::dotenv().ok();
    init_logging();

    let settings = Settings::load().context("loading settings")?;
    let mut manager = settings
        .build_manager()
        .context("configuring chat servers")?;

    for (kind, available) in manager.refresh().await {
        let state = if available { "up" } else { "down" };
        println!("{kind}: {state}");
    }

    let mut session = GameSession::new(settings.session_options());
    println!("Commands: a number or your own action, undo, restart, models, refresh, quit\n");

    let mut printer = StoryPrinter::default();
    let outcome = session
        .start(&manager, &mut |e: StreamEvent| printer.on_event(e))
        .await?;
    show(&session, &outcome);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => show_actions(&session),
            "quit" | "exit" => break,
            "undo" => {
                match session.undo() {
                    Ok(()) => {
                        if let Some(entry) = session.story().last() {
                            println!("\n{}", entry.text);
                        }
                    }
                    Err(err) => println!("{err}"),
                }
                show_actions(&session);
            }
            "restart" => {
                session.reset()?;
                let mut printer = StoryPrinter::default();
                let outcome = session
                    .start(&manager, &mut |e: StreamEvent| printer.on_event(e))
                    .await?;
                show(&session, &outcome);
            }
            "models" => {
                list_models(&manager).await;
                show_actions(&session);
            }
            "refresh" => {
                for (kind, available) in manager.refresh().await {
                    println!("{kind}: {}", if available { "up" } else { "down" });
                }
                show_actions(&session);
            }
            _ => {
                let action = match input.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= session.actions().len() => {
                        session.actions()[n - 1].clone()
                    }
                    _ => input.to_string(),
                };
                println!();
                let mut printer = StoryPrinter::default();
                let outcome = session
                    .play_turn(&manager, &action, &mut |e: StreamEvent| printer.on_event(e))
                    .await?;
                show(&session, &outcome);
            }
        }
    }

    Ok(())
}
