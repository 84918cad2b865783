use anyhow::{Context, Result};
use std::future::Future;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::info;

use crate::app::{APP_NAME, APP_VERSION};
use crate::commands::{self, LaunchFailure};
use crate::state::SharedRegistry;

/// A line typed into the launcher shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    List,
    Launch(String),
    Status,
    Stop(String),
    StopAll,
    Logs(String),
    Clear(String),
    Prune,
    Help,
    Quit,
}

const HELP: &str = "\
Commands:
  list              registered models and where their scripts live
  launch <model>    start a model in its own process
  status            running/idle state of every model
  stop <model>      ask a running model to terminate
  stop-all          stop every running model
  logs <model>      captured stdout/stderr of a model
  clear <model>     discard captured output of a model
  prune             forget processes that exited on their own
  help              this text
  quit              stop running models and exit";

/// `Ok(None)` for blank lines
pub fn parse_command(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, arg) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let needs_model = |make: fn(String) -> ShellCommand| {
        if arg.is_empty() {
            Err(format!("'{}' needs a model name", verb))
        } else {
            Ok(Some(make(arg.to_string())))
        }
    };

    match verb.to_ascii_lowercase().as_str() {
        "list" | "ls" => Ok(Some(ShellCommand::List)),
        "launch" | "run" | "start" => needs_model(ShellCommand::Launch),
        "status" => Ok(Some(ShellCommand::Status)),
        "stop" => needs_model(ShellCommand::Stop),
        "stop-all" | "stopall" => Ok(Some(ShellCommand::StopAll)),
        "logs" | "output" => needs_model(ShellCommand::Logs),
        "clear" => needs_model(ShellCommand::Clear),
        "prune" => Ok(Some(ShellCommand::Prune)),
        "help" | "?" => Ok(Some(ShellCommand::Help)),
        "quit" | "exit" | "q" => Ok(Some(ShellCommand::Quit)),
        other => Err(format!("Unknown command '{}'. Type 'help' for a list.", other)),
    }
}

/// Run one command and return the text to show the user.
/// `Quit` is handled by the shell loop and renders as nothing here.
pub fn execute(state: &SharedRegistry, command: ShellCommand) -> String {
    match command {
        ShellCommand::List => {
            let mut out = String::new();
            for model in commands::list_models(state) {
                let script = model
                    .script
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "?".to_string());
                let marker = if model.script_exists { "" } else { "  (missing)" };
                out.push_str(&format!("{:<12} {}{}\n", model.name, script, marker));
            }
            out
        }
        ShellCommand::Launch(model) => match commands::launch_model(state, &model) {
            Ok(info) => format!("✓ Launched {} (PID: {})", info.model, info.pid),
            Err(LaunchFailure::AlreadyRunning(_)) => format!("{} is already running", model),
            Err(failure) => format!("✗ {}", failure),
        },
        ShellCommand::Status => {
            let models = commands::list_models(state);
            let running = models.iter().filter(|m| m.running).count();
            let mut out = format!("{} of {} models running\n", running, models.len());
            for model in models {
                match model.pid {
                    Some(pid) if model.running => out.push_str(&format!("  {:<12} running (PID: {})\n", model.name, pid)),
                    _ => out.push_str(&format!("  {:<12} idle\n", model.name)),
                }
            }
            out
        }
        ShellCommand::Stop(model) => match commands::stop_model(state, &model) {
            Ok(true) => format!("✓ Stopped {}", model),
            Ok(false) => format!("{} is not running", model),
            Err(e) => format!("✗ {}", e),
        },
        ShellCommand::StopAll => render_stop_all(commands::stop_all_models(state)),
        ShellCommand::Logs(model) => match commands::model_output(state, &model) {
            Ok(output) if output.is_empty() => format!("{} has not written any output", model),
            Ok(output) => output,
            Err(e) => e,
        },
        ShellCommand::Clear(model) => match commands::clear_model_output(state, &model) {
            Ok(()) => format!("Cleared output of {}", model),
            Err(e) => e,
        },
        ShellCommand::Prune => {
            let pruned = commands::prune_exited(state);
            if pruned.is_empty() {
                "Nothing to prune".to_string()
            } else {
                format!("Forgot exited processes: {}", pruned.join(", "))
            }
        }
        ShellCommand::Help => HELP.to_string(),
        ShellCommand::Quit => String::new(),
    }
}

fn render_stop_all(result: commands::StopAllResult) -> String {
    let mut out = if result.stopped.is_empty() {
        "No running models to stop".to_string()
    } else {
        format!("✓ Stopped {}", result.stopped.join(", "))
    };
    for failure in result.failed {
        out.push_str(&format!("\n✗ {}", failure));
    }
    out
}

fn prompt() {
    print!("{}> ", APP_NAME);
    let _ = std::io::stdout().flush();
}

/// Ask before quitting while models are running.
/// EOF on the confirmation counts as yes.
async fn confirm_quit<R>(state: &SharedRegistry, lines: &mut Lines<R>) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let running = commands::running_models(state);
    if running.is_empty() {
        return Ok(true);
    }

    print!(
        "{} model(s) still running ({}). Stop them and quit? [y/N] ",
        running.len(),
        running.join(", ")
    );
    let _ = std::io::stdout().flush();

    let answer = lines.next_line().await.context("Failed to read confirmation")?;
    Ok(match answer {
        Some(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        None => true,
    })
}

/// `confirm_quit`, but an interrupt while waiting for the answer quits at once.
async fn confirm_quit_or_interrupt<R, I>(state: &SharedRegistry, lines: &mut Lines<R>, interrupt: I) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        answer = confirm_quit(state, lines) => answer,
        _ = interrupt => {
            info!("Interrupted during quit confirmation, shutting down");
            println!();
            Ok(true)
        }
    }
}

/// Interactive loop over stdin. Ends on `quit`, EOF or Ctrl-C and stops
/// every running model on the way out.
pub async fn run(state: SharedRegistry) -> Result<()> {
    println!("{} {}", APP_NAME, APP_VERSION);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                println!();
                None
            }
        };

        let Some(line) = line else { break };

        match parse_command(&line) {
            Ok(Some(ShellCommand::Quit)) => {
                if confirm_quit_or_interrupt(&state, &mut lines, tokio::signal::ctrl_c()).await? {
                    break;
                }
            }
            Ok(Some(command)) => println!("{}", execute(&state, command)),
            Ok(None) => {}
            Err(message) => println!("{}", message),
        }
    }

    let result = commands::stop_all_models(&state);
    if !result.stopped.is_empty() || !result.failed.is_empty() {
        println!("{}", render_stop_all(result));
    }
    Ok(())
}
