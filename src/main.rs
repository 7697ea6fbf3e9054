use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shellward::config::{Command, Config, LlmSettings, Settings};
use shellward::daemon::Daemon;
use shellward::exec::ShellExecutor;
use shellward::interact::ConsoleInteract;
use shellward::terminal::{PtyShell, RawModeGuard, SessionConfig, TerminalSession};
use shellward::translate::{HttpTransport, Translator};
use shellward::workflow::{MediationRequest, Outcome, Workflow, WorkflowOptions};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.merge_env();
    settings.validate();

    match cli.command.clone() {
        Some(Command::Ask { request }) => {
            run_one_shot(&settings, &cli, MediationRequest::from_request(request.join(" ")))
        }
        Some(Command::Fix { cmd, err, intent }) => {
            let mut request = MediationRequest::from_failure(cmd, err);
            if !intent.is_empty() {
                request.intent = Some(intent);
            }
            run_one_shot(&settings, &cli, request)
        }
        Some(Command::Repl) => run_repl(&settings, &cli),
        Some(Command::Daemon { socket }) => run_daemon(&settings, socket),
        None => run_terminal(&settings, &cli),
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("shellward=debug")
    } else {
        EnvFilter::new("shellward=info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn build_translator(llm: &LlmSettings) -> Translator {
    let transport = Arc::new(HttpTransport::new(
        &llm.api_base,
        &llm.model,
        llm.api_key(),
        llm.timeout(),
    ));
    Translator::new(transport, llm.timeout(), llm.strict_json)
}

/// Dry-run comes from the flag or the environment.
fn effective_dry_run(cli: &Config) -> bool {
    cli.dry_run || std::env::var("DRY_RUN").map(|v| v == "1").unwrap_or(false)
}

/// One-shot `ask` / `fix`: drive the workflow once and summarize.
fn run_one_shot(settings: &Settings, cli: &Config, request: MediationRequest) -> Result<()> {
    let translator = build_translator(&settings.llm);
    let executor = ShellExecutor;
    let mut interact = ConsoleInteract;
    let options = WorkflowOptions {
        dry_run: effective_dry_run(cli),
        quiet: cli.quiet,
        interactive: false,
    };

    let outcome = Workflow::new(&translator, &executor, &mut interact, options).run(request)?;
    print_summary(&outcome);
    Ok(())
}

const REPL_HELP: &str = "Commands:\n  \
/e <request>  - natural language to command\n  \
/run          - disable dry-run (execute commands)\n  \
/dry          - enable dry-run\n  \
/quiet        - reduce console output\n  \
/verbose      - verbose console output\n  \
/q            - quit\n  \
Otherwise: typed line is executed as a shell command";

/// Cooked-mode line REPL over the mediation workflow.
fn run_repl(settings: &Settings, cli: &Config) -> Result<()> {
    use shellward::interact::Interact as _;

    let translator = build_translator(&settings.llm);
    let executor = ShellExecutor;
    let mut interact = ConsoleInteract;
    let mut dry_run = effective_dry_run(cli);
    let mut quiet = cli.quiet;

    println!("shellward interactive mode. Type '/help' for commands.\n");

    loop {
        let Some(line) = interact.prompt_line("shellward> ") else {
            println!();
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let request = if line.starts_with('/') {
            match line.as_str() {
                "/q" | "/quit" | "/exit" => break,
                "/help" => {
                    println!("{}", REPL_HELP);
                    continue;
                }
                "/run" => {
                    dry_run = false;
                    println!("Dry-run disabled. Commands will execute.");
                    continue;
                }
                "/dry" => {
                    dry_run = true;
                    println!("Dry-run enabled. Commands will NOT execute.");
                    continue;
                }
                "/quiet" => {
                    quiet = true;
                    println!("Quiet mode on.");
                    continue;
                }
                "/verbose" => {
                    quiet = false;
                    println!("Verbose mode on.");
                    continue;
                }
                _ => match line.strip_prefix("/e") {
                    Some(rest) if !rest.trim().is_empty() => {
                        MediationRequest::from_request(rest.trim())
                    }
                    Some(_) => {
                        println!("Usage: /e <natural language request>");
                        continue;
                    }
                    None => {
                        println!("Unknown command. Type '/help'.");
                        continue;
                    }
                },
            }
        } else {
            MediationRequest::from_direct(line)
        };

        let options = WorkflowOptions {
            dry_run,
            quiet,
            interactive: true,
        };
        match Workflow::new(&translator, &executor, &mut interact, options).run(request) {
            Ok(outcome) => print_summary(&outcome),
            Err(e) => eprintln!("error: {:#}", e),
        }
    }

    Ok(())
}

/// Only show a summary when no run output was already printed.
fn print_summary(outcome: &Outcome) {
    if outcome.result.is_some() {
        return;
    }
    let command = outcome
        .candidate
        .as_ref()
        .map(|c| c.command.as_str())
        .unwrap_or("");
    let explanation = outcome
        .candidate
        .as_ref()
        .map(|c| c.explanation.as_str())
        .unwrap_or("");
    if command.is_empty() && explanation.is_empty() {
        return;
    }

    println!("\n=== SUMMARY ===");
    if !command.is_empty() {
        println!("Command: {}", command);
    }
    if !explanation.is_empty() {
        println!("Explanation: {}", explanation);
    }
}

/// The interactive PTY terminal (default mode).
fn run_terminal(settings: &Settings, cli: &Config) -> Result<()> {
    println!("shellward terminal - mediated shell");
    println!("Type '/help' for commands");
    println!("Tip: '/repair on' enables automatic fix suggestions for typos\n");

    let translator = Arc::new(build_translator(&settings.llm));
    let (shell, events) = PtyShell::spawn(&settings.terminal.shell)?;
    let raw = RawModeGuard::new()?;

    let config = SessionConfig {
        dry_run: cli.dry_run,
        quiet: cli.quiet,
        auto_repair: settings.terminal.auto_repair,
        interactive_repair: settings.terminal.interactive_repair,
        context_lines: settings.terminal.context_lines,
    };
    let session = TerminalSession::new(shell, events, std::io::stdout(), translator, config);
    let shell = session.run()?;

    drop(raw);
    shell.shutdown();
    Ok(())
}

/// The IPC daemon.
fn run_daemon(settings: &Settings, socket: Option<PathBuf>) -> Result<()> {
    let translator = Arc::new(build_translator(&settings.llm));
    let socket = socket.or_else(|| settings.daemon.socket.clone());

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(Daemon::new(translator, socket).serve())
}
