//! examguard - terminal front-end for the proctoring session core.
//!
//! Runs a keyboard-driven login form and session dashboard on top of
//! `examguard-core`, or one of a few one-shot commands:
//!
//! - `--status`: print the stored session and queue depth
//! - `--login <user> [--teacher] [--remember]`: log in, password read from the tty
//! - `--logout`: end the stored session
//! - `--sync`: replay queued offline operations
//! - `--forget <user>`: drop the cached offline login for one user
//! - `--forget-device`: wipe all local data and the storage key

mod app;
mod ui;

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use examguard_core::session::Role;
use examguard_core::storage::forget_storage_key;
use examguard_core::{AppContext, Config};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::{App, AppState};
use ui::input::{handle_input, handle_mouse};
use ui::render::render;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for polling terminal events (in milliseconds)
const EVENT_POLL_TIMEOUT_MS: u64 = 100;

/// Time given to the detached backend logout before a one-shot exits
const LOGOUT_GRACE_MS: u64 = 500;

const LOG_FILE_PREFIX: &str = "examguard.log";

/// Initialize the tracing subscriber.
///
/// The terminal belongs to the UI, so logs go to a daily file in the cache
/// directory. `RUST_LOG` wins; otherwise the level is `warn`, or `debug`
/// with `VERBOSE_LOGGING=true`.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let default_level = if config.verbose_logging { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_dir = match config.cache_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Logging disabled: {}", e);
            return None;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Logging disabled: {}", e);
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Some(guard)
}

enum Command {
    Interactive,
    Status,
    Login {
        username: String,
        role: Role,
        remember_me: bool,
    },
    Logout,
    Sync,
    Forget { username: String },
    ForgetDevice,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(first) = args.get(1) else {
        return Ok(Command::Interactive);
    };
    match first.as_str() {
        "--status" => Ok(Command::Status),
        "--logout" => Ok(Command::Logout),
        "--sync" => Ok(Command::Sync),
        "--forget-device" => Ok(Command::ForgetDevice),
        "--forget" => Ok(Command::Forget {
            username: args
                .get(2)
                .cloned()
                .context("Usage: examguard --forget <username>")?,
        }),
        "--login" => {
            let username = args
                .get(2)
                .filter(|arg| !arg.starts_with("--"))
                .cloned()
                .context("Usage: examguard --login <username> [--teacher] [--remember]")?;
            let rest = &args[3..];
            Ok(Command::Login {
                username,
                role: if rest.iter().any(|arg| arg == "--teacher") {
                    Role::Teacher
                } else {
                    Role::Student
                },
                remember_me: rest.iter().any(|arg| arg == "--remember"),
            })
        }
        other => anyhow::bail!(
            "Unknown argument: {}\nUsage: examguard [--status | --login <user> | --logout | --sync | --forget <user> | --forget-device]",
            other
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            let mut config = Config::default();
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
    };
    let _log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().collect();
    match parse_args(&args)? {
        Command::Interactive => run_interactive(config).await,
        Command::Status => print_status(config).await,
        Command::Login {
            username,
            role,
            remember_me,
        } => login_once(config, &username, role, remember_me).await,
        Command::Logout => logout_once(config).await,
        Command::Sync => sync_once(config).await,
        Command::Forget { username } => forget_once(config, &username).await,
        Command::ForgetDevice => forget_device(config).await,
    }
}

async fn print_status(config: Config) -> Result<()> {
    let ctx = AppContext::initialize(config)?;

    match ctx.session().current_session() {
        Some(session) if ctx.session().is_authenticated() => {
            let valid = ctx.gateway().validate_token().await;
            println!("Logged in as {} ({})", session.username, session.role);
            println!("  session:     {}", session.session_id);
            println!("  remember me: {}", if session.persistent { "yes" } else { "no" });
            if session.offline {
                println!("  login:       offline (cached credentials)");
            }
            if let Some(left) = ctx.session().time_until_expiry() {
                println!("  expires in:  {}", app::format_countdown(left.num_seconds()));
            }
            if !valid {
                println!("  (the backend no longer accepts this session)");
            }
        }
        _ => println!("Not logged in"),
    }
    println!(
        "Backend: {} ({})",
        ctx.gateway().backend_name(),
        if ctx.connectivity().is_online() { "online" } else { "offline" }
    );
    println!("Queued operations: {}", ctx.queue().len());
    Ok(())
}

async fn login_once(config: Config, username: &str, role: Role, remember_me: bool) -> Result<()> {
    let ctx = AppContext::initialize(config)?;
    let password = rpassword::prompt_password(format!("Password for {}: ", username))
        .context("Failed to read password")?;

    match ctx.gateway().login(username, &password, role, remember_me).await {
        Ok(success) => {
            println!(
                "Logged in as {} ({}){}",
                success.user.display_name(),
                success.user.role,
                if success.offline_login { " using cached credentials" } else { "" }
            );
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", e.user_message()),
    }
}

async fn logout_once(config: Config) -> Result<()> {
    let ctx = AppContext::initialize(config)?;
    if ctx.session().current_session().is_none() {
        println!("Not logged in");
        return Ok(());
    }
    ctx.gateway().logout();
    tokio::time::sleep(Duration::from_millis(LOGOUT_GRACE_MS)).await;
    println!("Logged out");
    Ok(())
}

async fn sync_once(config: Config) -> Result<()> {
    let ctx = AppContext::initialize(config)?;
    let report = ctx.queue().synchronize().await;
    println!(
        "Replayed {} operation(s), {} failed, {} still queued",
        report.processed, report.failed, report.remaining
    );
    Ok(())
}

async fn forget_once(config: Config, username: &str) -> Result<()> {
    let ctx = AppContext::initialize(config)?;
    if !ctx.gateway().offline_credentials().knows(username) {
        println!("No cached login for {}", username);
        return Ok(());
    }
    ctx.gateway().offline_credentials().forget(username);
    println!("Forgot cached login for {}", username);
    Ok(())
}

async fn forget_device(config: Config) -> Result<()> {
    let data_dir = config.data_dir()?;
    let ctx = AppContext::initialize(config)?;
    ctx.forget_device()?;
    ctx.cleanup();
    drop(ctx);
    forget_storage_key(&data_dir)?;
    println!("Local data and storage key removed");
    Ok(())
}

async fn run_interactive(config: Config) -> Result<()> {
    info!("examguard starting");
    let mut app = App::new(config)?;

    if app.is_authenticated() {
        app.validate_restored().await;
    } else {
        app.start_login();
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    app.ctx.cleanup();
    if let Err(ref e) = result {
        warn!(error = %e, "Exited with error");
        eprintln!("Error: {}", e);
    }

    info!("examguard shutting down");
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|f| render(f, app))?;

        // Poll for events with timeout so countdowns keep ticking
        if event::poll(Duration::from_millis(EVENT_POLL_TIMEOUT_MS))? {
            match event::read()? {
                Event::Key(key) => {
                    // Ctrl+C to quit
                    if key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL)
                    {
                        return Ok(());
                    }
                    if handle_input(app, key).await? {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) => handle_mouse(app, mouse),
                _ => {}
            }
        }

        app.check_background_tasks().await;

        if matches!(app.state, AppState::Quitting) {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("examguard")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        assert!(matches!(parse_args(&args(&[])).unwrap(), Command::Interactive));
        assert!(matches!(parse_args(&args(&["--status"])).unwrap(), Command::Status));
        assert!(matches!(parse_args(&args(&["--sync"])).unwrap(), Command::Sync));
        assert!(parse_args(&args(&["--frobnicate"])).is_err());
        assert!(parse_args(&args(&["--login"])).is_err());
        assert!(parse_args(&args(&["--forget"])).is_err());
        assert!(matches!(
            parse_args(&args(&["--forget-device"])).unwrap(),
            Command::ForgetDevice
        ));
        match parse_args(&args(&["--forget", "alice"])).unwrap() {
            Command::Forget { username } => assert_eq!(username, "alice"),
            _ => panic!("expected forget"),
        }

        match parse_args(&args(&["--login", "tara", "--teacher", "--remember"])).unwrap() {
            Command::Login {
                username,
                role,
                remember_me,
            } => {
                assert_eq!(username, "tara");
                assert_eq!(role, Role::Teacher);
                assert!(remember_me);
            }
            _ => panic!("expected login"),
        }
    }
}
