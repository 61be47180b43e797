//! Budgetbook headless host - drives the auth session outside the GUI.
//!
//! Useful for checking a backend and the local token store without
//! launching the app:
//!
//! ```text
//! budgetbook login [username]
//! budgetbook register <username> <email>
//! budgetbook status | profile | refresh | logout
//! ```

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use budgetbook_core::auth::jwt;
use budgetbook_core::{AuthError, AuthSession, Config, Registration, SessionState};
use chrono::{TimeZone, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variables consulted before prompting
const USERNAME_ENV: &str = "BUDGETBOOK_USERNAME";
const PASSWORD_ENV: &str = "BUDGETBOOK_PASSWORD";

const USAGE: &str = "\
Usage: budgetbook <command>

Commands:
  login [username]            Log in and store the session
  register <username> <email> Create an account and log in
  status                      Show whether a session is stored
  profile                     Fetch the logged-in user's profile
  refresh                     Exchange the refresh token now
  logout                      Forget the stored session";

/// Initialize the tracing subscriber: stderr plus a daily log file.
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "budgetbook.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("budgetbook_core=debug,budgetbook=debug,info"));
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_filter(filter))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()
        .unwrap_or_else(|e| {
            eprintln!("Warning: {:#}; using defaults", e);
            Config::default()
        })
        .with_env_overrides();

    let _log_guard = init_tracing(&config);
    info!(api = config.api_base_url(), "Budgetbook starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let session = config.open_session()?;
    session.restore().await;
    watch_state(&session);

    let result = match command {
        "login" => login(&session, config, args.get(1).cloned()).await,
        "register" => register(&session, &args[1..]).await,
        "status" => status(&session).await,
        "profile" => profile(&session).await,
        "refresh" => refresh(&session).await,
        "logout" => logout(&session).await,
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    };

    // Let the state watcher print the final transition
    tokio::task::yield_now().await;
    info!("Budgetbook shutting down");
    result
}

/// Print each login-state transition, the way the GUI would switch screens
fn watch_state(session: &AuthSession) {
    let mut rx = session.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            eprintln!("[session] {}", describe(state));
        }
    });
}

fn describe(state: SessionState) -> &'static str {
    match state {
        SessionState::LoggedOut => "logged out",
        SessionState::LoggedIn => "logged in",
        SessionState::Refreshing => "refreshing token",
    }
}

/// Turn a session error into the message the login screen would show
fn user_facing(e: AuthError) -> anyhow::Error {
    warn!(error = %e, "Command failed");
    anyhow::anyhow!(e.user_message())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

fn prompt_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    rpassword::prompt_password("Password: ").context("Failed to read password")
}

async fn login(session: &AuthSession, mut config: Config, username: Option<String>) -> Result<()> {
    let username = match username
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .or_else(|| config.last_username.clone())
    {
        Some(name) if !name.trim().is_empty() => name,
        _ => prompt("Username")?,
    };
    let password = prompt_password()?;

    session
        .login(&username, &password)
        .await
        .map_err(user_facing)?;

    config.last_username = Some(username.trim().to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}", username.trim());
    Ok(())
}

async fn register(session: &AuthSession, args: &[String]) -> Result<()> {
    let (username, email) = match args {
        [username, email, ..] => (username.clone(), email.clone()),
        _ => (prompt("Username")?, prompt("Email")?),
    };
    let password = prompt_password()?;

    session
        .register(&Registration::new(username.trim(), email.trim(), password))
        .await
        .map_err(user_facing)?;

    println!("Account created, logged in as {}", username.trim());
    Ok(())
}

async fn status(session: &AuthSession) -> Result<()> {
    let Some(tokens) = session.current_tokens().await else {
        println!("Not logged in");
        return Ok(());
    };

    println!("Logged in");
    match jwt::expires_at(&tokens.access_token) {
        Ok(exp) => {
            let when = Utc
                .timestamp_opt(exp, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| exp.to_string());
            let state = if jwt::is_expired(&tokens.access_token) {
                "expired"
            } else {
                "valid"
            };
            println!("Access token {} (exp {})", state, when);
        }
        Err(e) => println!("Access token expiry unknown: {}", e),
    }
    println!(
        "Refresh token {}",
        if tokens.usable_refresh_token().is_some() {
            "present"
        } else {
            "missing"
        }
    );
    Ok(())
}

async fn profile(session: &AuthSession) -> Result<()> {
    let profile = session.fetch_profile().await.map_err(user_facing)?;
    println!("{} ({})", profile.display_name(), profile.username);
    if let Some(ref email) = profile.email {
        println!("Email:    {}", email);
    }
    if let Some(ref currency) = profile.currency {
        println!("Currency: {}", currency);
    }
    Ok(())
}

async fn refresh(session: &AuthSession) -> Result<()> {
    session.refresh().await.map_err(user_facing)?;
    println!("Session refreshed");
    Ok(())
}

async fn logout(session: &AuthSession) -> Result<()> {
    session.logout().await.map_err(user_facing)?;
    println!("Logged out");
    Ok(())
}
