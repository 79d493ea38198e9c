//! Invitely CLI - an interactive terminal session against the invitely API.
//!
//! Signs in, then reads commands from stdin and sends them through the
//! session layer, so expired credentials are renewed and calls replayed
//! exactly as the web client does it.

use std::io::{self, Write};

use anyhow::{Context, Result};
use invitely_core::{ApiError, ApiRequest, Config, ProfileCache, Registration, Session, Visibility};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const HELP: &str = "\
commands:
  me                    verify the session with the server
  get <path>            GET a path below the API base URL
  delete <path>         DELETE a path
  post <path> <json>    POST a JSON body
  put <path> <json>     PUT a JSON body
  status                show local session state
  bg | fg               simulate the app going to background / foreground
  logout                sign out and sign in again
  quit                  exit";

type Input = Lines<BufReader<Stdin>>;

/// Initialize the tracing subscriber for logging.
///
/// Returns the appender guard when file logging is on; keep it alive.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr = fmt::layer().with_writer(io::stderr);

    match std::env::var("INVITELY_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "invitely.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry().with(stderr).with(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let mut config = Config::load()?;
    config.apply_env();
    info!(base_url = %config.api_base_url, "Invitely CLI starting");

    let cache = ProfileCache::new(config.cache_dir()?)?;
    let session = Session::new(&config, cache)?;

    if let Some(cached) = session.cached_profile() {
        eprintln!(
            "Last signed in as {} ({})",
            cached.data.display_name(),
            cached.age_display()
        );
    }

    let register = std::env::args().nth(1).as_deref() == Some("--register");
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if !sign_in(&session, &mut config, &mut input, register).await? {
        return Ok(());
    }
    eprintln!("{}", HELP);

    loop {
        prompt("> ")?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        let outcome = match command {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                eprintln!("{}", HELP);
                continue;
            }
            "status" => {
                print_status(&session);
                continue;
            }
            "bg" => {
                session.visibility_changed(Visibility::Background);
                continue;
            }
            "fg" => {
                session.visibility_changed(Visibility::Foreground);
                print_status(&session);
                continue;
            }
            "logout" => {
                session.logout().await;
                eprintln!("Signed out.");
                if !sign_in(&session, &mut config, &mut input, false).await? {
                    break;
                }
                continue;
            }
            "me" => session
                .current_user()
                .await
                .map(|p| serde_json::json!({"id": p.id, "name": p.name, "email": p.email})),
            "get" | "delete" | "post" | "put" => match build_request(command, rest) {
                Ok(request) => session.request_json::<Value>(&request).await,
                Err(e) => Err(e),
            },
            other => {
                eprintln!("Unknown command: {} (try 'help')", other);
                continue;
            }
        };

        match outcome {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(e) if e.is_session_ended() => {
                eprintln!("Your session has ended. Please sign in again.");
                if !sign_in(&session, &mut config, &mut input, false).await? {
                    break;
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    info!("Invitely CLI shutting down");
    Ok(())
}

fn build_request(command: &str, rest: &str) -> Result<ApiRequest, ApiError> {
    let (path, body) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
    if path.is_empty() {
        return Err(ApiError::InvalidRequest(format!("usage: {} <path>", command)));
    }

    let request = match command {
        "get" => ApiRequest::get(path),
        "delete" => ApiRequest::delete(path),
        "post" => ApiRequest::post(path),
        _ => ApiRequest::put(path),
    };
    if body.trim().is_empty() {
        return Ok(request);
    }
    let json: Value = serde_json::from_str(body)
        .map_err(|e| ApiError::InvalidRequest(format!("body is not JSON: {}", e)))?;
    request.json(&json)
}

fn print_status(session: &Session) {
    match session.credential() {
        Some(credential) => {
            let expires = match credential.time_until_expiry() {
                None => "expiry unknown".to_string(),
                Some(_) if credential.is_expired() => "expired".to_string(),
                Some(left) => format!("expires in {}s", left.num_seconds()),
            };
            let renewal = match session.scheduler().deadline() {
                Some(deadline) => format!(
                    "renewal in {}s",
                    deadline.saturating_duration_since(tokio::time::Instant::now()).as_secs()
                ),
                None => "no renewal armed".to_string(),
            };
            eprintln!("Signed in, {}, {}", expires, renewal);
        }
        None => eprintln!("Not signed in"),
    }
}

/// Prompt until sign-in succeeds. Returns false on end of input.
async fn sign_in(
    session: &Session,
    config: &mut Config,
    input: &mut Input,
    register: bool,
) -> Result<bool> {
    loop {
        let name = if register {
            prompt("Name: ")?;
            match input.next_line().await? {
                Some(name) => Some(name.trim().to_string()),
                None => return Ok(false),
            }
        } else {
            None
        };

        match &config.last_identifier {
            Some(last) => prompt(&format!("Email [{}]: ", last))?,
            None => prompt("Email: ")?,
        }
        let Some(line) = input.next_line().await? else {
            return Ok(false);
        };
        let email = match (line.trim(), &config.last_identifier) {
            ("", Some(last)) => last.clone(),
            (typed, _) => typed.to_string(),
        };

        let password = tokio::task::spawn_blocking(|| rpassword::prompt_password("Password: "))
            .await
            .context("Password prompt panicked")??;

        let result = match name {
            Some(name) => {
                let registration = Registration {
                    name,
                    email: email.clone(),
                    password,
                };
                session.register(&registration).await
            }
            None => session.login(&email, &password).await,
        };

        match result {
            Ok(profile) => {
                eprintln!("Welcome, {}!", profile.display_name());
                config.last_identifier = Some(email);
                if let Err(e) = config.save() {
                    eprintln!("Warning: could not save config: {}", e);
                }
                return Ok(true);
            }
            Err(e) => eprintln!("Sign-in failed: {}", e),
        }
    }
}

fn prompt(text: &str) -> Result<()> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", text)?;
    stderr.flush()?;
    Ok(())
}
