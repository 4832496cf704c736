//! Latchkey CLI
//!
//! Drives the latchkey flows against a backend deployment: unlocking a
//! door (primary channel with token fallback), issuing shareable tokens,
//! creating grants, and listing grants/tokens.
//!
//! # Environment Variables
//!
//! - `LATCHKEY_API_URL`: Backend base URL (default: http://localhost:8080)
//! - `LATCHKEY_USER_ID`: Required. UUID of the signed-in user
//! - `LATCHKEY_ROLE`: "owner" or "guest" (default: guest)
//! - `LATCHKEY_CONFIG`: Optional path to a config TOML
//! - `LATCHKEY_ENV`: "production" enables file logging
//! - `LATCHKEY_LOG_LEVEL` / `RUST_LOG`: Logging filter (default: info)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use latchkey_core::{
    AccessManager, GrantRequest, IssueRequest, Role, Session, TokenIssuer, UnlockOrchestrator,
    UnlockState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use url::Url;
use uuid::Uuid;

use latchkey_client::{ClientConfig, HttpBackend};

const USAGE: &str = "\
latchkey - smart-lock access client

USAGE:
    latchkey unlock <property-id>
    latchkey issue <property-id> [--expires <ts>] [--max-uses <n>] [--once]
    latchkey grant <property-id> <guest-id> <start> <end>
    latchkey grants
    latchkey tokens
";

#[tokio::main]
async fn main() -> Result<()> {
    let is_production = std::env::var("LATCHKEY_ENV")
        .map(|env| env.eq_ignore_ascii_case("production"))
        .unwrap_or(false);
    latchkey_client::logging::init(is_production)?;

    let config_path = std::env::var("LATCHKEY_CONFIG")
        .map_or_else(|_| ClientConfig::default_path(), PathBuf::from);
    let config = ClientConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let session = session_from_env()?;
    let base_url = Url::parse(&config.base_url).context("invalid base_url")?;
    let backend = HttpBackend::new(base_url, config.request_timeout())
        .map_err(|err| anyhow::anyhow!("building HTTP client: {err}"))?;

    info!(user = %session.user_id, role = ?session.role, "latchkey starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("unlock") => {
            let property_id = parse_uuid_arg(args.get(1), "property-id")?;
            run_unlock(backend, session, property_id).await
        }
        Some("issue") => {
            let property_id = parse_uuid_arg(args.get(1), "property-id")?;
            let request = parse_issue_flags(&args[2..])?;
            run_issue(backend, &config, session, property_id, request).await
        }
        Some("grant") => {
            let property_id = parse_uuid_arg(args.get(1), "property-id")?;
            let guest_id = parse_uuid_arg(args.get(2), "guest-id")?;
            let (Some(start), Some(end)) = (args.get(3), args.get(4)) else {
                bail!("grant requires <start> and <end> timestamps\n\n{USAGE}");
            };
            run_grant(backend, session, property_id, guest_id, start, end).await
        }
        Some("grants") => run_list_grants(backend, session).await,
        Some("tokens") => run_list_tokens(backend, session).await,
        _ => {
            eprintln!("{USAGE}");
            Ok(())
        }
    }
}

fn session_from_env() -> Result<Session> {
    let user_id: Uuid = std::env::var("LATCHKEY_USER_ID")
        .context("LATCHKEY_USER_ID is not set")?
        .parse()
        .context("LATCHKEY_USER_ID is not a valid UUID")?;
    let role = match std::env::var("LATCHKEY_ROLE")
        .unwrap_or_else(|_| "guest".to_string())
        .to_lowercase()
        .as_str()
    {
        "owner" => Role::Owner,
        _ => Role::Guest,
    };
    Ok(Session::new(user_id, role))
}

fn parse_uuid_arg(arg: Option<&String>, name: &str) -> Result<Uuid> {
    arg.with_context(|| format!("missing <{name}>\n\n{USAGE}"))?
        .parse()
        .with_context(|| format!("<{name}> is not a valid UUID"))
}

fn parse_issue_flags(flags: &[String]) -> Result<IssueRequest> {
    let mut request = IssueRequest::default();
    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--expires" => {
                request.expires_at = Some(
                    iter.next()
                        .context("--expires requires a timestamp")?
                        .clone(),
                );
            }
            "--max-uses" => {
                request.max_uses = Some(
                    iter.next()
                        .context("--max-uses requires a number")?
                        .parse()
                        .context("--max-uses is not a number")?,
                );
            }
            "--once" => request.single_use = true,
            other => bail!("unknown flag '{other}'\n\n{USAGE}"),
        }
    }
    Ok(request)
}

/// Drive one unlock attempt: primary channel first, token fallback on
/// failure, reading the code from stdin.
async fn run_unlock(backend: HttpBackend, session: Session, property_id: Uuid) -> Result<()> {
    let orchestrator = UnlockOrchestrator::new(backend, session);

    if orchestrator.resolve_target(property_id).await == UnlockState::NotFound {
        bail!("no lock found for property {property_id}");
    }

    let mut state = orchestrator.verify_access().await;
    if state == UnlockState::Idle {
        println!("Contacting the lock...");
        state = orchestrator.start_primary().await;
    }

    loop {
        match state {
            UnlockState::Success { method } => {
                println!("Door unlocked ({method:?}).");
                return Ok(());
            }
            UnlockState::Failed { ref message } | UnlockState::NoAccess { ref message } => {
                println!("{message}");
                let Some(code) = prompt_token().await? else {
                    orchestrator.cancel(true).await;
                    println!("Attempt abandoned.");
                    return Ok(());
                };
                orchestrator.open_token_entry().await;
                state = orchestrator.submit_token(&code).await;
            }
            UnlockState::TokenEntry { error } => {
                if let Some(error) = error {
                    println!("{error}");
                }
                let Some(code) = prompt_token().await? else {
                    orchestrator.cancel(true).await;
                    println!("Attempt abandoned.");
                    return Ok(());
                };
                state = orchestrator.submit_token(&code).await;
            }
            other => {
                println!("Unlock ended in state {other:?}");
                return Ok(());
            }
        }
    }
}

/// Read a token code from stdin; `None` means the user gave up.
async fn prompt_token() -> Result<Option<String>> {
    println!("Enter an access token code (blank to give up):");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await? {
        Some(line) if !line.trim().is_empty() => Ok(Some(line)),
        _ => Ok(None),
    }
}

async fn run_issue(
    backend: HttpBackend,
    config: &ClientConfig,
    session: Session,
    property_id: Uuid,
    request: IssueRequest,
) -> Result<()> {
    let issuer = TokenIssuer::with_policy(backend, config.retry_policy());
    let token = issuer.issue_token(&session, property_id, request).await?;
    println!("Token issued: {}", token.code);
    match token.expires_at {
        Some(expiry) => println!("Expires: {expiry}"),
        None => println!("Expires: never"),
    }
    match token.max_uses {
        0 => println!("Uses: unlimited"),
        n => println!("Uses: {n}"),
    }
    Ok(())
}

async fn run_grant(
    backend: HttpBackend,
    session: Session,
    property_id: Uuid,
    guest_id: Uuid,
    start: &str,
    end: &str,
) -> Result<()> {
    let manager = AccessManager::new(backend);
    let grant = manager
        .create_grant(
            &session,
            GrantRequest {
                guest_id,
                property_id,
                window_start: start.to_string(),
                window_end: end.to_string(),
            },
        )
        .await?;
    println!(
        "Grant {} created: {} to {}",
        grant.id, grant.window_start, grant.window_end
    );
    Ok(())
}

async fn run_list_grants(backend: HttpBackend, session: Session) -> Result<()> {
    let manager = AccessManager::new(backend);
    let rows = manager.list_grants(&session).await?;
    if rows.is_empty() {
        println!("No grants.");
        return Ok(());
    }
    for row in rows {
        println!(
            "[{}] {} @ {} ({}) owner: {} window: {} - {}",
            if row.active { "active" } else { "inactive" },
            row.guest_name,
            row.property_name,
            row.property_address,
            row.owner_name,
            row.window_start.as_deref().unwrap_or("?"),
            row.window_end.as_deref().unwrap_or("?"),
        );
    }
    Ok(())
}

async fn run_list_tokens(backend: HttpBackend, session: Session) -> Result<()> {
    let manager = AccessManager::new(backend);
    let rows = manager.list_tokens(&session).await?;
    if rows.is_empty() {
        println!("No tokens.");
        return Ok(());
    }
    for row in rows {
        let uses = if row.max_uses == 0 {
            format!("{} uses (unlimited)", row.uses_so_far)
        } else {
            format!("{}/{} uses", row.uses_so_far, row.max_uses)
        };
        println!(
            "[{}] {} for {} / {} ({uses}) expires: {}",
            if row.active { "active" } else { "inactive" },
            row.code,
            row.property_name,
            row.lock_name,
            row.expires_at.as_deref().unwrap_or("never"),
        );
    }
    Ok(())
}
