//!
//! sessiongate CLI
//! ---------------
//! Log in against a remote verification API, keep the bearer token on disk,
//! and answer capability questions for the persisted session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sessiongate::identity::{Authorizer, Capability, HttpVerifier, SessionManager};
use sessiongate::SessionConfig;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <path>] <command> [args]\n\nCommands:\n  login <email> <password>   verify credentials and persist the issued token\n  logout                     forget the persisted token\n  whoami                     revalidate the persisted token and print the identity\n  restore                    revalidate the persisted token and print the session state\n  check <capability>...      print allow/deny per capability for the persisted session\n\nCapabilities: user, client, content, marketing, admin\n\nEnvironment:\n  SESSIONGATE_VERIFIER_URL       base URL of the verification API (required)\n  SESSIONGATE_CREDENTIAL_DIR     token directory (default: .sessiongate)\n  SESSIONGATE_SESSION_KEY        logical session name (default: default)\n  SESSIONGATE_VERIFY_TIMEOUT_MS  verification timeout"
    );
}

fn build(cfg: &SessionConfig) -> Result<Arc<SessionManager>> {
    let url = cfg
        .verifier_url
        .as_deref()
        .ok_or_else(|| anyhow!("no verifier URL configured (set SESSIONGATE_VERIFIER_URL)"))?;
    let verifier = HttpVerifier::new(url, cfg.verify_timeout())?;
    Ok(Arc::new(cfg.session_manager(Arc::new(verifier))))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut args: Vec<String> = std::env::args().collect();
    let program = if args.is_empty() { "sessiongate".to_string() } else { args.remove(0) };

    let mut cfg = SessionConfig::default();
    if args.first().map(|a| a == "--config").unwrap_or(false) {
        let path = args.get(1).cloned().ok_or_else(|| anyhow!("--config requires a path"))?;
        cfg = SessionConfig::load(&PathBuf::from(path))?;
        args.drain(0..2);
    }
    cfg.apply_env()?;
    if cfg.credential_dir.is_none() {
        cfg.credential_dir = Some(PathBuf::from(".sessiongate"));
    }

    let Some(cmd) = args.first().cloned() else {
        print_usage(&program);
        return Ok(());
    };
    info!(target: "sessiongate", "sessiongate {}: session_key='{}'", cmd, cfg.session_key);

    match cmd.as_str() {
        "login" => {
            let (Some(email), Some(password)) = (args.get(1), args.get(2)) else {
                print_usage(&program);
                return Err(anyhow!("login requires <email> <password>"));
            };
            let sessions = build(&cfg)?;
            let identity = sessions.login(email, password).await.context("login failed")?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
        "logout" => {
            let sessions = build(&cfg)?;
            sessions.logout();
            println!("logged out");
        }
        "whoami" => {
            let sessions = build(&cfg)?;
            sessions.restore_from_stored_credential().await;
            match sessions.current_identity() {
                Some(id) => println!("{}", serde_json::to_string_pretty(&id)?),
                None => println!("not authenticated"),
            }
        }
        "restore" => {
            let sessions = build(&cfg)?;
            sessions.restore_from_stored_credential().await;
            println!("{}", serde_json::to_string(&sessions.state())?);
        }
        "check" => {
            let caps = args[1..]
                .iter()
                .map(|s| s.parse::<Capability>())
                .collect::<Result<Vec<_>, _>>()?;
            if caps.is_empty() { return Err(anyhow!("check requires at least one capability")); }
            let sessions = build(&cfg)?;
            sessions.restore_from_stored_credential().await;
            let authz = Authorizer::new(sessions);
            for c in caps {
                let d = authz.check(c);
                println!("{:<10} {:<5} ({})", c.as_str(), if d.allow { "allow" } else { "deny" }, d.reason);
            }
        }
        "-h" | "--help" | "help" => print_usage(&program),
        other => {
            print_usage(&program);
            return Err(anyhow!("unknown command '{}'", other));
        }
    }
    Ok(())
}
