use std::collections::HashMap;

use anyhow::Context;
use moveitd::config::{ENV_PASSWORD, ENV_USERNAME, SessionConfig};
use moveitd::daemon::DaemonRuntime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "moveitd=info,moveit_core=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    List,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--list" => mode = CliMode::List,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: moveitd [--once | --list]");
        println!("  --once   Reconcile, run one poll cycle and exit");
        println!("  --list   Print local and remote file names and exit");
        return Ok(());
    }

    let config = load_config().await?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::List => {
            print!("{}", daemon.listing().await?);
            Ok(())
        }
        CliMode::Once => daemon.run_once().await.map(|_| ()),
        CliMode::Run | CliMode::Help => daemon.run().await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptKind {
    Visible,
    Hidden,
}

const CREDENTIAL_PROMPTS: [(&str, &str, PromptKind); 2] = [
    (ENV_USERNAME, "MOVEit username: ", PromptKind::Visible),
    (ENV_PASSWORD, "MOVEit password: ", PromptKind::Hidden),
];

/// Credentials the lookup cannot supply, in prompt order.
fn missing_credentials<F>(lookup: F) -> Vec<(&'static str, &'static str, PromptKind)>
where
    F: Fn(&str) -> Option<String>,
{
    CREDENTIAL_PROMPTS
        .into_iter()
        .filter(|(name, _, _)| lookup(*name).is_none_or(|value| value.trim().is_empty()))
        .collect()
}

/// Reads the session from the environment, asking on the terminal for
/// credentials that are not set.
async fn load_config() -> anyhow::Result<SessionConfig> {
    let missing = missing_credentials(|name| std::env::var(name).ok());
    if missing.is_empty() {
        return SessionConfig::from_env().context("invalid configuration");
    }

    let mut prompted = HashMap::new();
    for (name, label, kind) in missing {
        let value = match kind {
            PromptKind::Visible => prompt_line(label).await?,
            PromptKind::Hidden => prompt_hidden(label).await?,
        };
        prompted.insert(name, value);
    }

    let home = dirs::home_dir();
    SessionConfig::from_lookup(
        |name| {
            prompted
                .get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
        },
        home.as_deref(),
    )
    .context("invalid configuration")
}

async fn prompt_line(label: &str) -> anyhow::Result<String> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(label.as_bytes()).await?;
    stderr.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Reads a line without echoing it to the terminal.
async fn prompt_hidden(label: &'static str) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || rpassword::prompt_password(label))
        .await
        .context("password prompt task failed")?
        .context("failed to read password")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(args(&["moveitd"])).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_once_and_list() {
        assert_eq!(
            parse_cli_mode(args(&["moveitd", "--once"])).unwrap(),
            CliMode::Once
        );
        assert_eq!(
            parse_cli_mode(args(&["moveitd", "--list"])).unwrap(),
            CliMode::List
        );
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        let mode = parse_cli_mode(args(&["moveitd", "-h"])).unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_flags() {
        assert!(parse_cli_mode(args(&["moveitd", "--logout"])).is_err());
    }

    #[test]
    fn password_is_prompted_without_echo() {
        let missing = missing_credentials(|_| None);
        assert_eq!(
            missing
                .iter()
                .map(|(name, _, kind)| (*name, *kind))
                .collect::<Vec<_>>(),
            vec![
                (ENV_USERNAME, PromptKind::Visible),
                (ENV_PASSWORD, PromptKind::Hidden),
            ]
        );
    }

    #[test]
    fn set_credentials_are_not_prompted() {
        let missing = missing_credentials(|name| {
            (name == ENV_USERNAME).then(|| "alice".to_string())
        });
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, ENV_PASSWORD);

        let blank = missing_credentials(|_| Some("  ".to_string()));
        assert_eq!(blank.len(), 2);

        assert!(missing_credentials(|_| Some("x".to_string())).is_empty());
    }
}
