//! `nodeagent run`: run a command on a node and stream its I/O.
//!
//! Usage: `nodeagent run [OPTIONS] COMMAND [ARG...]`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use nodeagent::{CancellationToken, Client, ClientConfig, Error, Output, RunRequest};
use tracing::debug;

/// Arguments for `nodeagent run`.
#[derive(clap::Args)]
#[command(trailing_var_arg = true)]
pub struct RunArgs {
    /// WebSocket URL of the node's command endpoint.
    #[arg(long, required_unless_present = "config")]
    url: Option<String>,

    /// JSON client configuration file. `--url` overrides its URL.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Set environment variables (format: KEY=VALUE).
    #[arg(short = 'e', long = "env")]
    env: Vec<String>,

    /// Read environment variables from a file.
    #[arg(long)]
    env_file: Vec<String>,

    /// Working directory on the node.
    #[arg(short = 'w', long)]
    workdir: Option<String>,

    /// Forward local stdin to the command.
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Give up waiting after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Command and arguments to run on the node.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl RunArgs {
    /// Runs the command and returns its exit code.
    pub async fn run(self) -> Result<i32> {
        let config = self.client_config()?;
        let request = self.request()?;
        let client = Client::new(config).context("invalid client configuration")?;

        let waiter = client.run(request).await?;

        let interrupt = CancellationToken::new();
        tokio::spawn({
            let interrupt = interrupt.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt.cancel();
                }
            }
        });

        let result = match self.timeout {
            Some(secs) => tokio::select! {
                r = waiter.wait_timeout(Duration::from_secs(secs)) => r,
                () = interrupt.cancelled() => Err(Error::Cancelled),
            },
            None => waiter.wait_cancellable(&interrupt).await,
        };
        let result = result?;
        debug!(code = result.code, "remote command exited");
        Ok(result.code)
    }

    /// Builds the client configuration from `--config` and `--url`.
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("cannot load config: {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(url) = &self.url {
            config.url.clone_from(url);
        }
        Ok(config)
    }

    /// Translates the arguments into a run request.
    fn request(&self) -> Result<RunRequest> {
        let Some((command, args)) = self.command.split_first() else {
            bail!("no command given");
        };

        let mut req = RunRequest::new(command.as_str())
            .args(args.iter().cloned())
            .env(self.env_vars()?)
            .stdout(Output::new(tokio::io::stdout()))
            .stderr(Output::new(tokio::io::stderr()));
        if let Some(dir) = &self.workdir {
            req = req.working_dir(dir.as_str());
        }
        if self.interactive {
            req = req.stdin(tokio::io::stdin());
        }
        Ok(req)
    }

    /// Variables from `--env-file`s in order, then `-e` flags, so flags win
    /// on the node for duplicate keys.
    fn env_vars(&self) -> Result<Vec<String>> {
        let mut env = Vec::new();
        for path in &self.env_file {
            env.extend(read_env_file(path)?);
        }
        env.extend(self.env.iter().cloned());
        Ok(env)
    }
}

/// Reads `KEY=VALUE` lines, skipping blanks and `#` comments.
fn read_env_file(path: &str) -> Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read env file: {path}"))?;
    Ok(parse_env(&content))
}

fn parse_env(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}
