use authcode_test::{
    auth::{default_config_path, host_launcher, AuthCodeClient, AuthCodeConfig, PrintUrl},
    flow::FlowRunner,
    utils::{from_env::FromEnv, tracing::init_tracing},
};
use clap::{Args, Parser, Subcommand};
use eyre::WrapErr;
use std::{path::PathBuf, time::Duration};
use tracing::info;

/// Test authcode flow and get tokens from authcode and refresh token.
#[derive(Debug, Parser)]
#[command(name = "authcode-test", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the authcode flow test: log in, exchange, echo, refresh twice.
    #[command(visible_alias = "t")]
    Test(FlowArgs),

    /// Generate a config file by prompting for each field.
    #[command(visible_aliases = ["gen", "g"])]
    Generate {
        /// Output to FILE. Defaults to ~/.authcodetest.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Run the authcode timeout test: poll echo until the access token expires.
    #[command(visible_alias = "o")]
    Timeout(FlowArgs),
}

#[derive(Debug, Args)]
struct FlowArgs {
    /// Load configuration from FILE. Defaults to ~/.authcodetest.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the default scope.
    #[arg(short, long, default_value = "openid")]
    scope: String,

    /// Load configuration from AUTHCODE_* environment variables instead of a file.
    #[arg(long, conflicts_with = "config")]
    from_env: bool,

    /// Print the login URL instead of opening a browser.
    #[arg(long)]
    no_browser: bool,

    /// Seconds to wait for the browser login to complete.
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    login_timeout: u64,
}

impl FlowArgs {
    fn load_config(&self) -> eyre::Result<AuthCodeConfig> {
        if self.from_env {
            if let Err(missing) = AuthCodeConfig::check_inventory() {
                let vars: Vec<_> = missing.iter().map(|item| item.var).collect();
                eyre::bail!("missing environment variables: {}", vars.join(", "));
            }
            return AuthCodeConfig::from_env().wrap_err("error loading config from environment");
        }

        let path = self.config.clone().unwrap_or_else(default_config_path);
        Ok(AuthCodeConfig::load(path)?)
    }

    fn runner(&self) -> eyre::Result<FlowRunner> {
        let config = self.load_config()?;
        let client = AuthCodeClient::new(config, self.scope.clone())
            .wrap_err("error building http client")?;

        let runner = if self.no_browser {
            FlowRunner::new(client, PrintUrl)
        } else {
            FlowRunner::new(client, host_launcher())
        };
        Ok(runner.with_login_timeout(Duration::from_secs(self.login_timeout)))
    }
}

fn generate(output: Option<PathBuf>) -> eyre::Result<()> {
    let path = output.unwrap_or_else(default_config_path);

    let config = AuthCodeConfig::generate(std::io::stdin().lock(), std::io::stdout())?;
    print!("{}", config.to_json()?);
    config.save(&path)?;

    info!(path = %path.display(), "wrote config");
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Test(args) => {
            let report = args.runner()?.run_test().await?;
            info!(echo = report.echo, refreshes = report.refreshes, "authcode test complete");
        }
        Command::Timeout(args) => {
            let report = args.runner()?.run_timeout().await?;
            info!(
                expires_in = report.expires_in.as_secs(),
                passed = report.poll.passed,
                probe_failed = report.poll.probe_failed,
                elapsed_secs = report.elapsed.as_secs_f64(),
                final_echo = report.final_echo,
                "authcode timeout test complete"
            );
        }
        Command::Generate { output } => generate(output)?,
    }

    Ok(())
}
