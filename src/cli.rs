use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use activity_mirror::activity_sync::{MergeStrategy, SyncReport, run_sync};
use activity_mirror::config::{Config, Domain, Endpoints, token_dir_from_env};
use activity_mirror::session::GarminAuth;

/// Mirror recent Garmin Connect activities into a local CSV file.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Garmin Connect username
    #[arg(long)]
    username: String,
    /// Password (prompted for when omitted)
    #[arg(long)]
    password: Option<String>,
    /// Number of most recent activities to check
    #[arg(long, default_value_t = 200)]
    count: u32,
    /// CSV file to merge new activities into
    #[arg(long, default_value = "activities.csv")]
    output: PathBuf,
    /// Where new activities go in the file. Use the same strategy for every
    /// run against a given file; mixing them scrambles the row order
    #[arg(long, value_enum, default_value_t = MergeStrategy::Prepend)]
    strategy: MergeStrategy,
    /// Garmin Connect region
    #[arg(long, value_enum, default_value_t = Domain::Com)]
    domain: Domain,
    /// Only request running activities
    #[arg(long)]
    only_running: bool,
}

fn build_config(args: Cli) -> anyhow::Result<Config> {
    let password = match args.password {
        Some(password) => password,
        None => rpassword::prompt_password("Enter your Garmin Connect password: ")
            .context("Failed to read password")?,
    };

    let token_dir = token_dir_from_env();
    fs::create_dir_all(&token_dir)
        .with_context(|| format!("Failed to create token directory {}", token_dir.display()))?;

    Ok(Config {
        username: args.username,
        password,
        count: args.count,
        output: args.output,
        strategy: args.strategy,
        endpoints: Endpoints::from(args.domain),
        only_running: args.only_running,
        token_dir,
    })
}

fn sync(config: &Config) -> anyhow::Result<SyncReport> {
    let backend = GarminAuth::new(&config.endpoints)?;
    Ok(run_sync(config, &backend)?)
}

pub fn cli_main() -> ExitCode {
    let args = Cli::parse();

    let result = build_config(args).and_then(|config| {
        let report = sync(&config)?;
        Ok((report, config.output))
    });

    match result {
        Ok((report, output)) => {
            println!(
                "Synced {} new activities into {} ({} listed, {} already present)",
                report.written,
                output.display(),
                report.listed,
                report.skipped
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Sync failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Cli::parse_from(["activity-mirror", "--username", "me"]);
        assert_eq!(args.count, 200);
        assert_eq!(args.output, PathBuf::from("activities.csv"));
        assert_eq!(args.strategy, MergeStrategy::Prepend);
        assert_eq!(args.domain, Domain::Com);
        assert!(args.password.is_none());
        assert!(!args.only_running);
    }

    #[test]
    fn test_overrides() {
        let args = Cli::parse_from([
            "activity-mirror",
            "--username",
            "me",
            "--password",
            "pw",
            "--count",
            "20",
            "--strategy",
            "append",
            "--domain",
            "cn",
            "--only-running",
        ]);
        assert_eq!(args.count, 20);
        assert_eq!(args.strategy, MergeStrategy::Append);
        assert_eq!(args.domain, Domain::Cn);
        assert!(args.only_running);
    }

    #[test]
    fn test_strategy_help_warns_against_mixing() {
        let command = Cli::command();
        let help = command
            .get_arguments()
            .find(|a| a.get_id() == "strategy")
            .and_then(|a| a.get_help())
            .unwrap()
            .to_string();
        assert!(help.contains("same strategy"));
    }

    #[test]
    fn test_username_is_required() {
        assert!(Cli::try_parse_from(["activity-mirror"]).is_err());
    }
}
