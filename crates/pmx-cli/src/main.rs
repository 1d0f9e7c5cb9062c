//! 🚀 pmx-cli: the front door, the bouncer, the maître d' of pmx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: parse args, set up logging, load config, hand the wheel to the
//! supervisor, print the report, pick an exit code. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pmx::{AppConfig, CancelFlag};

const DEFAULT_CONFIG_FILE: &str = "pmx.toml";

#[derive(Debug, Parser)]
#[command(
    name = "pmx",
    about = "Migrate property-management records: export, transform, import"
)]
struct Cli {
    /// TOML config file. Environment variables (PMX_*) fill in whatever it leaves out.
    #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Only migrate this collection (repeatable). Defaults to the config, then the whole catalog.
    #[arg(long = "collection", value_name = "NAME")]
    collections: Vec<String>,

    /// Resume the export after this source id. Needs exactly one --collection.
    #[arg(long, value_name = "ID")]
    resume_after: Option<String>,

    /// Skip the read-back validation pass after import.
    #[arg(long)]
    no_validate: bool,

    /// Log as JSON lines instead of pretty text.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// 🔧 Flags win over whatever the config file said.
    fn apply_overrides(&self, config: &mut AppConfig) -> Result<()> {
        if self.resume_after.is_some() && self.collections.len() != 1 {
            bail!(
                "💀 --resume-after is a source id, and source ids only mean something inside one \
                 collection. Pass exactly one --collection with it."
            );
        }
        if !self.collections.is_empty() {
            config.migration.collections = Some(self.collections.clone());
        }
        if self.no_validate {
            config.migration.validate_after_import = false;
        }
        Ok(())
    }
}

/// 🚀 main(): where it all begins. The "I pressed enter and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Parse args
/// 2. Init tracing (so we can see what goes wrong, and when)
/// 3. Load config (the moment of truth)
/// 4. Run the thing, with Ctrl-C wired to a polite stop
/// 5. Print the report and exit 1 if anything was left behind
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 📡 println! debugging is a lifestyle choice we're trying to move past
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config_file = cli.config.as_path();
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't even check whether the configuration file exists. Maybe it's a \
             permissions thing, maybe it's a pwd/cwd thing. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        // 💤 No file. The environment will have to carry this one alone.
        false => {
            warn!(
                "⚠️ '{}' not found, configuring from {}* environment variables only",
                config_file.display(),
                pmx::app_config::ENV_PREFIX
            );
            None
        }
    };

    let result = run(&cli, config_file).await;
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }
            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like a store isn't reachable. Check the source and target \
                     urls in the config, and if you're pointing at an emulator, that it's \
                     actually running. Even servers need a nudge sometimes. ☕"
                );
            }
            // 🗑️ Exit with prejudice.
            std::process::exit(1);
        }
    };

    println!("{}", report.render_table());
    if let Some(artifact) = &report.artifact {
        info!("🧾 report written to {}", artifact.display());
    }

    if !report.success {
        error!("💀 at least one collection did not migrate cleanly, see the report above");
        std::process::exit(1);
    }
    // ✅ Pop the champagne. 🍾
    Ok(())
}

async fn run(cli: &Cli, config_file: Option<&std::path::Path>) -> Result<pmx::MigrationReport> {
    let mut app_config = pmx::load_config(config_file).context(
        "💀 Couldn't load the configuration. Take a look at the file and the PMX_* environment, \
         something obvious is probably missing (the error above says exactly what).",
    )?;
    cli.apply_overrides(&mut app_config)?;

    // 🛑 First Ctrl-C: finish the batches in flight, skip the rest, still print the report.
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 interrupt received, finishing in-flight batches and stopping");
            on_interrupt.cancel();
        }
    });

    pmx::run(&app_config, cancel, cli.resume_after.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmx::app_config::{MigrationConfig, SourceConfig, TargetConfig};
    use pmx::backends::{FileSourceConfig, FileTargetConfig};

    fn app_config() -> AppConfig {
        AppConfig {
            source: SourceConfig::File(FileSourceConfig {
                dir: Some("dump".into()),
            }),
            target: TargetConfig::File(FileTargetConfig {
                dir: Some("out".into()),
            }),
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn the_one_where_flags_override_the_config() -> Result<()> {
        let cli = Cli::try_parse_from([
            "pmx",
            "prod.toml",
            "--collection",
            "users",
            "--resume-after",
            "u-0042",
            "--no-validate",
        ])?;
        let mut config = app_config();
        cli.apply_overrides(&mut config)?;

        assert_eq!(cli.config, PathBuf::from("prod.toml"));
        assert_eq!(config.migration.collections, Some(vec!["users".to_string()]));
        assert!(!config.migration.validate_after_import);
        Ok(())
    }

    #[test]
    fn the_one_where_resume_after_needs_exactly_one_collection() -> Result<()> {
        let cli = Cli::try_parse_from([
            "pmx",
            "--collection",
            "users",
            "--collection",
            "agencies",
            "--resume-after",
            "u-0042",
        ])?;
        assert!(cli.apply_overrides(&mut app_config()).is_err());

        let cli = Cli::try_parse_from(["pmx", "--resume-after", "u-0042"])?;
        assert!(cli.apply_overrides(&mut app_config()).is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_no_arguments_means_pmx_toml() -> Result<()> {
        let cli = Cli::try_parse_from(["pmx"])?;
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(cli.collections.is_empty());
        Ok(())
    }
}
