use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mouth_config::{Config, MinimalConfig, OverridableConfig};

use crate::setup;

/// The config folder used when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = ".mouth";

/// A StatsD-style metrics aggregator writing to MongoDB.
#[derive(Debug, Parser)]
#[command(name = "mouth", version, max_term_width = 79)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// The path to the config folder.
    #[arg(short, long, global = true, value_name = "CONFIG", env = "MOUTH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the metrics server.
    ///
    /// This runs mouth in the foreground until it's shut down. It binds the UDP listener to the
    /// host and port in the config file, unless overridden by arguments or environment.
    Run(RunArgs),

    /// Manage the mouth config.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// The host the UDP listener binds to.
    #[arg(long, value_name = "HOST", env = "MOUTH_HOST")]
    host: Option<String>,

    /// The port the UDP listener binds to.
    #[arg(short, long, value_name = "PORT", env = "MOUTH_PORT")]
    port: Option<String>,

    /// The flush interval in seconds.
    #[arg(long, value_name = "SECONDS", env = "MOUTH_FLUSH_INTERVAL")]
    flush_interval: Option<String>,

    /// The host of the MongoDB server.
    #[arg(long, value_name = "HOST", env = "MOUTH_SINK_HOST")]
    sink_host: Option<String>,

    /// The port of the MongoDB server.
    #[arg(long, value_name = "PORT", env = "MOUTH_SINK_PORT")]
    sink_port: Option<String>,

    /// The database documents are written into.
    #[arg(long, value_name = "NAME", env = "MOUTH_SINK_DATABASE")]
    sink_database: Option<String>,
}

impl From<RunArgs> for OverridableConfig {
    fn from(args: RunArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            flush_interval: args.flush_interval,
            sink_host: args.sink_host,
            sink_port: args.sink_port,
            sink_database: args.sink_database,
        }
    }
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Initialize a new config folder.
    ///
    /// This writes a minimal config file. Existing config files are never overwritten.
    Init,

    /// Show the entire config for debugging purposes.
    ///
    /// This dumps the effective config, including all values filled in from defaults.
    Show {
        /// The output format.
        #[arg(short, long, value_enum, default_value_t = ShowFormat::Yaml)]
        format: ShowFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ShowFormat {
    Debug,
    Yaml,
}

/// Loads the config from the given folder.
///
/// Without an explicit path, the default folder is used if it contains a config file and the
/// defaults otherwise.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None if Config::config_exists(DEFAULT_CONFIG_PATH) => {
            Ok(Config::from_path(DEFAULT_CONFIG_PATH)?)
        }
        None => Ok(Config::default()),
    }
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            config.apply_override(args.into())?;
            run(config)
        }
        Command::Config(ConfigCommand::Init) => {
            init_config(cli.config.as_deref().unwrap_or(Path::new(DEFAULT_CONFIG_PATH)))
        }
        Command::Config(ConfigCommand::Show { format }) => {
            let config = load_config(cli.config.as_deref())?;
            show_config(&config, format)
        }
    }
}

#[allow(clippy::print_stdout)]
fn init_config(path: &Path) -> Result<()> {
    if Config::config_exists(path) {
        bail!("a config already exists in {}", path.display());
    }

    MinimalConfig::default().save_in_folder(path)?;
    println!("Initialized config in {}", path.display());
    Ok(())
}

#[allow(clippy::print_stdout)]
fn show_config(config: &Config, format: ShowFormat) -> Result<()> {
    match format {
        ShowFormat::Debug => println!("{config:#?}"),
        ShowFormat::Yaml => println!("{}", config.to_yaml_string()?),
    }

    Ok(())
}

/// Starts the server with a fully loaded config.
pub fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    mouth_log::init(config.logging(), config.sentry());
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    mouth_server::run(config)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "mouth",
            "--config",
            "/etc/mouth",
            "run",
            "--port",
            "9999",
            "--sink-host",
            "mongo",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/mouth")));
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };

        let overrides = OverridableConfig::from(args);
        assert_eq!(overrides.port.as_deref(), Some("9999"));
        assert_eq!(overrides.sink_host.as_deref(), Some("mongo"));
        assert_eq!(overrides.host, None);
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["mouth", "config", "show", "-f", "debug"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Show {
                format: ShowFormat::Debug
            })
        ));
    }

    #[test]
    fn test_missing_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_init_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mouth");

        init_config(&path).unwrap();
        assert!(init_config(&path).is_err());

        let mut config = load_config(Some(&path)).unwrap();
        config
            .apply_override(RunArgs {
                flush_interval: Some("30".to_owned()),
                ..Default::default()
            }.into())
            .unwrap();

        similar_asserts::assert_eq!(config.aggregator_config().flush_interval, 30);
        assert_eq!(config.listen_port(), 8889);
        assert!(setup::check_config(&config).is_ok());
    }
}
