mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use depstrap_lib::config::ProjectConfig;
use depstrap_lib::consts::{APP_NAME, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
use depstrap_lib::platform::os::Os;

use cmd::{cmd_clean, cmd_configure, cmd_link_directives, cmd_probe, cmd_sources, load_project};
use output::{OutputFormat, print_error};

/// depstrap - resolve native dependencies at build-configuration time
#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the project file
  #[arg(short, long, global = true, env = CONFIG_ENV_VAR, default_value = DEFAULT_CONFIG_FILE)]
  config: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

/// Overrides for the `[features]` table of the project file.
#[derive(Args)]
struct FeatureArgs {
  /// Enable the tls feature
  #[arg(long, conflicts_with = "no_tls")]
  tls: bool,

  /// Disable the tls feature
  #[arg(long)]
  no_tls: bool,

  /// Target platform (linux, darwin, windows, freebsd)
  #[arg(long)]
  platform: Option<Os>,
}

impl FeatureArgs {
  fn apply(&self, config: &mut ProjectConfig) {
    if self.tls {
      config.set_feature("tls", true);
    }
    if self.no_tls {
      config.set_feature("tls", false);
    }
    if let Some(os) = self.platform {
      config.set_platform(os);
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Run a full configuration pass and write the build graph
  Configure {
    #[command(flatten)]
    features: FeatureArgs,

    /// Re-run nested project phases even if their byproducts exist
    #[arg(long)]
    rebuild_nested: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Search for an installed copy of the library without building anything
  Probe {
    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// List the compilation units of a target
  Sources {
    /// Target name
    target: String,

    #[command(flatten)]
    features: FeatureArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Resolve the library and print cargo link directives for it
  LinkDirectives {
    /// Library variant to link (defaults to the first declared)
    #[arg(long)]
    variant: Option<String>,
  },

  /// Remove isolated prefixes, work directories and nested staging areas
  Clean,
}

fn main() {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(err) = run(cli) {
    print_error(&format!("{err:#}"));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let mut project = load_project(&cli.config)?;

  match cli.command {
    Commands::Configure {
      features,
      rebuild_nested,
      output,
    } => {
      features.apply(&mut project);
      cmd_configure(&project, rebuild_nested, output, cli.verbose)
    }
    Commands::Probe { output } => cmd_probe(&project, output),
    Commands::Sources {
      target,
      features,
      output,
    } => {
      features.apply(&mut project);
      cmd_sources(&project, &target, output)
    }
    Commands::LinkDirectives { variant } => cmd_link_directives(&project, variant.as_deref()),
    Commands::Clean => cmd_clean(&project),
  }
}
