use assetline::{Config, Mode, Registry, logging};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use console::style;

/// Static asset pipeline: styles, scripts, markup, images and an SVG sprite.
#[derive(Debug, Parser)]
#[command(name = "assetline", version, about, long_about = None)]
struct Cli {
    /// Config file (TOML). Default: `assetline.toml` if present.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<Utf8PathBuf>,

    /// Source directory, overriding the config.
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<Utf8PathBuf>,

    /// Log filter, e.g. `debug` or `assetline=trace`. Default: `ASSETLINE_LOG` or `info`.
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Clean the output directory and run every step once.
    Build,
    /// Build, then watch the sources and serve the output with live reload.
    Dev,
    /// Run the named tasks one after another.
    Run {
        #[arg(required = true, value_name = "TASK")]
        tasks: Vec<String>,
    },
    /// List the registered tasks.
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("{} {err:?}", style("assetline error:").red().bold());
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref())?;

    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.root = root;
    }

    let mode = match cli.command {
        Command::Dev => Mode::Dev,
        _ => Mode::Build,
    };

    let registry = Registry::standard(&config, mode)?;
    registry.validate()?;

    match cli.command {
        Command::Build => registry.run("build").await?,
        Command::Dev => {
            tokio::select! {
                result = registry.run("dev") => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("stopping"),
            }
        }
        Command::Run { tasks } => {
            for task in &tasks {
                registry.run(task).await?;
            }
        }
        Command::List => {
            for (name, outline) in registry.list() {
                println!("{:<10} {}", style(name).cyan(), outline);
            }
        }
    }

    Ok(())
}
