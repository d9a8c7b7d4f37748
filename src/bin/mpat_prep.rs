use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use mpat_prep::app::{AcquireOptions, App, ProgressSinkKind, StatusReport};
use mpat_prep::config::{CONFIG_FILE, ConfigLoader, default_config};
use mpat_prep::convert::GdalTranslate;
use mpat_prep::error::PrepError;
use mpat_prep::gdal_cli::{GdalCli, ToolInfo};
use mpat_prep::http::ReqwestSource;
use mpat_prep::output::{JsonOutput, LogProgress, OutputMode, render_status};
use mpat_prep::prepare::PrepareOptions;
use mpat_prep::tui::Tui;

#[derive(Parser)]
#[command(name = "mpat-prep")]
#[command(about = "Fetch and normalize the MPAT geospatial input layers")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Config file (default: ./mpat-prep.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download raw datasets into the raw data root")]
    Acquire(AcquireArgs),
    #[command(about = "Mosaic, stamp and reproject raw layers into the prepared root")]
    Prepare(PrepareArgs),
    #[command(about = "Acquire, then prepare")]
    Run(RunArgs),
    #[command(about = "Show the state of every prepared layer")]
    Status,
    #[command(about = "Write the default Hawaii catalog to mpat-prep.json")]
    Init(InitArgs),
}

#[derive(Args, Clone, Copy)]
struct AcquireArgs {
    /// Re-download ZIP, folder and tabular datasets
    #[arg(long)]
    overwrite: bool,

    /// Re-stream DEM NetCDF files
    #[arg(long)]
    overwrite_nc: bool,

    /// Reconvert DEM tiles that already have a GeoTIFF
    #[arg(long)]
    overwrite_tif: bool,
}

#[derive(Args, Clone, Copy)]
struct PrepareArgs {
    /// Rebuild prepared layers that already exist
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args, Clone, Copy)]
struct RunArgs {
    #[command(flatten)]
    acquire: AcquireArgs,

    /// Rebuild prepared layers that already exist
    #[arg(long = "overwrite-prepared")]
    overwrite_prepared: bool,
}

#[derive(Args)]
struct InitArgs {
    /// Replace an existing config file
    #[arg(long)]
    force: bool,
}

impl From<AcquireArgs> for AcquireOptions {
    fn from(args: AcquireArgs) -> Self {
        AcquireOptions {
            overwrite: args.overwrite,
            overwrite_nc: args.overwrite_nc,
            overwrite_tif: args.overwrite_tif,
        }
    }
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    #[serde(flatten)]
    report: &'a StatusReport,
    tools: ToolInfo,
}

type CliApp = App<ReqwestSource, GdalCli, GdalTranslate>;

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PrepError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PrepError) -> u8 {
    match error {
        PrepError::MissingConfig
        | PrepError::ConfigRead(_)
        | PrepError::ConfigParse(_)
        | PrepError::UnknownLayerKey(_)
        | PrepError::MissingLayerKey { .. }
        | PrepError::InvalidEpsg(_) => 2,
        PrepError::Http(_)
        | PrepError::HttpStatus { .. }
        | PrepError::RetriesExhausted { .. }
        | PrepError::MissingTool { .. } => 3,
        PrepError::Listing(_)
        | PrepError::Archive(_)
        | PrepError::Conversion(_)
        | PrepError::MissingIntermediate(_)
        | PrepError::NoTiles(_)
        | PrepError::CrsUnresolvable(_) => 4,
        PrepError::Engine(_) | PrepError::Filesystem(_) => 1,
    }
}

/// While a progress view owns the terminal, log lines go to its log panel.
fn init_tracing(tui: Option<&Tui>) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false);
    match tui {
        Some(tui) => {
            let writer = tui.log_writer();
            builder
                .with_ansi(false)
                .without_time()
                .with_writer(move || writer.clone())
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let tui = match (output_mode, &cli.command) {
        (OutputMode::NonInteractive, _) => None,
        (_, Commands::Acquire(_)) => Some(Tui::new(ProgressSinkKind::Acquire)),
        (_, Commands::Prepare(_)) => Some(Tui::new(ProgressSinkKind::Prepare)),
        (_, Commands::Run(_)) => Some(Tui::new(ProgressSinkKind::Run)),
        (_, Commands::Status | Commands::Init(_)) => None,
    };
    init_tracing(tui.as_ref());

    if let Commands::Init(args) = &cli.command {
        return run_init(cli.config.as_deref(), args.force);
    }

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let http = ReqwestSource::new(&config.fetch)?;
    let app = App::new(config, http, GdalCli::new(), GdalTranslate::new());

    match cli.command {
        Commands::Acquire(args) => run_acquire(app, args.into(), tui),
        Commands::Prepare(args) => run_prepare(
            app,
            PrepareOptions {
                overwrite: args.overwrite,
            },
            tui,
        ),
        Commands::Run(args) => run_all(
            app,
            args.acquire.into(),
            PrepareOptions {
                overwrite: args.overwrite_prepared,
            },
            tui,
        ),
        Commands::Status => run_status(app, output_mode),
        Commands::Init(_) => Ok(()),
    }
}

fn run_acquire(app: CliApp, options: AcquireOptions, tui: Option<Tui>) -> miette::Result<()> {
    match tui {
        None => {
            let report = app.acquire(options, &LogProgress)?;
            JsonOutput::print_acquire(&report).into_diagnostic()?;
        }
        Some(mut tui) => {
            let report = tui.run(move |sink| app.acquire(options, sink))?;
            println!(
                "acquired {} datasets in {:.1}s",
                report.datasets.len(),
                report.elapsed_secs
            );
        }
    }
    Ok(())
}

fn run_prepare(app: CliApp, options: PrepareOptions, tui: Option<Tui>) -> miette::Result<()> {
    match tui {
        None => {
            let report = app.prepare(options, &LogProgress)?;
            JsonOutput::print_prepare(&report).into_diagnostic()?;
        }
        Some(mut tui) => {
            let report = tui.run(move |sink| app.prepare(options, sink))?;
            for layer in &report.layers {
                println!("{:<14} {:?}", layer.key, layer.action);
            }
            println!("prepared inputs ready in {:.1}s", report.elapsed_secs);
        }
    }
    Ok(())
}

fn run_all(
    app: CliApp,
    acquire: AcquireOptions,
    prepare: PrepareOptions,
    tui: Option<Tui>,
) -> miette::Result<()> {
    match tui {
        None => {
            let report = app.run(acquire, prepare, &LogProgress)?;
            JsonOutput::print_run(&report).into_diagnostic()?;
        }
        Some(mut tui) => {
            let report = tui.run(move |sink| app.run(acquire, prepare, sink))?;
            println!(
                "acquired {} datasets, prepared {} layers in {:.1}s",
                report.acquisition.datasets.len(),
                report.preparation.layers.len(),
                report.acquisition.elapsed_secs + report.preparation.elapsed_secs
            );
        }
    }
    Ok(())
}

fn run_status(app: CliApp, output_mode: OutputMode) -> miette::Result<()> {
    let report = app.status(&JsonOutput)?;
    let tools = app.engine().tool_info();
    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_status(&StatusOutput {
                report: &report,
                tools,
            })
            .into_diagnostic()?;
        }
        OutputMode::Interactive => {
            print!("{}", render_status(&report));
            match &tools.gdal {
                Some(version) => println!("gdal: {version}"),
                None => println!("gdal: not found"),
            }
            if !tools.missing.is_empty() {
                println!("missing tools: {}", tools.missing.join(", "));
            }
        }
    }
    Ok(())
}

fn run_init(path: Option<&str>, force: bool) -> miette::Result<()> {
    let path = Utf8PathBuf::from(path.unwrap_or(CONFIG_FILE));
    if path.as_std_path().exists() && !force {
        return Err(miette::miette!(
            help = "pass --force to replace it",
            "{path} already exists"
        ));
    }
    let json = serde_json::to_string_pretty(&default_config())
        .map_err(|err| PrepError::ConfigParse(err.to_string()))?;
    fs::write(path.as_std_path(), format!("{json}\n"))
        .map_err(|err| PrepError::Filesystem(err.to_string()))?;
    println!("wrote {path}");
    Ok(())
}
