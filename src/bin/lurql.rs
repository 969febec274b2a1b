//! Binary entry point for the LURQL query CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use lurql::{
    cli::commands::{
        parse_scalar_binding, parse_set_binding, run_explain, run_query, CliError, ExplainReport,
        QueryFiles, RunConfig, RunReport,
    },
    Planner, PlannerConfig,
};
use tracing_subscriber::EnvFilter;

#[path = "lurql/config.rs"]
mod config;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(
    name = "lurql",
    version,
    about = "Plan and run LURQL path queries over JSON model dumps",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "LURQL_CONFIG",
        help = "Path to the CLI config file"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_name = "FILTER",
        help = "Log filter used when RUST_LOG is unset"
    )]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long, value_name = "FILE", help = "Model dump (classes, associations, objects, links)")]
    model: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Query AST in JSON")]
    query: PathBuf,

    #[arg(long, value_name = "ATTR", help = "Attribute compared as object identity")]
    identity_attribute: Option<String>,
}

#[derive(Args, Debug)]
struct RunCmd {
    #[command(flatten)]
    files: QueryArgs,

    #[arg(
        long = "param",
        value_name = "NAME=VALUE",
        help = "Bind a scalar parameter (repeatable)"
    )]
    params: Vec<String>,

    #[arg(
        long = "param-set",
        value_name = "NAME=A,B",
        help = "Bind a set parameter (repeatable)"
    )]
    param_sets: Vec<String>,

    #[arg(long, value_name = "DB", help = "SQLite database for subquery filters")]
    sqlite: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a query and print its plan.
    Explain(QueryArgs),
    /// Compile and execute a query, printing the selected object identities.
    Run(RunCmd),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    init_tracing(cli.log.as_deref().unwrap_or(config.log_filter()));
    tracing::debug!(path = ?config.path(), "lurql.cli.config_loaded");

    match cli.command {
        Command::Explain(args) => {
            let planner = planner_for(&args, &config);
            let files = query_files(args, &config)?;
            let report = run_explain(&files, &planner)?;
            emit(&cli.format, &report, |_| print_explain_text(&report))?;
        }
        Command::Run(cmd) => {
            let planner = planner_for(&cmd.files, &config);
            let mut params = config.params();
            for raw in &cmd.params {
                let (name, value) = parse_scalar_binding(raw)?;
                params.insert(name, value);
            }
            for raw in &cmd.param_sets {
                let (name, value) = parse_set_binding(raw)?;
                params.insert(name, value);
            }
            let run_config = RunConfig {
                params,
                sqlite: cmd.sqlite.or_else(|| config.default_sqlite().cloned()),
            };
            let files = query_files(cmd.files, &config)?;
            let report = run_query(&files, &planner, run_config)?;
            emit(&cli.format, &report, |_| print_run_text(&report))?;
        }
    }
    Ok(())
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn planner_for(args: &QueryArgs, config: &CliConfig) -> Planner {
    let mut planner_config = PlannerConfig::default();
    if let Some(attr) = args
        .identity_attribute
        .as_deref()
        .or(config.identity_attribute())
    {
        planner_config.identity_attribute = attr.to_string();
    }
    Planner::new(planner_config)
}

fn query_files(args: QueryArgs, config: &CliConfig) -> Result<QueryFiles, CliError> {
    let model = args
        .model
        .or_else(|| config.default_model().cloned())
        .ok_or("no model given; pass --model or set defaults.model in the config")?;
    Ok(QueryFiles {
        model,
        query: args.query,
    })
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_explain_text(report: &ExplainReport) {
    for line in &report.lines {
        println!("{line}");
    }
    println!("fingerprint: {}", report.fingerprint);
}

fn print_run_text(report: &RunReport) {
    for id in &report.objects {
        println!("{id}");
    }
}
