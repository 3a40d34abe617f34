#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

// ========================================================================================
//
//                      THE COMMAND-LINE FRONT-END: EPICLOCK
//
// ========================================================================================
//
// Thin orchestration over the library. `serve` hosts the estimation service; `estimate`,
// `batch` and `example` run the same validation and engine locally. Rounding for display
// happens here and nowhere else.

use clap::{CommandFactory, Parser, Subcommand};
use epiclock::batch;
use epiclock::coefficients::{CoefficientSource, CoefficientTable};
use epiclock::config::ServiceConfig;
use epiclock::engine;
use epiclock::example;
use epiclock::server::{self, AppState};
use epiclock::validate;
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "epiclock",
    version,
    about = "DNA-methylation (Horvath 2013 layout) epigenetic age estimation",
    long_about = "Estimates epigenetic age from 353 CpG beta values, either as an HTTP \
                 service or directly from the command line."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP estimation service
    Serve {
        /// Path to a TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Socket address to bind, overriding the configuration file
        #[arg(long)]
        bind: Option<String>,

        /// Coefficient table (TSV), overriding the configuration file
        #[arg(long)]
        coefficients: Option<PathBuf>,
    },
    /// Estimate the age of one sample from comma- or whitespace-separated beta values
    Estimate {
        /// Beta values inline, e.g. "0.78, 0.23, 0.56, ..."
        #[arg(long, conflicts_with = "input")]
        values: Option<String>,

        /// File holding the beta values, or "-" for stdin
        #[arg(long)]
        input: Option<PathBuf>,

        /// Coefficient table (TSV); the bundled table when omitted
        #[arg(long)]
        coefficients: Option<PathBuf>,

        /// Print the full-precision result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Estimate ages for every sample of a tab-separated matrix
    Batch {
        /// Matrix with a sample_id column and one column per CpG site id
        #[arg(value_name = "MATRIX_PATH")]
        matrix: PathBuf,

        /// Output TSV path; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,

        /// Coefficient table (TSV); the bundled table when omitted
        #[arg(long)]
        coefficients: Option<PathBuf>,
    },
    /// Print a random example input of 353 beta values
    Example {
        /// Seed for a reproducible example
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print version information
    Version,
}

fn main() {
    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Serve {
            config,
            bind,
            coefficients,
        }) => run_serve(config, bind, coefficients),
        Some(Commands::Estimate {
            values,
            input,
            coefficients,
            json,
        }) => run_estimate(values, input, coefficients, json),
        Some(Commands::Batch {
            matrix,
            out,
            coefficients,
        }) => run_batch(matrix, out, coefficients),
        Some(Commands::Example { seed }) => {
            println!("{}", example::format_betas(&example::random_betas(seed)));
            Ok(())
        }
        Some(Commands::Version) => print_version_info(),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("> Error: {e}");
        process::exit(1);
    }
}

fn init_logging(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

fn load_table(path: Option<PathBuf>) -> Result<CoefficientTable, Box<dyn Error>> {
    let source = CoefficientSource::from_path(path);
    Ok(source.load()?)
}

fn run_serve(
    config_path: Option<PathBuf>,
    bind: Option<String>,
    coefficients: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let config = ServiceConfig::load(config_path.as_deref())?.with_overrides(bind, coefficients);
    config.validate()?;
    init_logging(&config.logging.level);

    // The table is resolved before the runtime starts accepting connections.
    let state = AppState::from_config(&config.coefficients)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server::serve(config, state))?;
    Ok(())
}

fn read_values_text(values: Option<String>, input: Option<PathBuf>) -> Result<String, Box<dyn Error>> {
    match (values, input) {
        (Some(values), _) => Ok(values),
        (None, Some(path)) if path.as_os_str() == "-" => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
        (None, Some(path)) => fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read '{}': {e}", path.display()).into()),
        (None, None) => Err("Provide beta values with --values or --input.".into()),
    }
}

fn run_estimate(
    values: Option<String>,
    input: Option<PathBuf>,
    coefficients: Option<PathBuf>,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    init_logging("warn");
    let text = read_values_text(values, input)?;
    let vector = validate::parse_delimited(&text)?;
    let table = load_table(coefficients)?;
    let age = engine::estimate_age(&vector, &table)?;

    if json {
        println!("{}", serde_json::json!({ "epiAge": age.years() }));
    } else {
        println!("Epigenetic age (Horvath 2013): {age} years");
    }
    Ok(())
}

fn run_batch(
    matrix_path: PathBuf,
    out: Option<PathBuf>,
    coefficients: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    init_logging("info");
    let start_time = Instant::now();

    eprintln!("> Loading coefficient table...");
    let table = load_table(coefficients)?;
    eprintln!(
        "> Using coefficient table '{}' ({} sites)",
        table.version(),
        table.weights().len()
    );

    eprintln!("> Reading sample matrix: {}", matrix_path.display());
    let matrix = batch::read_matrix_file(&matrix_path, &table)?;

    eprintln!("> Scoring {} samples...", matrix.sample_ids.len());
    let outcomes = batch::score_matrix(&matrix, &table);
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();

    match &out {
        Some(path) => batch::write_outcomes(File::create(path)?, &outcomes)?,
        None => batch::write_outcomes(io::stdout().lock(), &outcomes)?,
    }

    eprintln!(
        "> Scored {} samples ({} failed) in {:.2?}",
        outcomes.len() - failed,
        failed,
        start_time.elapsed()
    );
    if let Some(path) = out {
        eprintln!("> Results written to {}", path.display());
    }
    Ok(())
}

fn print_version_info() -> Result<(), Box<dyn Error>> {
    let version = env!("CARGO_PKG_VERSION");
    let release_tag = option_env!("EPICLOCK_RELEASE_TAG");

    println!("epiclock {version}");
    match release_tag {
        Some(tag) => println!("Release: {tag}"),
        None => println!("Release: development build"),
    }

    let table = CoefficientTable::bundled()?;
    println!(
        "Bundled coefficient table: {} ({} sites)",
        table.version(),
        table.weights().len()
    );
    Ok(())
}
