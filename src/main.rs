use std::path::PathBuf;

use clap::{Parser, Subcommand};
use splot::fitter::{FitRequest, ModelRegistry, PeakSummary, fit_many};
use splot::ticks::{calc_linear_ticks, calc_log_ticks, calc_symlog_ticks};

#[derive(Parser)]
#[command(name = "splot", version, about = "Curve fitting and axis ticks for scan data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fit requests in a YAML or JSON file
    Fit {
        file: PathBuf,
        /// Print results as JSON instead of text reports
        #[arg(long)]
        json: bool,
    },
    /// Compute axis ticks for a data range
    Ticks {
        #[arg(allow_negative_numbers = true)]
        min: f64,
        #[arg(allow_negative_numbers = true)]
        max: f64,
        /// Target number of ticks on a linear axis
        #[arg(long, default_value_t = 5)]
        count: usize,
        /// Logarithmic axis
        #[arg(long)]
        log: bool,
        /// Symmetric log axis with this linear threshold around zero
        #[arg(long, conflicts_with = "log")]
        symlog: Option<f64>,
    },
    /// List the available fit models and their parameters
    Models,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init(); // Log to stderr (if you run with `RUST_LOG=debug`).

    let cli = Cli::parse();
    let registry = ModelRegistry::with_builtin_models();

    match cli.command {
        Commands::Fit { file, json } => run_fits(&registry, &file, json),
        Commands::Ticks {
            min,
            max,
            count,
            log,
            symlog,
        } => {
            let set = match (log, symlog) {
                (_, Some(threshold)) => calc_symlog_ticks(min, max, threshold),
                (true, None) => calc_log_ticks(min, max),
                (false, None) => calc_linear_ticks(min, max, count),
            };
            println!("{}", serde_json::to_string_pretty(&set)?);
            Ok(())
        }
        Commands::Models => {
            for name in registry.names() {
                let model = registry.get(name)?;
                let parameters: Vec<String> = model
                    .parameter_names()
                    .into_iter()
                    .zip(model.default_constraints())
                    .map(|(parameter, constraint)| format!("{parameter} ({})", constraint.kind()))
                    .collect();
                println!("{name}: {}", parameters.join(", "));
            }
            Ok(())
        }
    }
}

fn run_fits(
    registry: &ModelRegistry,
    file: &std::path::Path,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let requests = FitRequest::load(file)?;
    let results = fit_many(registry, &requests);

    let mut failed = 0;
    let mut documents = Vec::new();
    for (request, result) in requests.iter().zip(&results) {
        match result {
            Ok(result) => {
                if json {
                    documents.push(serde_json::json!({
                        "name": request.label(),
                        "result": result,
                        "peak": PeakSummary::from_result(result),
                    }));
                } else {
                    println!("# {}", request.label());
                    print!("{}", result.report());
                    if let Some(peak) = PeakSummary::from_result(result) {
                        println!("{peak}");
                    }
                }
            }
            Err(err) => {
                failed += 1;
                log::error!("Fit '{}' failed: {err}", request.label());
                if json {
                    documents.push(serde_json::json!({
                        "name": request.label(),
                        "error": err.to_string(),
                        "partial": err.partial_result(),
                    }));
                } else if let Some(partial) = err.partial_result() {
                    println!("# {} (not converged)", request.label());
                    print!("{}", partial.report());
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
    }

    if failed > 0 {
        return Err(format!("{failed} of {} fits failed", requests.len()).into());
    }
    Ok(())
}
