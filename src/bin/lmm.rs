//! LMM - Longitudinal Mixed Model CLI
//!
//! Command-line interface for the VSAE longitudinal analysis.

use clap::{Parser, Subcommand};
use log::info;
use longitudinal_lmm::data::load_and_clean;
use longitudinal_lmm::error::Result;
use longitudinal_lmm::model::{fit_model, Criterion, ModelSpec};
use longitudinal_lmm::pipeline::{run_analysis, AnalysisConfig, NamedFit};
use longitudinal_lmm::plot::{render_all, PlotConfig};
use longitudinal_lmm::report::{render_fit, render_report, OutputFormat};
use longitudinal_lmm::test::test_wald;
use std::path::{Path, PathBuf};

/// Longitudinal linear mixed-effects analysis
#[derive(Parser)]
#[command(name = "lmm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis: plots, both models, and their comparison
    Run {
        /// Path to analysis configuration YAML (defaults are used when absent)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Path to the data CSV, overriding the configuration
        #[arg(short, long)]
        data: Option<String>,

        /// Directory for the plots, overriding the configuration
        #[arg(long)]
        plots_dir: Option<String>,

        /// Skip plot rendering
        #[arg(long)]
        no_plots: bool,

        /// Output format: text, json, or yaml
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Fit a single mixed model
    Fit {
        /// Path to the data CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Mixed formula (e.g., "vsae ~ age + (1 | childid)")
        #[arg(long)]
        formula: String,

        /// Use REML instead of ML
        #[arg(long)]
        reml: bool,

        /// Add `<column>_cen`, the column minus its mean, before fitting
        #[arg(long)]
        center: Option<String>,

        /// Output format: text, json, or yaml
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Draw the scatter and box plots
    Plot {
        /// Path to the data CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Column on the x axis
        #[arg(short, long, default_value = "age")]
        x: String,

        /// Column on the y axis
        #[arg(short, long, default_value = "vsae")]
        y: String,

        /// Output directory
        #[arg(short, long)]
        out: String,
    },

    /// Write an example analysis configuration
    Example {
        /// Output path for the configuration YAML
        #[arg(short, long, default_value = "analysis.yaml")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            data,
            plots_dir,
            no_plots,
            format,
        } => cmd_run(config.as_deref(), data, plots_dir, no_plots, &format),

        Commands::Fit {
            data,
            formula,
            reml,
            center,
            format,
        } => cmd_fit(&data, &formula, reml, center.as_deref(), &format),

        Commands::Plot { data, x, y, out } => cmd_plot(&data, &x, &y, out),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Run the full analysis
fn cmd_run(
    config_path: Option<&Path>,
    data: Option<String>,
    plots_dir: Option<String>,
    no_plots: bool,
    format: &str,
) -> Result<()> {
    let format: OutputFormat = format.parse()?;
    let mut config = match config_path {
        Some(path) => {
            info!("Loading analysis configuration from {:?}", path);
            AnalysisConfig::from_file(path)?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(data) = data {
        config.data_path = data;
    }
    if let Some(dir) = plots_dir {
        config.plots.output_dir = dir;
    }
    if no_plots {
        config.plots.enabled = false;
    }

    let report = run_analysis(&config)?;
    println!("{}", render_report(&report, format)?);
    Ok(())
}

/// Fit one model
fn cmd_fit(
    data_path: &Path,
    formula: &str,
    reml: bool,
    center: Option<&str>,
    format: &str,
) -> Result<()> {
    let format: OutputFormat = format.parse()?;
    let mut data = load_and_clean(data_path, None)?;
    if let Some(column) = center {
        let name = format!("{}_cen", column);
        let mean = data.table.add_centered_column(column, &name)?;
        info!("Centered {} at its mean {:.4} as {}", column, mean, name);
    }

    let criterion = if reml {
        Criterion::Reml
    } else {
        Criterion::MaximumLikelihood
    };
    let fit = fit_model(&data.table, &ModelSpec::new(formula).with_criterion(criterion))?;
    let wald = test_wald(&fit)?;
    let model = NamedFit {
        name: formula.to_string(),
        fit,
        wald,
    };
    println!("{}", render_fit(&model, format)?);
    Ok(())
}

/// Render the plots only
fn cmd_plot(data_path: &Path, x: &str, y: &str, out: String) -> Result<()> {
    let data = load_and_clean(data_path, None)?;
    let options = PlotConfig {
        output_dir: out,
        ..Default::default()
    };
    for path in render_all(&data.table, x, y, &options)? {
        println!("{}", path.display());
    }
    Ok(())
}

/// Write the default configuration
fn cmd_example(output: &Path) -> Result<()> {
    let yaml = AnalysisConfig::default().to_yaml()?;
    std::fs::write(output, yaml)?;
    info!("Wrote example configuration to {:?}", output);
    Ok(())
}
