use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use docx_templater::config::{find_default_config, load_config, load_values, EngineConfig};
use docx_templater::ir::{DocumentStatus, ReplacementMap};
use docx_templater::pipeline::{DocumentProcessor, Mode};
use docx_templater::placeholder::PlaceholderSet;
use docx_templater::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "docx-templater")]
#[command(about = "Find and fill {{placeholders}} in .docx templates", long_about = None)]
struct Args {
    /// Config file path (default: search for docx-templater.toml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress per-document progress lines on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every placeholder found in the given documents (JSON on stdout)
    Scan {
        #[arg(value_name = "DOCX", required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Fill placeholders from a values file and print the report (JSON on stdout)
    Replace {
        #[arg(value_name = "DOCX")]
        input: PathBuf,

        /// JSON object or TOML table of NAME = "value" (image values are file paths)
        #[arg(long, value_name = "FILE")]
        values: PathBuf,

        /// Output .docx (default: overwrite the input)
        #[arg(short, long, value_name = "DOCX")]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when at least one document failed.
fn run(args: Args) -> anyhow::Result<bool> {
    let config_path = args.config.clone().or_else(find_default_config);
    let engine = match config_path {
        Some(p) => {
            log::debug!("config: {}", p.display());
            let cfg = load_config(&p)?;
            EngineConfig::from_section(&cfg.engine)
                .with_context(|| format!("invalid config: {}", p.display()))?
        }
        None => EngineConfig::default(),
    };
    let processor = DocumentProcessor::new(engine);

    match args.command {
        Command::Scan { inputs } => {
            let progress = ConsoleProgress::new(!args.quiet, inputs.len());
            let outcomes = processor.process_batch(
                &inputs,
                Mode::Scan,
                &ReplacementMap::empty(),
                None,
                |i, o| progress.document_done(i, &o.document, o.status),
            );
            let mut all = PlaceholderSet::new();
            let mut ok = true;
            for o in outcomes {
                ok &= o.status != DocumentStatus::Failed;
                all.extend(o.placeholders);
            }
            progress.info(format!("{} distinct placeholder(s)", all.len()));
            let json = serde_json::to_string_pretty(all.placeholders())
                .context("serialize placeholders")?;
            println!("{json}");
            Ok(ok)
        }
        Command::Replace {
            input,
            values,
            output,
        } => {
            let entries = load_values(&values)?;
            let map = ReplacementMap::new(entries)?;
            let progress = ConsoleProgress::new(!args.quiet, 1);
            let outcome =
                processor.run_document(&input, output.as_deref(), Mode::Replace, &map, None);
            progress.document_done(0, &outcome.document, outcome.status);
            let json = serde_json::to_string_pretty(&outcome).context("serialize report")?;
            println!("{json}");
            Ok(outcome.status != DocumentStatus::Failed)
        }
    }
}
