use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use humeval::errors::{self, Result};
use humeval::output::{self, Leaderboard, OError};
use humeval::records::{self, ExtractOptions, ScoreRecord};
use humeval::scoring::{self, ScoringSettings, SigTest};
use humeval::store::Store;
use log::{error, info};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{error, fs, io, process};

/// System rankings with significance clusters
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Results CSV, or a store file (JSON) if --campaign is given
    infile: PathBuf,
    /// Campaign to read from the store
    #[arg(long)]
    campaign: Option<String>,
    /// Rank by mean only
    #[arg(long)]
    no_sigtest: bool,
    /// Approximate randomisation instead of Mann-Whitney U
    #[arg(long)]
    ar: bool,
    /// Trials of approximate randomisation
    #[arg(long, default_value_t = scoring::DEFAULT_TRIALS)]
    trials: u64,
    /// Random seed of approximate randomisation
    #[arg(long, default_value_t = 123456)]
    seed: u64,
    /// Significance level
    #[arg(long, default_value_t = scoring::DEFAULT_ALPHA)]
    alpha: f64,
    /// Sort and test on z-scores
    #[arg(long)]
    wmt22_format: bool,
    /// Users to leave out
    #[arg(long, value_delimiter = ',')]
    exclude_ids: Vec<String>,
    /// Only results of completed tasks (store input)
    #[arg(long)]
    completed_only: bool,
    /// Include archived accounts (store input)
    #[arg(long)]
    include_inactive: bool,
    /// Systems combined into COMBO_MAX
    #[arg(long, value_delimiter = ',')]
    combo: Vec<String>,
    /// References combined into REFS_MAX
    #[arg(long, value_delimiter = ',')]
    refs: Vec<String>,
    /// Log every pairwise test
    #[arg(long)]
    show_p_values: bool,
    /// Print LaTeX tables instead of TSV
    #[arg(long)]
    latex: bool,
    /// Also print head-to-head tables
    #[arg(long)]
    head_to_head: bool,
    /// Write leaderboards as JSON
    #[arg(long)]
    json: Option<PathBuf>,
    /// Write leaderboards as an XLSX workbook
    #[arg(long)]
    xlsx: Option<PathBuf>,
    /// Report errors as a JSON file
    #[arg(long)]
    error_file: Option<String>,
    /// Produce compact JSON files
    #[arg(long)]
    compact: bool,
    /// Verbosity
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

fn read_records(args: &Args) -> Result<Vec<ScoreRecord>> {
    match &args.campaign {
        Some(name) => {
            let store = Store::load(&args.infile)?;
            let campaign = store.campaign_by_name(name)?.id;
            let options = ExtractOptions {
                extended: false,
                expand_systems: false,
                include_inactive: args.include_inactive,
                completed_only: args.completed_only,
            };
            records::extract(&store, campaign, &options)
        }
        None => records::read_csv_file(&args.infile),
    }
}

fn write_json(path: &Path, boards: &[Leaderboard], compact: bool) -> Result<()> {
    info!(target: "humeval", "write: {}", path.display());
    let file = fs::File::create(path)?;
    let writer = io::BufWriter::new(file);
    if compact {
        serde_json::to_writer(writer, boards)?;
    } else {
        serde_json::to_writer_pretty(writer, boards)?;
    }
    Ok(())
}

fn process(args: &Args) -> Result<()> {
    let records = read_records(args)?;
    if records.is_empty() {
        return Err(errors::invalid_input_ref("no score records found"));
    }
    let sigtest = match (args.no_sigtest, args.ar) {
        (true, _) => None,
        (false, true) => Some(SigTest::Randomization {
            trials: args.trials,
            seed: args.seed,
        }),
        (false, false) => Some(SigTest::MannWhitney),
    };
    let settings = ScoringSettings {
        wmt22: args.wmt22_format,
        sigtest,
        alpha: args.alpha,
        exclude: args.exclude_ids.iter().cloned().collect::<HashSet<_>>(),
        combo: args.combo.clone(),
        references: args.refs.clone(),
        show_p_values: args.show_p_values,
    };
    let boards = scoring::leaderboards(&records, &settings);
    if args.latex {
        for b in &boards {
            print!("{}", output::latex(b, args.wmt22_format));
        }
    } else {
        print!("{}", output::tsv(&boards, args.wmt22_format));
    }
    if args.head_to_head {
        for b in boards.iter().filter(|b| b.sigtest) {
            print!("{}", output::head_to_head(b));
        }
    }
    if let Some(path) = &args.json {
        write_json(path, &boards, args.compact)?;
    }
    if let Some(path) = &args.xlsx {
        info!(target: "humeval", "write: {}", path.display());
        output::write_xlsx(path, &boards)?;
    }
    Ok(())
}

fn store_error(error_file: &str, e: &dyn error::Error) -> Result<()> {
    let error = OError {
        error: format!("{e}"),
    };
    let file = fs::File::create(error_file)?;
    let writer = io::BufWriter::new(file);
    serde_json::to_writer(writer, &error)?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    pretty_env_logger::formatted_timed_builder()
        .filter_level(args.verbose.log_level_filter())
        .init();
    match process(&args) {
        Ok(()) => (),
        Err(e) => {
            match &args.error_file {
                Some(filename) => match store_error(filename, &*e) {
                    Ok(()) => {
                        info!(target: "humeval", "error reported: {e}");
                    }
                    Err(e2) => {
                        error!(target: "humeval", "{e}");
                        error!(target: "humeval", "{e2}");
                    }
                },
                None => error!(target: "humeval", "{e}"),
            }
            process::exit(1);
        }
    }
}
