use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use humeval::errors::Result;
use humeval::output::OError;
use humeval::records::{self, ExtractOptions, ScoreRecord};
use humeval::reliability::{self, Assessment, QcSettings};
use humeval::store::Store;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::{error, fs, io, process};

/// Annotator reliability report
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Results CSV, or a store file (JSON) if --campaign is given
    infile: PathBuf,
    /// Campaign to read from the store
    #[arg(long)]
    campaign: Option<String>,
    /// Only list users failing at this p-value
    #[arg(long)]
    p_value: Option<f64>,
    /// Smallest total annotation time (seconds) that passes
    #[arg(long, default_value_t = reliability::DEFAULT_MIN_SECONDS)]
    min_seconds: f64,
    /// Users to leave out
    #[arg(long, value_delimiter = ',')]
    exclude_ids: Vec<String>,
    /// Compare z-scores instead of raw scores
    #[arg(long)]
    wmt22_format: bool,
    /// Print the report as CSV
    #[arg(long)]
    export_csv: bool,
    /// Also write the report as JSON
    #[arg(long)]
    json: Option<PathBuf>,
    /// Report errors as a JSON file
    #[arg(long)]
    error_file: Option<String>,
    /// Verbosity
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

fn read_records(args: &Args) -> Result<Vec<ScoreRecord>> {
    let records = match &args.campaign {
        Some(name) => {
            let store = Store::load(&args.infile)?;
            let campaign = store.campaign_by_name(name)?.id;
            let options = ExtractOptions {
                extended: true,
                expand_systems: true,
                ..ExtractOptions::default()
            };
            records::extract(&store, campaign, &options)?
        }
        None => records::read_csv_file(&args.infile)?,
    };
    Ok(records
        .into_iter()
        .filter(|r| !args.exclude_ids.contains(&r.user))
        .collect())
}

fn print_table(assessments: &[Assessment], csv: bool) {
    if csv {
        println!("source,target,user,p_ref,p_chk,p_bad,ref_pairs,chk_pairs,bad_pairs,items,seconds,passed");
    } else {
        println!(
            "{:<8} {:<8} {:<20} {:>8} {:>8} {:>8} {:>6} {:>8}  pass",
            "src", "tgt", "user", "p_ref", "p_chk", "p_bad", "items", "seconds"
        );
    }
    for a in assessments {
        if csv {
            println!(
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                a.source,
                a.target,
                a.user,
                a.p_ref,
                a.p_chk,
                a.p_bad,
                a.ref_pairs,
                a.chk_pairs,
                a.bad_pairs,
                a.items,
                a.seconds,
                a.passed
            );
        } else {
            println!(
                "{:<8} {:<8} {:<20} {:>8.5} {:>8.5} {:>8.5} {:>6} {:>8.0}  {}",
                a.source,
                a.target,
                a.user,
                a.p_ref,
                a.p_chk,
                a.p_bad,
                a.items,
                a.seconds,
                if a.passed { "yes" } else { "no" }
            );
        }
    }
}

fn write_json(path: &Path, assessments: &[Assessment]) -> Result<()> {
    info!(target: "humeval", "write: {}", path.display());
    let file = fs::File::create(path)?;
    let writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, assessments)?;
    Ok(())
}

fn process(args: &Args) -> Result<()> {
    let records = read_records(args)?;
    let settings = QcSettings {
        p_value: args.p_value.unwrap_or(reliability::DEFAULT_P_VALUE),
        min_seconds: args.min_seconds,
        wmt22: args.wmt22_format,
    };
    let assessments = reliability::assess(&records, &settings);
    if let Some(path) = &args.json {
        write_json(path, &assessments)?;
    }
    if args.p_value.is_some() {
        for user in reliability::rejected_users(&assessments) {
            println!("{user}");
        }
    } else {
        print_table(&assessments, args.export_csv);
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
