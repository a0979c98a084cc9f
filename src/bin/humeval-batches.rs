use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use humeval::batches::{self, BlockDefinition, BuilderArgs, Corpus, CorpusFiles};
use humeval::errors::Result;
use humeval::languages;
use log::{error, info};
use std::path::PathBuf;
use std::process;

/// Build annotation batches from system outputs
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Directory containing one `.txt` file per system
    systems_path: PathBuf,
    /// Output file (JSON)
    outfile: PathBuf,
    /// Source language code
    #[arg(short, long)]
    source_language: String,
    /// Target language code
    #[arg(short, long)]
    target_language: String,
    /// Source text file
    #[arg(long)]
    source_file: Option<PathBuf>,
    /// Reference files; references after the first are evaluated as systems
    #[arg(short, long)]
    reference_file: Vec<PathBuf>,
    /// Items per batch
    #[arg(long, default_value_t = batches::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Items per block
    #[arg(long, default_value_t = batches::DEFAULT_BLOCK_SIZE)]
    block_size: usize,
    /// Block layout as candidates:redundant:reference:bad
    #[arg(long, default_value = "7:1:1:1")]
    block_definition: String,
    /// Every slot of a block is a candidate
    #[arg(long)]
    no_redundancy: bool,
    /// Annotations required per task
    #[arg(long, default_value_t = 1)]
    required_annotations: u32,
    /// Random seed
    #[arg(long, default_value_t = batches::DEFAULT_SEED)]
    random_seed: u64,
    /// Batch to emit (1-based)
    #[arg(long, default_value_t = 1)]
    batch_no: usize,
    /// Emit every batch
    #[arg(long)]
    all_batches: bool,
    /// Emit at most this many batches
    #[arg(long)]
    max_batches: Option<usize>,
    /// Repeat leading batches to reach --max-batches
    #[arg(long)]
    pad_batches: bool,
    /// Compare against the source rather than the reference
    #[arg(long)]
    source_based: bool,
    /// Evaluate every system on every selected segment
    #[arg(long)]
    full_coverage: bool,
    /// Number segments instead of reading `.ids` files
    #[arg(long)]
    create_ids: bool,
    /// Read per-system `.src` files
    #[arg(long)]
    local_src: bool,
    /// Read per-system `.ref` files
    #[arg(long)]
    local_ref: bool,
    /// Replace empty lines instead of failing
    #[arg(long)]
    ignore_empty: bool,
    /// File with one image URL per segment
    #[arg(long)]
    image_urls: Option<PathBuf>,
    /// Splice bad references by character, not by token
    #[arg(long)]
    character_based: bool,
    /// Verbosity
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn process(args: &Args) -> Result<()> {
    let mut builder = BuilderArgs::new(&args.source_language, &args.target_language);
    builder.batch_size = args.batch_size;
    builder.block_size = args.block_size;
    builder.block_definition = if args.no_redundancy {
        BlockDefinition::without_redundancy(args.block_size)
    } else {
        args.block_definition.parse()?
    };
    builder.required_annotations = args.required_annotations;
    builder.random_seed = args.random_seed;
    builder.batch_no = args.batch_no;
    builder.all_batches = args.all_batches;
    builder.max_batches = args.max_batches;
    builder.pad_batches = args.pad_batches;
    builder.source_based = args.source_based;
    builder.full_coverage = args.full_coverage;
    builder.character_based =
        args.character_based || languages::is_character_based(&args.target_language);

    let files = CorpusFiles {
        source_file: args.source_file.clone(),
        reference_files: args.reference_file.clone(),
        systems_path: args.systems_path.clone(),
        local_src: args.local_src,
        local_ref: args.local_ref,
        create_ids: args.create_ids,
        ignore_empty: args.ignore_empty,
        image_urls: args.image_urls.clone(),
    };
    let corpus = Corpus::load(&files)?;
    let built = batches::build(&builder, &corpus)?;
    info!(
        target: "humeval",
        "{} candidates, {} batches available",
        built.segments.len(),
        built.total_batches
    );
    batches::write(&args.outfile, &built)?;
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
            error!(target: "humeval", "{e}");
            process::exit(1);
        }
    }
}
