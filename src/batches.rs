//! Batch builder: turns system outputs into tasks with embedded quality control.
//!
//! Identical (translation, source, reference) triples from different systems
//! are collapsed into one candidate whose target id lists all systems joined
//! by `+`. Candidates are dealt into blocks; every block also receives a
//! repeated candidate (CHK), a reference (REF) and a bad reference (BAD), all
//! drawn from the block half a batch away.

use crate::badref::BadRefGenerator;
use crate::batchfile::{BatchItem, BatchTask, TaskHeader};
use crate::errors::{self, Result};
use crate::hashing;
use crate::languages;
use crate::model::ItemType;
use crate::shuffle;
use itertools::Itertools;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{fmt, fs, io};

pub const DEFAULT_SEED: u64 = 123456;
pub const DEFAULT_BLOCK_SIZE: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Replacement for empty input lines when they are tolerated.
pub const EMPTY_LINE: &str = "EMPTY_LINE";

/// Composition of one block: candidates, repeated candidates, references and
/// bad references.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDefinition {
    pub candidates: usize,
    pub redundant: usize,
    pub reference: usize,
    pub bad: usize,
}

impl Default for BlockDefinition {
    fn default() -> Self {
        BlockDefinition {
            candidates: 7,
            redundant: 1,
            reference: 1,
            bad: 1,
        }
    }
}

impl fmt::Display for BlockDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.candidates, self.redundant, self.reference, self.bad
        )
    }
}

impl FromStr for BlockDefinition {
    type Err = Box<dyn std::error::Error>;

    fn from_str(s: &str) -> Result<BlockDefinition> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(errors::invalid_argument(format!(
                "block definition '{s}' should look like 7:1:1:1"
            )));
        }
        let mut values = [0; 4];
        for (v, p) in values.iter_mut().zip(&parts) {
            *v = p.trim().parse().map_err(|_| {
                errors::invalid_argument(format!("block definition '{s}': '{p}' is not a number"))
            })?;
        }
        Ok(BlockDefinition {
            candidates: values[0],
            redundant: values[1],
            reference: values[2],
            bad: values[3],
        })
    }
}

impl BlockDefinition {
    /// Every slot holds a candidate.
    pub fn without_redundancy(block_size: usize) -> BlockDefinition {
        BlockDefinition {
            candidates: block_size,
            redundant: 0,
            reference: 0,
            bad: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.candidates + self.redundant + self.reference + self.bad
    }

    fn checks(&self) -> usize {
        self.redundant + self.reference + self.bad
    }

    pub fn validate(&self, block_size: usize) -> Result<()> {
        if self.size() != block_size {
            return Err(errors::invalid_argument(format!(
                "block definition {self} does not add up to block size {block_size}"
            )));
        }
        if 2 * self.candidates < block_size {
            return Err(errors::invalid_argument(format!(
                "block definition {self}: at least half of the block must be candidates"
            )));
        }
        if self.candidates < self.checks() {
            return Err(errors::invalid_argument(format!(
                "block definition {self}: not enough candidates to draw checks from"
            )));
        }
        Ok(())
    }
}

/// What to build.
#[derive(Clone, Debug)]
pub struct BuilderArgs {
    pub batch_size: usize,
    pub block_size: usize,
    pub block_definition: BlockDefinition,
    pub source_language: String,
    pub target_language: String,
    pub required_annotations: u32,
    pub random_seed: u64,
    /// Batch to emit (1-based) unless `all_batches` is set.
    pub batch_no: usize,
    pub max_batches: Option<usize>,
    pub all_batches: bool,
    /// With `all_batches`, repeat leading batches until `max_batches` are emitted.
    pub pad_batches: bool,
    /// Show the source instead of the reference as the text to compare against.
    pub source_based: bool,
    /// Evaluate every system on every selected segment.
    pub full_coverage: bool,
    pub character_based: bool,
}

impl BuilderArgs {
    pub fn new(source_language: &str, target_language: &str) -> BuilderArgs {
        BuilderArgs {
            batch_size: DEFAULT_BATCH_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            block_definition: BlockDefinition::default(),
            source_language: source_language.to_owned(),
            target_language: target_language.to_owned(),
            required_annotations: 1,
            random_seed: DEFAULT_SEED,
            batch_no: 1,
            max_batches: None,
            all_batches: false,
            pad_batches: false,
            source_based: false,
            full_coverage: false,
            character_based: false,
        }
    }

    fn validate(&self) -> Result<()> {
        for code in [&self.source_language, &self.target_language] {
            if !languages::is_valid(code) {
                return Err(errors::invalid_argument(format!(
                    "unknown language code '{code}'"
                )));
            }
        }
        if self.block_size == 0 || self.batch_size == 0 || self.batch_size % self.block_size != 0 {
            return Err(errors::invalid_argument(format!(
                "batch size {} is not divisible by block size {}",
                self.batch_size, self.block_size
            )));
        }
        self.block_definition.validate(self.block_size)
    }
}

/// Output of one system, aligned line by line with the source.
#[derive(Clone, Debug)]
pub struct SystemOutput {
    pub name: String,
    pub segments: Vec<String>,
    pub ids: Vec<u32>,
    pub sources: Option<Vec<String>>,
    pub references: Option<Vec<String>>,
}

/// Where to read the texts from.
#[derive(Clone, Debug, Default)]
pub struct CorpusFiles {
    pub source_file: Option<PathBuf>,
    /// The first one is the reference; further ones are evaluated as systems.
    pub reference_files: Vec<PathBuf>,
    pub systems_path: PathBuf,
    /// Read per-system `.src` files.
    pub local_src: bool,
    /// Read per-system `.ref` files.
    pub local_ref: bool,
    /// Number segments 1..N instead of reading `.ids` files.
    pub create_ids: bool,
    pub ignore_empty: bool,
    pub image_urls: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct Corpus {
    pub source_name: String,
    pub reference_name: String,
    pub sources: Vec<String>,
    pub references: Vec<String>,
    /// Sorted by name.
    pub systems: Vec<SystemOutput>,
    pub image_urls: Option<Vec<String>>,
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn with_extension(path: &Path, ext: &str) -> PathBuf {
    path.with_extension(ext)
}

/// Reads stripped lines; empty lines are an error unless `ignore_empty` is set.
pub fn read_lines(path: &Path, ignore_empty: bool) -> Result<Vec<String>> {
    let data = fs::read_to_string(path)
        .map_err(|e| errors::invalid_input(format!("cannot read {}: {e}", path.display())))?;
    let mut lines = Vec::new();
    for (i, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            if !ignore_empty {
                return Err(errors::invalid_input(format!(
                    "{}:{}: empty line",
                    path.display(),
                    i + 1
                )));
            }
            lines.push(EMPTY_LINE.to_owned());
        } else {
            lines.push(line.to_owned());
        }
    }
    Ok(lines)
}

fn read_ids(path: &Path) -> Result<Vec<u32>> {
    read_lines(path, false)?
        .iter()
        .enumerate()
        .map(|(i, line)| match line.parse::<u32>() {
            Ok(id) if id >= 1 => Ok(id),
            _ => Err(errors::invalid_input(format!(
                "{}:{}: '{line}' is not a segment id",
                path.display(),
                i + 1
            ))),
        })
        .collect()
}

fn expect_lines(name: &str, lines: &[String], n: usize) -> Result<()> {
    if lines.len() != n {
        return Err(errors::invalid_input(format!(
            "{name} has {} lines, expected {n}",
            lines.len()
        )));
    }
    Ok(())
}

impl Corpus {
    pub fn load(files: &CorpusFiles) -> Result<Corpus> {
        let sources = match &files.source_file {
            Some(path) if !files.local_src => read_lines(path, files.ignore_empty)?,
            None if !files.local_src => {
                return Err(errors::invalid_argument_ref(
                    "a source file is required without local .src files",
                ));
            }
            _ => Vec::new(),
        };
        let references = match files.reference_files.first() {
            Some(path) if !files.local_ref => read_lines(path, files.ignore_empty)?,
            None if !files.local_ref => {
                return Err(errors::invalid_argument_ref(
                    "a reference file is required without local .ref files",
                ));
            }
            _ => Vec::new(),
        };
        info!(target: "humeval", "loaded {} source and {} reference segments", sources.len(), references.len());
        if (files.local_src || files.local_ref) && files.reference_files.len() > 1 {
            return Err(errors::invalid_argument_ref(
                "extra reference files cannot be evaluated with local .src or .ref files",
            ));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&files.systems_path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "txt") {
                paths.push(path);
            }
        }
        paths.sort();
        let mut systems = Vec::new();
        for path in &paths {
            let name = basename(path);
            if name.contains('+') {
                return Err(errors::invalid_input(format!(
                    "system file name '{name}' contains '+', which separates system names"
                )));
            }
            let segments = read_lines(path, files.ignore_empty)?;
            let ids = if files.create_ids {
                (1..=segments.len() as u32).collect()
            } else {
                let ids = read_ids(&with_extension(path, "ids"))?;
                expect_lines(&format!("{name} ids"), &segments, ids.len())?;
                ids
            };
            let local = |enabled: bool, ext: &str| -> Result<Option<Vec<String>>> {
                if !enabled {
                    return Ok(None);
                }
                let lines = read_lines(&with_extension(path, ext), files.ignore_empty)?;
                expect_lines(&format!("{name} .{ext}"), &lines, segments.len())?;
                Ok(Some(lines))
            };
            let system = SystemOutput {
                sources: local(files.local_src, "src")?,
                references: local(files.local_ref, "ref")?,
                name,
                segments,
                ids,
            };
            debug!(target: "humeval", "loaded {} segments of {}", system.segments.len(), system.name);
            systems.push(system);
        }
        for path in files.reference_files.iter().skip(1) {
            let segments = read_lines(path, files.ignore_empty)?;
            systems.push(SystemOutput {
                name: basename(path),
                ids: (1..=segments.len() as u32).collect(),
                segments,
                sources: None,
                references: None,
            });
        }
        systems.sort_by(|a, b| a.name.cmp(&b.name));
        if systems.is_empty() {
            return Err(errors::invalid_input(format!(
                "no system outputs (*.txt) in {}",
                files.systems_path.display()
            )));
        }
        for system in &systems {
            if !files.local_src {
                expect_lines(&system.name, &system.segments, sources.len())?;
            }
            if !files.local_ref {
                expect_lines(&system.name, &system.segments, references.len())?;
            }
        }
        let image_urls = match &files.image_urls {
            Some(path) => Some(read_lines(path, files.ignore_empty)?),
            None => None,
        };
        Ok(Corpus {
            source_name: match &files.source_file {
                Some(path) if !files.local_src => basename(path),
                _ => "LOCAL_SRC".to_owned(),
            },
            reference_name: match files.reference_files.first() {
                Some(path) if !files.local_ref => basename(path),
                _ => "LOCAL_REF".to_owned(),
            },
            sources,
            references,
            systems,
            image_urls,
        })
    }
}

/// A deduplicated candidate translation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub segment_id: u32,
    pub segment_text: String,
    pub segment_bad: String,
    pub segment_ref: String,
    pub segment_src: String,
    pub systems: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Candidate {
    /// All contributing systems, sorted and joined by `+`.
    pub fn target_id(&self) -> String {
        self.systems.iter().sorted().dedup().join("+")
    }
}

/// Candidate keys of one block and the keys of its quality-control items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub candidates: Vec<String>,
    pub redundant: Vec<String>,
    pub reference: Vec<String>,
    pub bad: Vec<String>,
}

/// Block from which block `block` of `num_blocks` draws its checks.
pub fn check_block(block: usize, num_blocks: usize) -> usize {
    (block + num_blocks / 2) % num_blocks
}

/// Deals `keys` (exactly one batch worth of candidates) into blocks.
pub fn assemble_blocks(
    keys: &[String],
    definition: &BlockDefinition,
    num_blocks: usize,
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<Block> {
    let mut blocks: Vec<Block> = keys
        .chunks(definition.candidates)
        .take(num_blocks)
        .map(|chunk| Block {
            candidates: chunk.to_vec(),
            redundant: Vec::new(),
            reference: Vec::new(),
            bad: Vec::new(),
        })
        .collect();
    for b in 0..blocks.len() {
        let mut checks = blocks[check_block(b, num_blocks)].candidates.clone();
        checks.sort();
        checks.shuffle(rng);
        let mut checks = checks.into_iter();
        let block = &mut blocks[b];
        block.redundant = checks.by_ref().take(definition.redundant).collect();
        block.reference = checks.by_ref().take(definition.reference).collect();
        block.bad = checks.by_ref().take(definition.bad).collect();
    }
    blocks
}

pub struct Batches {
    /// Deduplicated candidates by key.
    pub segments: BTreeMap<String, Candidate>,
    pub tasks: Vec<BatchTask>,
    pub total_batches: usize,
}

/// Line `line` of a text that must be aligned with the output of `system`.
fn aligned<'a>(lines: &'a [String], line: usize, system: &str, what: &str) -> Result<&'a String> {
    lines.get(line).ok_or_else(|| {
        errors::invalid_input(format!("{system}: no {what} for line {}", line + 1))
    })
}

fn collect_candidates(
    args: &BuilderArgs,
    corpus: &Corpus,
    rng: &mut Xoshiro256PlusPlus,
) -> Result<(BTreeMap<String, Candidate>, BTreeMap<u32, Vec<String>>)> {
    let character_based =
        args.character_based || languages::is_character_based(&args.target_language);
    let mut order: Vec<usize> = (0..corpus.systems.len()).collect();
    order.shuffle(rng);
    let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
    let mut by_segment: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for &s in &order {
        let system = &corpus.systems[s];
        let sources = system.sources.as_ref().unwrap_or(&corpus.sources);
        let references = system.references.as_ref().unwrap_or(&corpus.references);
        let generator = BadRefGenerator::new(references, character_based);
        for (line, text) in system.segments.iter().enumerate() {
            let src = aligned(sources, line, &system.name, "source")?;
            let reference = aligned(references, line, &system.name, "reference")?;
            let key = hashing::md5_hex(&[text, src, reference]);
            if let Some(c) = candidates.get_mut(&key) {
                c.systems.push(system.name.clone());
                continue;
            }
            let segment_id = system.ids[line];
            let candidate = Candidate {
                segment_id,
                segment_text: text.clone(),
                segment_bad: generator.generate(text, line, rng)?,
                segment_ref: reference.clone(),
                segment_src: src.clone(),
                systems: vec![system.name.clone()],
                image_url: corpus
                    .image_urls
                    .as_ref()
                    .and_then(|urls| urls.get(line).cloned()),
            };
            by_segment.entry(segment_id).or_default().push(key.clone());
            candidates.insert(key, candidate);
        }
        info!(target: "humeval", "loaded {} segments of {}", system.segments.len(), system.name);
    }
    Ok((candidates, by_segment))
}

fn batch_items(
    args: &BuilderArgs,
    corpus: &Corpus,
    candidates: &BTreeMap<String, Candidate>,
    blocks: &[Block],
    batch_id: usize,
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<BatchItem> {
    let source_id = if args.source_based {
        &corpus.source_name
    } else {
        &corpus.reference_name
    };
    let mut items = Vec::with_capacity(args.batch_size);
    for (b, block) in blocks.iter().enumerate() {
        let mut slots: Vec<(&String, ItemType)> = Vec::with_capacity(args.block_size);
        slots.extend(block.candidates.iter().map(|k| (k, ItemType::Tgt)));
        slots.extend(block.redundant.iter().map(|k| (k, ItemType::Chk)));
        slots.extend(block.reference.iter().map(|k| (k, ItemType::Ref)));
        slots.extend(block.bad.iter().map(|k| (k, ItemType::Bad)));
        slots.shuffle(rng);
        for (key, item_type) in slots {
            let c = &candidates[key];
            let source_text = if args.source_based {
                &c.segment_src
            } else {
                &c.segment_ref
            };
            let (target_id, target_text) = match item_type {
                ItemType::Ref => (corpus.reference_name.clone(), &c.segment_ref),
                ItemType::Bad => (c.target_id(), &c.segment_bad),
                _ => (c.target_id(), &c.segment_text),
            };
            let mut item = BatchItem::text_pair(
                source_id,
                source_text,
                &target_id,
                target_text,
                c.segment_id,
                item_type,
            );
            item.item = items.len();
            item.block = b + blocks.len() * batch_id;
            item.image_url = c.image_url.clone();
            items.push(item);
        }
    }
    items
}

/// Builds the batches selected by `args`.
pub fn build(args: &BuilderArgs, corpus: &Corpus) -> Result<Batches> {
    args.validate()?;
    let definition = &args.block_definition;
    let num_blocks = args.batch_size / args.block_size;
    info!(target: "humeval", "{num_blocks} blocks of {} ({definition}) per batch", args.block_size);
    let mut rng = shuffle::seeded(args.random_seed);

    let (candidates, by_segment) = collect_candidates(args, corpus, &mut rng)?;
    let mut keys: Vec<String> = candidates.keys().cloned().collect();
    keys.shuffle(&mut rng);
    if args.full_coverage {
        let mut seen = HashSet::new();
        let mut covered = Vec::new();
        for key in &keys {
            if seen.contains(key) {
                continue;
            }
            let mut matching = by_segment[&candidates[key].segment_id].clone();
            matching.sort();
            for k in matching {
                if seen.insert(k.clone()) {
                    covered.push(k);
                }
            }
        }
        keys = covered;
    }
    if keys.is_empty() {
        return Err(errors::invalid_input_ref("no segments to build batches from"));
    }

    let per_batch = num_blocks * definition.candidates;
    if keys.len() < per_batch {
        return Err(errors::invalid_input(format!(
            "{} distinct candidates cannot fill a batch of {per_batch} without repeats",
            keys.len()
        )));
    }
    let missing = (per_batch - keys.len() % per_batch) % per_batch;
    let padding: Vec<String> = keys.iter().cycle().take(missing).cloned().collect();
    keys.extend(padding);
    let total_batches = keys.len() / per_batch;
    info!(target: "humeval", "{} candidates, {missing} padded, {total_batches} batches", candidates.len());

    let mut batch_ids: Vec<usize> = if args.all_batches {
        let wanted = match args.max_batches {
            Some(max) if args.pad_batches => max.max(total_batches),
            _ => total_batches,
        };
        (0..wanted).collect()
    } else {
        if args.batch_no == 0 || args.batch_no > total_batches {
            return Err(errors::invalid_argument(format!(
                "batch number {} is not in 1..={total_batches}",
                args.batch_no
            )));
        }
        vec![args.batch_no - 1]
    };
    if let Some(max) = args.max_batches {
        batch_ids.truncate(max);
    }

    let mut tasks = Vec::with_capacity(batch_ids.len());
    for batch_id in batch_ids {
        let offset = (batch_id % total_batches) * per_batch;
        let blocks = assemble_blocks(
            &keys[offset..offset + per_batch],
            definition,
            num_blocks,
            &mut rng,
        );
        debug!(target: "humeval", "batch {}: {} blocks", batch_id + 1, blocks.len());
        let items = batch_items(args, corpus, &candidates, &blocks, batch_id, &mut rng);
        tasks.push(BatchTask {
            task: TaskHeader {
                batch_no: batch_id as u32 + 1,
                batch_size: args.batch_size,
                source_language: args.source_language.clone(),
                target_language: args.target_language.clone(),
                required_annotations: args.required_annotations,
                random_seed: Some(args.random_seed),
            },
            items,
        });
    }
    Ok(Batches {
        segments: candidates,
        tasks,
        total_batches,
    })
}

/// Writes the batch file and, next to it, the deduplicated segments as `<file>.segments`.
pub fn write(path: &Path, batches: &Batches) -> Result<()> {
    let file = fs::File::create(path)?;
    let writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &batches.tasks)?;
    let mut segments = path.as_os_str().to_owned();
    segments.push(".segments");
    let file = fs::File::create(&segments)?;
    let writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &batches.segments)?;
    info!(target: "humeval", "wrote {} tasks to {}", batches.tasks.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("k{i:03}")).collect()
    }

    #[test]
    fn block_definitions() {
        let d: BlockDefinition = "7:1:1:1".parse().unwrap();
        assert_eq!(d, BlockDefinition::default());
        assert!(d.validate(10).is_ok());
        assert!(d.validate(12).is_err());
        assert!("7:1:1".parse::<BlockDefinition>().is_err());
        assert!("7:x:1:1".parse::<BlockDefinition>().is_err());
        let few: BlockDefinition = "4:2:2:2".parse().unwrap();
        assert!(few.validate(10).is_err());
        assert!(BlockDefinition::without_redundancy(10).validate(10).is_ok());
    }

    #[test]
    fn checks_come_from_opposite_block() {
        let keys = keys(70);
        let mut rng = shuffle::seeded(DEFAULT_SEED);
        let blocks = assemble_blocks(&keys, &BlockDefinition::default(), 10, &mut rng);
        assert_eq!(blocks.len(), 10);
        for (b, block) in blocks.iter().enumerate() {
            assert_eq!(block.candidates.len(), 7);
            let source = &blocks[(b + 5) % 10].candidates;
            let checks = [&block.redundant, &block.reference, &block.bad];
            for check in checks {
                assert_eq!(check.len(), 1);
                assert!(source.contains(&check[0]));
            }
            let distinct: HashSet<&String> = checks.iter().map(|c| &c[0]).collect();
            assert_eq!(distinct.len(), 3);
        }
    }

    #[test]
    fn single_block_checks_itself() {
        assert_eq!(check_block(0, 1), 0);
        assert_eq!(check_block(3, 10), 8);
        assert_eq!(check_block(7, 10), 2);
        let keys = keys(7);
        let mut rng = shuffle::seeded(DEFAULT_SEED);
        let blocks = assemble_blocks(&keys, &BlockDefinition::default(), 1, &mut rng);
        assert!(blocks[0].candidates.contains(&blocks[0].bad[0]));
    }

    #[test]
    fn target_id_joins_systems() {
        let c = Candidate {
            segment_id: 1,
            segment_text: String::new(),
            segment_bad: String::new(),
            segment_ref: String::new(),
            segment_src: String::new(),
            systems: vec!["b.txt".to_owned(), "a.txt".to_owned(), "b.txt".to_owned()],
            image_url: None,
        };
        assert_eq!(c.target_id(), "a.txt+b.txt");
    }

    fn numbered(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{prefix} number {i} right here")).collect()
    }

    fn write_numbered(path: &Path, prefix: &str, n: usize) {
        fs::write(path, numbered(prefix, n).join("\n")).unwrap();
    }

    fn corpus(systems: &[&str], segments: usize) -> Corpus {
        Corpus {
            source_name: "src.txt".to_owned(),
            reference_name: "ref.txt".to_owned(),
            sources: numbered("source", segments),
            references: numbered("reference", segments),
            systems: systems
                .iter()
                .map(|name| SystemOutput {
                    name: name.to_string(),
                    segments: numbered(name, segments),
                    ids: (1..=segments as u32).collect(),
                    sources: None,
                    references: None,
                })
                .collect(),
            image_urls: None,
        }
    }

    #[test]
    fn every_block_has_its_probes() {
        let corpus = corpus(&["a.txt", "b.txt"], 40);
        let mut args = BuilderArgs::new("eng", "deu");
        args.all_batches = true;
        let batches = build(&args, &corpus).unwrap();
        assert_eq!(batches.total_batches, 2);
        for task in &batches.tasks {
            assert_eq!(task.items.len(), 100);
            let by_block = task.items.iter().into_group_map_by(|item| item.block);
            assert_eq!(by_block.len(), 10);
            for items in by_block.values() {
                let count = |t: ItemType| items.iter().filter(|i| i.item_type == t).count();
                assert_eq!(count(ItemType::Tgt), 7);
                assert_eq!(count(ItemType::Chk), 1);
                assert_eq!(count(ItemType::Ref), 1);
                assert_eq!(count(ItemType::Bad), 1);
                let texts: HashSet<&String> = items
                    .iter()
                    .filter(|i| i.item_type == ItemType::Tgt)
                    .map(|i| &i.target_text)
                    .collect();
                assert_eq!(texts.len(), 7);
            }
        }
    }

    #[test]
    fn batch_needs_enough_candidates() {
        let mut args = BuilderArgs::new("eng", "deu");
        args.batch_size = 10;
        assert!(build(&args, &corpus(&["a.txt"], 5)).is_err());
        args.all_batches = true;
        let batches = build(&args, &corpus(&["a.txt", "b.txt"], 5)).unwrap();
        assert_eq!(batches.total_batches, 2);
        for task in &batches.tasks {
            let texts: HashSet<&String> = task
                .items
                .iter()
                .filter(|i| i.item_type == ItemType::Tgt)
                .map(|i| &i.target_text)
                .collect();
            assert_eq!(texts.len(), 7);
        }
    }

    #[test]
    fn local_sources() {
        let dir = tempfile::tempdir().unwrap();
        let systems = dir.path().join("systems");
        fs::create_dir(&systems).unwrap();
        for name in ["a", "b", "c"] {
            write_numbered(&systems.join(format!("{name}.txt")), &format!("{name} says"), 10);
            write_numbered(&systems.join(format!("{name}.src")), &format!("{name} source"), 10);
        }
        let reference = dir.path().join("ref.txt");
        let second = dir.path().join("ref2.txt");
        write_numbered(&reference, "the reference", 10);
        write_numbered(&second, "another reference", 10);
        let mut files = CorpusFiles {
            reference_files: vec![reference, second],
            systems_path: systems.clone(),
            local_src: true,
            create_ids: true,
            ..Default::default()
        };
        let e = Corpus::load(&files).unwrap_err();
        assert!(e.downcast_ref::<errors::InvalidArgument>().is_some());

        files.reference_files.truncate(1);
        let corpus = Corpus::load(&files).unwrap();
        assert_eq!(corpus.source_name, "LOCAL_SRC");
        let mut args = BuilderArgs::new("eng", "deu");
        args.batch_size = 10;
        args.source_based = true;
        let batches = build(&args, &corpus).unwrap();
        assert_eq!(batches.segments.len(), 30);
        for c in batches.segments.values() {
            let system = c.systems[0].trim_end_matches(".txt");
            assert!(c.segment_src.starts_with(&format!("{system} source")));
        }

        write_numbered(&systems.join("b.src"), "b source", 9);
        assert!(Corpus::load(&files).is_err());
    }

    #[test]
    fn invalid_arguments() {
        let corpus = Corpus {
            source_name: "src".to_owned(),
            reference_name: "ref".to_owned(),
            sources: vec![],
            references: vec![],
            systems: vec![],
            image_urls: None,
        };
        let mut args = BuilderArgs::new("eng", "deu");
        args.batch_size = 95;
        assert!(build(&args, &corpus).is_err());
        let args = BuilderArgs::new("eng", "xx");
        assert!(build(&args, &corpus).is_err());
    }
}
