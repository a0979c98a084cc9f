use humeval::agenda::{self, Severity};
use humeval::batches::{self, BuilderArgs, Corpus, CorpusFiles};
use humeval::campaign::{self, Manifest, PairAssignment};
use humeval::dispatch::{self, Submission};
use humeval::ingest::{self, ImportOptions};
use humeval::model::{Id, Item, ItemType, TaskKind};
use humeval::records::{self, ExtractOptions};
use humeval::reliability::{self, QcSettings};
use humeval::scoring::{self, ScoringSettings};
use humeval::store::{SharedStore, Store};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const SYSTEMS: [&str; 3] = ["a", "b", "c"];
const SECRET: &str = "not-so-secret";

fn init() {
    let _ = pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

fn write_lines(path: &Path, lines: &[String]) {
    fs::write(path, lines.join("\n") + "\n").unwrap();
}

/// Three systems translating `segments` segments, plus source and reference.
fn corpus_files(dir: &Path, segments: usize) -> CorpusFiles {
    let systems = dir.join("systems");
    fs::create_dir(&systems).unwrap();
    let line = |prefix: &str, i: usize| format!("{prefix} number {i} walks over the quiet green hill");
    let sources: Vec<String> = (1..=segments).map(|i| line("source", i)).collect();
    let references: Vec<String> = (1..=segments).map(|i| line("reference", i)).collect();
    write_lines(&dir.join("src.txt"), &sources);
    write_lines(&dir.join("ref.txt"), &references);
    for s in SYSTEMS {
        let outputs: Vec<String> = (1..=segments).map(|i| line(s, i)).collect();
        write_lines(&systems.join(format!("{s}.txt")), &outputs);
    }
    CorpusFiles {
        source_file: Some(dir.join("src.txt")),
        reference_files: vec![dir.join("ref.txt")],
        systems_path: systems,
        create_ids: true,
        ..CorpusFiles::default()
    }
}

fn manifest(annotators: usize, tasks: usize) -> Manifest {
    Manifest {
        campaign_key: "key".to_owned(),
        campaign_name: "wmt-it".to_owned(),
        campaign_no: 1,
        campaign_url: "http://localhost/sso/".to_owned(),
        redundancy: 1,
        task_type: "Direct".to_owned(),
        tasks_to_annotators: vec![PairAssignment {
            source: "eng".to_owned(),
            target: "deu".to_owned(),
            mode: "uniform".to_owned(),
            annotators,
            tasks,
        }],
    }
}

/// An attentive annotator: systems a > b > c, bad references far below.
fn score_for(item: &Item) -> f64 {
    let jitter = (item.item_id % 5) as f64;
    match item.item_type {
        ItemType::Bad => 5.0 + jitter,
        ItemType::Ref => 95.0,
        _ => match item.content.target_ids().first().copied() {
            Some("a.txt") => 90.0 + jitter,
            Some("b.txt") => 60.0 + jitter,
            _ => 30.0 + jitter,
        },
    }
}

/// Claims a task for the user and scores every item of it.
fn annotate(shared: &SharedStore, campaign: Id, user: &str) -> Id {
    let task = dispatch::claim_next_free_task(shared, "deu", campaign, user)
        .unwrap()
        .unwrap();
    let mut clock = 1_700_000_000.0;
    loop {
        let store = shared.snapshot().unwrap();
        let Some(item) = dispatch::next_item_for_user(&store, task, user).unwrap() else {
            break;
        };
        let s = Submission {
            task,
            item: item.id,
            score: score_for(item),
            score2: None,
            start_time: clock,
            end_time: clock + 8.0,
        };
        dispatch::submit_result(shared, user, &s).unwrap();
        clock += 10.0;
    }
    task
}

fn build_two_batches(dir: &Path) -> PathBuf {
    let corpus = Corpus::load(&corpus_files(dir, 40)).unwrap();
    let mut args = BuilderArgs::new("eng", "deu");
    args.all_batches = true;
    let built = batches::build(&args, &corpus).unwrap();
    assert_eq!(built.total_batches, 2);
    assert_eq!(built.segments.len(), 120);
    let path = dir.join("batches.json");
    batches::write(&path, &built).unwrap();
    path
}

#[test]
fn batches_are_deterministic() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let corpus = Corpus::load(&corpus_files(dir.path(), 40)).unwrap();
    let mut args = BuilderArgs::new("eng", "deu");
    args.all_batches = true;
    let a = dir.path().join("a.json");
    let b = dir.path().join("b.json");
    batches::write(&a, &batches::build(&args, &corpus).unwrap()).unwrap();
    batches::write(&b, &batches::build(&args, &corpus).unwrap()).unwrap();
    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    assert!(dir.path().join("a.json.segments").exists());
    args.random_seed += 1;
    let c = dir.path().join("c.json");
    batches::write(&c, &batches::build(&args, &corpus).unwrap()).unwrap();
    assert_ne!(fs::read(&a).unwrap(), fs::read(&c).unwrap());
}

#[test]
fn single_block_batch() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let corpus = Corpus::load(&corpus_files(dir.path(), 10)).unwrap();
    let mut args = BuilderArgs::new("eng", "deu");
    args.batch_size = 10;
    let built = batches::build(&args, &corpus).unwrap();
    assert_eq!(built.tasks.len(), 1);
    let items = &built.tasks[0].items;
    assert_eq!(items.len(), 10);
    let count = |t: ItemType| items.iter().filter(|i| i.item_type == t).count();
    assert_eq!(count(ItemType::Tgt), 7);
    assert_eq!(count(ItemType::Chk), 1);
    assert_eq!(count(ItemType::Ref), 1);
    assert_eq!(count(ItemType::Bad), 1);
    let candidates: BTreeSet<u32> = items
        .iter()
        .filter(|i| i.item_type == ItemType::Tgt)
        .map(|i| i.item_id)
        .collect();
    for i in items.iter().filter(|i| i.item_type != ItemType::Tgt) {
        assert!(candidates.contains(&i.item_id));
        assert_eq!(i.block, 0);
    }
    let reference = items.iter().find(|i| i.item_type == ItemType::Ref).unwrap();
    assert_eq!(reference.target_id, "ref.txt");
    assert!(reference.target_text.starts_with("reference number"));
}

#[test]
fn campaign_agendas_cover_tasks() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = build_two_batches(dir.path());
    let data: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let template = data[0].clone();
    let tasks: Vec<serde_json::Value> = (1..=20)
        .map(|n| {
            let mut t = template.clone();
            t["task"]["batchNo"] = n.into();
            t
        })
        .collect();
    let many = dir.path().join("many.json");
    fs::write(&many, serde_json::to_string(&tasks).unwrap()).unwrap();

    let mut store = Store::new();
    let m = manifest(10, 20);
    let campaign = campaign::create_campaign(&mut store, &m, "admin").unwrap();
    let report = ingest::import_batch(&mut store, campaign, TaskKind::Direct, &many, &ImportOptions::default()).unwrap();
    assert_eq!(report.tasks.len(), 20);
    assert_eq!(ingest::activate_batch(&mut store, report.batch, "admin").unwrap(), 20);
    let init = campaign::init_campaign(&mut store, &m, "admin", true).unwrap();
    assert_eq!(init.users_created, 10);
    assert_eq!(init.opened, 20);
    assert_eq!(init.credentials, campaign::credentials(&m));

    let mut coverage: BTreeMap<Id, usize> = BTreeMap::new();
    for c in &init.credentials {
        let agenda = store.agenda(&c.username, campaign).unwrap();
        assert_eq!(agenda.open.len(), 2);
        for oid in &agenda.open {
            *coverage.entry(oid.id).or_default() += 1;
        }
    }
    assert_eq!(coverage.len(), 20);
    assert!(coverage.values().all(|&n| n == 1));

    let again = campaign::init_campaign(&mut store, &m, "admin", true).unwrap();
    assert_eq!((again.users_created, again.opened), (0, 0));
    assert!(campaign::create_campaign(&mut store, &m, "admin").is_err());
}

#[test]
fn zip_batches() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = build_two_batches(dir.path());
    let archive = dir.path().join("batches.zip");
    let file = fs::File::create(&archive).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("batches.json", options).unwrap();
    zip.write_all(&fs::read(&path).unwrap()).unwrap();
    zip.start_file("README.txt", options).unwrap();
    zip.write_all(b"not a batch").unwrap();
    zip.finish().unwrap();

    let (tasks, skipped) = ingest::read_batch_file(&archive).unwrap();
    assert_eq!((tasks.len(), skipped), (2, 0));
    let mut store = Store::new();
    let campaign = campaign::create_campaign(&mut store, &manifest(2, 2), "admin").unwrap();
    let options = ImportOptions {
        max_count: Some(1),
        ..ImportOptions::default()
    };
    let report = ingest::import_batch(&mut store, campaign, TaskKind::Direct, &archive, &options).unwrap();
    assert_eq!((report.tasks.len(), report.items), (1, 100));
    assert!(ingest::read_batch_file(&path.with_file_name("missing.zip")).is_err());
}

#[test]
fn full_campaign() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = build_two_batches(dir.path());
    let m = manifest(2, 2);
    let mut store = Store::new();
    let campaign = campaign::create_campaign(&mut store, &m, "admin").unwrap();
    let report = ingest::import_batch(&mut store, campaign, TaskKind::Direct, &path, &ImportOptions::default()).unwrap();
    ingest::activate_batch(&mut store, report.batch, "admin").unwrap();
    let init = campaign::init_campaign(&mut store, &m, "admin", true).unwrap();
    let users: Vec<String> = init.credentials.iter().map(|c| c.username.clone()).collect();
    assert_eq!(users, vec!["engdeu0101", "engdeu0102"]);

    let shared = SharedStore::new(store);
    let first = annotate(&shared, campaign, &users[0]);
    let second = annotate(&shared, campaign, &users[1]);
    assert_ne!(first, second);
    let store_path = dir.path().join("store.json");
    shared.snapshot().unwrap().save(&store_path).unwrap();
    let mut store = Store::load(&store_path).unwrap();

    for (user, task) in users.iter().zip([first, second]) {
        assert!(store.task(task).unwrap().meta.is_completed());
        let agenda = store.agenda(user, campaign).unwrap();
        assert!(agenda.open.is_empty());
        assert_eq!(agenda.completed.len(), 1);
        let status = dispatch::hit_status(&store, user, campaign);
        assert_eq!(status.results, 100);
        assert_eq!(status.seconds, 800.0);
        let token = reliability::completion_token(&store, campaign, user, SECRET, None).unwrap();
        assert_eq!(token, Some(campaign::confirmation_token(SECRET, user, true)));
    }
    assert!(dispatch::claim_next_free_task(&SharedStore::new(store.clone()), "deu", campaign, "late").unwrap().is_none());

    // Results export and re-import.
    let csv = dir.path().join("results.csv");
    let extended = ExtractOptions {
        extended: true,
        ..ExtractOptions::default()
    };
    let exported = records::extract(&store, campaign, &extended).unwrap();
    assert_eq!(exported.len(), 200);
    records::write_csv_file(&csv, &exported).unwrap();
    assert_eq!(records::read_csv_file(&csv).unwrap(), exported);

    let assessments = reliability::assess(&exported, &QcSettings::default());
    assert_eq!(assessments.len(), 2);
    for a in &assessments {
        assert_eq!(a.bad_pairs, 10);
        assert_eq!(a.chk_pairs, 10);
        assert!(a.p_bad < 0.01);
        assert!(a.p_chk > 0.05);
    }

    let scored = records::extract(&store, campaign, &ExtractOptions::default()).unwrap();
    assert!(scored.iter().all(|r| matches!(r.item_type, ItemType::Tgt | ItemType::Chk)));
    let boards = scoring::leaderboards(&scored, &ScoringSettings::default());
    assert_eq!(boards.len(), 1);
    let board = &boards[0];
    assert_eq!(board.pair, "en-de");
    let names: Vec<&str> = board.systems.iter().map(|s| s.system.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    let ranks: Vec<&str> = board.systems.iter().map(|s| s.rank.as_str()).collect();
    assert_eq!(ranks, vec!["1", "2", "3"]);
    assert_eq!(board.boundaries(), vec![0, 1]);
    assert!(board.systems.iter().all(|s| s.segments == 40));

    // Archive the first annotator's work.
    let outcome = agenda::reset_taskagenda(&mut store, &users[0], campaign);
    assert!(outcome.ok, "{}", outcome.message);
    assert_eq!(outcome.severity, Severity::Info);
    let shadow = format!("{}-01", users[0]);
    assert!(!store.user(&shadow).unwrap().active);
    assert_eq!(store.results_by_user(&shadow).count(), 100);
    assert_eq!(store.results_by_user(&users[0]).count(), 0);
    let agenda = store.agenda(&users[0], campaign).unwrap();
    assert!(agenda.completed.is_empty());
    assert_eq!(agenda.open.len(), 1);
    let nothing = agenda::reset_taskagenda(&mut store, &users[0], campaign);
    assert_eq!((nothing.ok, nothing.severity), (false, Severity::Info));

    let active_only = records::extract(&store, campaign, &ExtractOptions::default()).unwrap();
    assert!(active_only.iter().all(|r| r.user == users[1]));
    let everyone = ExtractOptions {
        include_inactive: true,
        ..ExtractOptions::default()
    };
    assert_eq!(records::extract(&store, campaign, &everyone).unwrap().len(), scored.len());
}
