use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cliclack::log;
use humeval::languages;
use humeval::records::{self, ScoreRecord};
use itertools::Itertools;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Restrict a results CSV before scoring
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Input file (CSV)
    infile: PathBuf,
    /// Output file (CSV)
    outfile: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum How {
    Remove,
    Keep,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum What {
    Users,
    Systems,
    Pairs,
}

impl What {
    fn key(self, r: &ScoreRecord) -> String {
        match self {
            What::Users => r.user.clone(),
            What::Systems => r.system.clone(),
            What::Pairs => languages::pair_label(&r.source, &r.target),
        }
    }

    fn name(self) -> &'static str {
        match self {
            What::Users => "user",
            What::Systems => "system",
            What::Pairs => "language pair",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
enum Action {
    Undo,
    Restrict(How, What),
    Save,
    Quit,
}

struct Restriction {
    how: How,
    what: What,
    values: Vec<String>,
}

impl Restriction {
    fn admits(&self, r: &ScoreRecord) -> bool {
        let m = self.values.contains(&self.what.key(r));
        match self.how {
            How::Keep => m,
            How::Remove => !m,
        }
    }
}

fn select_values(what: What, records: &[ScoreRecord]) -> Result<Option<Vec<String>>> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for r in records {
        *counts.entry(what.key(r)).or_default() += 1;
    }
    let n = records.len();
    let mut items = vec![];
    for (val, &count) in counts.iter().sorted() {
        items.push((val.clone(), format!("{val} ({count}/{n} scores)"), ""));
    }
    let choices = cliclack::multiselect(format!("Select which {} values (or none to go back)?", what.name()))
        .items(&items)
        .required(false)
        .interact()?;
    if choices.is_empty() {
        Ok(None)
    } else {
        Ok(Some(choices))
    }
}

fn summarize(records: &[ScoreRecord]) -> String {
    let users = records.iter().map(|r| &r.user).unique().count();
    let systems = records.iter().map(|r| &r.system).unique().count();
    format!("{} scores by {users} users of {systems} systems", records.len())
}

fn main() -> Result<()> {
    let args = Args::parse();
    cliclack::intro("humeval-filter")?;
    log::info(format!("Reading {}...", args.infile.display()))?;
    let input = records::read_csv_file(&args.infile)
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("cannot read {}", args.infile.display()))?;
    let mut restrictions: Vec<Restriction> = vec![];
    loop {
        let mut current = input.clone();
        let mut stack = vec![];
        let options = textwrap::Options::new(70).subsequent_indent(" ");
        stack.push(format!("{} ← input", summarize(&current)));
        for r in &restrictions {
            current.retain(|x| r.admits(x));
            let line = format!(
                "{} ← {} scores where {} is {}",
                summarize(&current),
                match r.how {
                    How::Keep => "keep",
                    How::Remove => "remove",
                },
                r.what.name(),
                r.values.iter().map(|x| format!("'{x}'")).join(" or "),
            );
            stack.push(textwrap::fill(&line, &options));
        }

        cliclack::note("Restrictions", stack.join("\n"))?;

        let mut items = vec![];
        if !restrictions.is_empty() {
            items.push((Action::Undo, "Remove last restriction".to_owned(), ""));
        }
        for what in [What::Users, What::Systems, What::Pairs] {
            for how in [How::Remove, How::Keep] {
                let verb = match how {
                    How::Remove => "remove",
                    How::Keep => "keep",
                };
                items.push((
                    Action::Restrict(how, what),
                    format!("Select which {}s to {verb}", what.name()),
                    "",
                ));
            }
        }
        items.push((
            Action::Save,
            "Write current restrictions to the output file".to_owned(),
            "",
        ));
        items.push((Action::Quit, "Quit".to_owned(), ""));
        let choice = cliclack::select("Action?").items(&items).interact()?;
        match choice {
            Action::Quit => break,
            Action::Undo => {
                restrictions.pop();
            }
            Action::Save => {
                let filename: String = cliclack::input("file name")
                    .default_input(&args.outfile)
                    .interact()?;
                records::write_csv_file(Path::new(&filename), &current)
                    .map_err(|e| anyhow!("{e}"))
                    .with_context(|| format!("cannot write {filename}"))?;
                log::info(format!("Wrote to {}", filename))?;
            }
            Action::Restrict(how, what) => {
                if let Some(values) = select_values(what, &current)? {
                    restrictions.push(Restriction { how, what, values });
                }
            }
        }
    }
    cliclack::outro("Bye!")?;
    Ok(())
}
