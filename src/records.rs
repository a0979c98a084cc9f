//! Flat score records, extracted from a campaign or read from a results CSV.
//!
//! Results CSV files have no header. The columns are
//! `user,system,segment,type,src,tgt,score` followed by optional groups whose
//! presence is inferred from the column count:
//!
//! | columns | extra fields                          |
//! |---------|---------------------------------------|
//! | 7       | none                                  |
//! | 8       | rank                                  |
//! | 9       | start, end                            |
//! | 10      | rank, start, end                      |
//! | 11      | start, end, batch, item               |
//! | 12      | rank, start, end, batch, item         |

use crate::errors::{self, Result};
use crate::model::{Id, ItemContent, ItemType};
use crate::store::Store;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ScoreRecord {
    pub user: String,
    pub system: String,
    /// Segment number, or `segment:document` for document-level tasks.
    pub segment: String,
    pub item_type: ItemType,
    pub source: String,
    pub target: String,
    pub score: f64,
    pub rank: Option<f64>,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub batch: Option<u32>,
    pub item: Option<Id>,
}

impl ScoreRecord {
    pub fn duration(&self) -> Option<f64> {
        Some(self.end? - self.start?)
    }
}

/// System names that contain `+` although they are a single system.
const JOINED_NAMES: [(&str, &str); 2] = [("Transformer+R2L", "Transformer_R2L"), ("R2L+Back", "R2L_Back")];

pub fn fix_system_id(id: &str) -> String {
    JOINED_NAMES
        .iter()
        .fold(id.to_owned(), |s, (from, to)| s.replace(from, to))
}

/// Splits a multi-system id such as `a+b` into its systems.
pub fn split_systems(id: &str) -> Vec<String> {
    fix_system_id(id).split('+').map(str::to_owned).collect()
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractOptions {
    /// Also export REF and BAD items.
    pub extended: bool,
    /// One record per system of a multi-system id.
    pub expand_systems: bool,
    /// Include results of inactive (archived) accounts.
    pub include_inactive: bool,
    /// Only results of completed tasks.
    pub completed_only: bool,
}

fn segment_key(item_id: u32, content: &ItemContent, document_level: bool) -> String {
    match content.document_id() {
        Some(doc) if document_level => format!("{item_id}:{doc}"),
        _ => item_id.to_string(),
    }
}

/// Score records of every completed result of a campaign.
pub fn extract(store: &Store, campaign: Id, options: &ExtractOptions) -> Result<Vec<ScoreRecord>> {
    let kind = store.campaign_type(campaign)?;
    let mut records = Vec::new();
    for r in store.results.values() {
        let task = store.task(r.task)?;
        if task.campaign != campaign || !r.meta.is_completed() {
            continue;
        }
        if options.completed_only && !task.meta.is_completed() {
            continue;
        }
        if !options.include_inactive && store.users.get(&r.created_by).is_some_and(|u| !u.active) {
            continue;
        }
        let item = store.item(r.item)?;
        let wanted = match item.item_type {
            ItemType::Tgt | ItemType::Chk => true,
            ItemType::Ref | ItemType::Bad => options.extended,
            ItemType::Src => false,
        };
        if !wanted {
            continue;
        }
        let market = store.task_market(task)?;
        let segment = segment_key(item.item_id, &item.content, kind.document_level());
        let scores = [Some(r.score), r.score2];
        for (target_id, score) in item.content.target_ids().into_iter().zip(scores) {
            let Some(score) = score else { continue };
            let systems = if options.expand_systems {
                split_systems(target_id)
            } else {
                vec![fix_system_id(target_id)]
            };
            for system in systems {
                records.push(ScoreRecord {
                    user: r.created_by.clone(),
                    system,
                    segment: segment.clone(),
                    item_type: item.item_type,
                    source: market.source_language.clone(),
                    target: market.target_language.clone(),
                    score,
                    rank: None,
                    start: Some(r.start_time),
                    end: Some(r.end_time),
                    batch: Some(task.batch_no),
                    item: Some(item.id),
                });
            }
        }
    }
    info!(target: "humeval", "extracted {} score records from campaign {campaign}", records.len());
    Ok(records)
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Splits one CSV line, honouring double-quoted fields.
pub fn split_csv_line(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if quoted {
        return Err(errors::invalid_input_ref("unterminated quoted field"));
    }
    fields.push(field);
    Ok(fields)
}

fn number<T: std::str::FromStr>(field: &str, what: &str) -> Result<T> {
    field
        .trim()
        .parse()
        .map_err(|_| errors::invalid_input(format!("{what} '{field}' is not a number")))
}

fn parse_record(fields: &[String]) -> Result<ScoreRecord> {
    let (rank, times, batch) = match fields.len() {
        7 => (None, None, None),
        8 => (Some(7), None, None),
        9 => (None, Some(7), None),
        10 => (Some(7), Some(8), None),
        11 => (None, Some(7), Some(9)),
        12 => (Some(7), Some(8), Some(10)),
        n => {
            return Err(errors::invalid_input(format!("{n} columns, expected 7 to 12")));
        }
    };
    let opt = |at: Option<usize>, offset: usize, what: &str| -> Result<Option<f64>> {
        at.map(|i| number(&fields[i + offset], what)).transpose()
    };
    Ok(ScoreRecord {
        user: fields[0].clone(),
        system: fields[1].clone(),
        segment: fields[2].clone(),
        item_type: fields[3].parse()?,
        source: fields[4].clone(),
        target: fields[5].clone(),
        score: number(&fields[6], "score")?,
        rank: opt(rank, 0, "rank")?,
        start: opt(times, 0, "start time")?,
        end: opt(times, 1, "end time")?,
        batch: batch.map(|i| number(&fields[i], "batch")).transpose()?,
        item: batch.map(|i| number(&fields[i + 1], "item")).transpose()?,
    })
}

pub fn read_csv<R: BufRead>(reader: R) -> Result<Vec<ScoreRecord>> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let record = split_csv_line(line)
            .and_then(|fields| parse_record(&fields))
            .map_err(|e| errors::invalid_input(format!("line {}: {e}", i + 1)))?;
        records.push(record);
    }
    debug!(target: "humeval", "read {} score records", records.len());
    Ok(records)
}

pub fn read_csv_file(path: &Path) -> Result<Vec<ScoreRecord>> {
    info!(target: "humeval", "read results: {}", path.display());
    let file = fs::File::open(path)?;
    read_csv(io::BufReader::new(file))
        .map_err(|e| errors::invalid_input(format!("{}: {e}", path.display())))
}

/// Writes records with every optional column group that all records have.
pub fn write_csv<W: Write>(mut writer: W, records: &[ScoreRecord]) -> Result<()> {
    let all = |f: fn(&ScoreRecord) -> bool| !records.is_empty() && records.iter().all(f);
    let has_rank = all(|r| r.rank.is_some());
    let has_times = all(|r| r.start.is_some() && r.end.is_some());
    let has_batch = has_times && all(|r| r.batch.is_some() && r.item.is_some());
    for r in records {
        let mut fields = vec![
            quote(&r.user),
            quote(&r.system),
            quote(&r.segment),
            r.item_type.to_string(),
            quote(&r.source),
            quote(&r.target),
            r.score.to_string(),
        ];
        let text = |x: Option<f64>| x.map(|x| x.to_string()).unwrap_or_default();
        if has_rank {
            fields.push(text(r.rank));
        }
        if has_times {
            fields.push(text(r.start));
            fields.push(text(r.end));
        }
        if has_batch {
            fields.push(r.batch.map(|b| b.to_string()).unwrap_or_default());
            fields.push(r.item.map(|b| b.to_string()).unwrap_or_default());
        }
        writeln!(writer, "{}", fields.join(","))?;
    }
    Ok(())
}

pub fn write_csv_file(path: &Path, records: &[ScoreRecord]) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    write_csv(&mut writer, records)?;
    writer.flush()?;
    info!(target: "humeval", "wrote {} score records to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(user: &str, system: &str, score: f64) -> ScoreRecord {
        ScoreRecord {
            user: user.to_owned(),
            system: system.to_owned(),
            segment: "12".to_owned(),
            item_type: ItemType::Tgt,
            source: "eng".to_owned(),
            target: "deu".to_owned(),
            score,
            rank: None,
            start: Some(1_600_000_000.5),
            end: Some(1_600_000_012.25),
            batch: Some(3),
            item: Some(77),
        }
    }

    #[test]
    fn system_ids() {
        assert_eq!(split_systems("a+b+c"), vec!["a", "b", "c"]);
        assert_eq!(
            split_systems("Transformer+R2L+online-B"),
            vec!["Transformer_R2L", "online-B"]
        );
        assert_eq!(fix_system_id("R2L+Back"), "R2L_Back");
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("a,b"), "\"a,b\"");
        let fields = split_csv_line("x,\"a,\"\"b\"\"\",3").unwrap();
        assert_eq!(fields, vec!["x", "a,\"b\"", "3"]);
        assert!(split_csv_line("\"open").is_err());
    }

    #[test]
    fn column_counts() {
        let base = "u,s,1,TGT,eng,deu,55";
        assert_eq!(read_csv(base.as_bytes()).unwrap()[0].rank, None);
        let r = read_csv(format!("{base},2").as_bytes()).unwrap().remove(0);
        assert_eq!(r.rank, Some(2.0));
        let r = read_csv(format!("{base},10,20").as_bytes()).unwrap().remove(0);
        assert_eq!(r.duration(), Some(10.0));
        let r = read_csv(format!("{base},1,10,20").as_bytes()).unwrap().remove(0);
        assert_eq!((r.rank, r.start), (Some(1.0), Some(10.0)));
        let r = read_csv(format!("{base},10,20,4,99").as_bytes()).unwrap().remove(0);
        assert_eq!((r.batch, r.item), (Some(4), Some(99)));
        let r = read_csv(format!("{base},1,10,20,4,99").as_bytes()).unwrap().remove(0);
        assert_eq!((r.rank, r.end, r.item), (Some(1.0), Some(20.0), Some(99)));
        assert!(read_csv("u,s,1,TGT,eng,deu".as_bytes()).is_err());
        assert!(read_csv(format!("{base},x").as_bytes()).is_err());
    }

    #[test]
    fn csv_round_trip() {
        let records = vec![record("a", "sys,1", 61.5), record("b", "sys2", 0.1 + 0.2)];
        let mut buf = Vec::new();
        write_csv(&mut buf, &records).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text.lines().nth(1).unwrap().split(',').count(), 11);
        assert_eq!(read_csv(buf.as_slice()).unwrap(), records);
    }
}
