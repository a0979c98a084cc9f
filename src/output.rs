//! Data structures for representing leaderboards, and their renderings.

use crate::errors::Result;
use itertools::Itertools;
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SystemScore {
    pub system: String,
    /// Mean over segments of the per-segment mean raw score.
    pub raw: f64,
    /// Same for z-scores.
    pub z: f64,
    /// Mean over segments of the bucketed raw score, 1 to 4.
    pub h: f64,
    pub data_points: usize,
    pub segments: usize,
    pub wins: usize,
    pub losses: usize,
    pub rank: String,
    /// Index of the cluster, starting at 0.
    pub cluster: usize,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Leaderboard {
    /// For example `en-de`.
    pub pair: String,
    pub source: String,
    pub target: String,
    /// Sorted by the sort key, best first.
    pub systems: Vec<SystemScore>,
    /// Sorted by z-score rather than raw score.
    pub by_z: bool,
    pub sigtest: bool,
    /// `p_values[i][j]` tests whether system `i` beats system `j`.
    pub p_values: Vec<Vec<Option<f64>>>,
}

impl Leaderboard {
    pub fn sort_key(&self, s: &SystemScore) -> f64 {
        if self.by_z { s.z } else { s.raw }
    }

    /// Positions after which a cluster ends, excluding the last system.
    pub fn boundaries(&self) -> Vec<usize> {
        self.systems
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0].cluster != w[1].cluster)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Serialize)]
pub struct OError {
    pub error: String,
}

/// Rank range `lo-hi`, or a single number if the bounds meet.
pub fn rank_string(wins: usize, losses: usize, total: usize) -> String {
    let lo = losses + 1;
    let hi = total - wins;
    if lo == hi {
        format!("{lo}")
    } else {
        format!("{lo}-{hi}")
    }
}

/// Marker for the head-to-head table.
pub fn significance_marker(p: f64) -> &'static str {
    if p < 0.001 {
        "\\textdaggerdbl"
    } else if p < 0.01 {
        "\\textdagger"
    } else if p < 0.05 {
        "\\star"
    } else {
        ""
    }
}

pub fn latex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '_' | '&' | '%' | '$' | '#' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

pub fn tsv(boards: &[Leaderboard], with_z: bool) -> String {
    let mut out = String::from("pair\tsystem\trank\tave");
    if with_z {
        out.push_str("\tave_z");
    }
    out.push('\n');
    for b in boards {
        for s in &b.systems {
            let _ = write!(out, "{}\t{}\t{}\t{:.1}", b.pair, s.system, s.rank, s.raw);
            if with_z {
                let _ = write!(out, "\t{:.3}", s.z);
            }
            out.push('\n');
        }
    }
    out
}

pub fn latex(board: &Leaderboard, with_z: bool) -> String {
    let boundaries = board.boundaries();
    let mut out = String::new();
    let _ = writeln!(out, "% {}", board.pair);
    let columns = if with_z { "ccrl" } else { "ccl" };
    let _ = writeln!(out, "\\begin{{tabular}}{{{columns}}}");
    let header = if with_z {
        "Rank & Ave. & Ave. z & System \\\\"
    } else {
        "Rank & Ave. & System \\\\"
    };
    let _ = writeln!(out, "{header}\n\\hline");
    for (i, s) in board.systems.iter().enumerate() {
        let _ = write!(out, "\\Uncon{{}} & {} & {:.1} & ", s.rank, s.raw);
        if with_z {
            let _ = write!(out, "{:.3} & ", s.z);
        }
        let _ = write!(out, "{} \\\\", latex_escape(&s.system));
        if boundaries.contains(&i) {
            out.push_str(" \\hline");
        }
        out.push('\n');
    }
    out.push_str("\\hline\n\\end{tabular}\n");
    out
}

/// Head-to-head table: cell (row, column) is the difference of the sort keys.
pub fn head_to_head(board: &Leaderboard) -> String {
    let n = board.systems.len();
    let mut out = String::new();
    let _ = writeln!(out, "% {} head to head", board.pair);
    let _ = writeln!(out, "\\begin{{tabular}}{{l{}}}", "c".repeat(n));
    let names = board.systems.iter().map(|s| latex_escape(&s.system)).join(" & ");
    let _ = writeln!(out, " & {names} \\\\\n\\hline");
    for (i, a) in board.systems.iter().enumerate() {
        let cells = board
            .systems
            .iter()
            .enumerate()
            .map(|(j, b)| {
                if i == j {
                    return "---".to_owned();
                }
                let delta = board.sort_key(a) - board.sort_key(b);
                let marker = board
                    .p_values
                    .get(i)
                    .and_then(|row| row.get(j).copied().flatten())
                    .map_or("", significance_marker);
                format!("{:.1}{marker}", (delta * 10.0).round() / 10.0)
            })
            .join(" & ");
        let _ = writeln!(out, "{} & {cells} \\\\", latex_escape(&a.system));
    }
    out.push_str("\\hline\n\\end{tabular}\n");
    out
}

/// One worksheet per language pair.
pub fn write_xlsx(path: &Path, boards: &[Leaderboard]) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    for b in boards {
        let sheet = workbook.add_worksheet();
        sheet.set_name(&b.pair)?;
        let header = ["Rank", "System", "Ave.", "Ave. z", "H", "Segments", "Data points", "Wins", "Losses"];
        for (col, h) in header.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *h, &bold)?;
        }
        for (i, s) in b.systems.iter().enumerate() {
            let row = i as u32 + 1;
            sheet.write_string(row, 0, &s.rank)?;
            sheet.write_string(row, 1, &s.system)?;
            sheet.write_number(row, 2, s.raw)?;
            sheet.write_number(row, 3, s.z)?;
            sheet.write_number(row, 4, s.h)?;
            sheet.write_number(row, 5, s.segments as f64)?;
            sheet.write_number(row, 6, s.data_points as f64)?;
            sheet.write_number(row, 7, s.wins as f64)?;
            sheet.write_number(row, 8, s.losses as f64)?;
        }
    }
    workbook.save(path)?;
    Ok(())
}
