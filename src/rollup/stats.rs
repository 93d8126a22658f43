//! Rollup statistics.
//!
//! Each worker owns one [`RollupStats`] slot for the whole run. Slots are
//! reduced into a single [`RollupSummary`] after the walk finishes.

#![allow(missing_docs)]

use std::fmt::Write as _;

use serde::Serialize;

use crate::rollup::permissions::RollupScore;

/// Counters one worker accumulates while rolling up directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupStats {
    pub not_processed: usize,
    pub not_rolled_up: usize,
    /// Directories with no subdirectories and no entries of their own.
    pub empty_dirs: usize,
    pub successful: [usize; 4],
    pub failed: [usize; 4],
    /// Entries found in directories' own databases before any merge.
    pub entries: u64,
    /// Level of every successful rollup.
    pub levels: Vec<usize>,
    /// Index databases left under each subtree top that stays separate.
    pub remaining_subdirs: Vec<usize>,
}

impl RollupStats {
    pub fn record_success(&mut self, score: RollupScore, level: usize) {
        self.successful[score.index()] += 1;
        self.levels.push(level);
    }

    pub fn record_failure(&mut self, score: RollupScore) {
        self.failed[score.index()] += 1;
    }

    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: Self) {
        self.not_processed += other.not_processed;
        self.not_rolled_up += other.not_rolled_up;
        self.empty_dirs += other.empty_dirs;
        for i in 0..4 {
            self.successful[i] += other.successful[i];
            self.failed[i] += other.failed[i];
        }
        self.entries += other.entries;
        self.levels.extend(other.levels);
        self.remaining_subdirs.extend(other.remaining_subdirs);
    }

    /// Reduce per-worker slots into one.
    pub fn reduce(slots: impl IntoIterator<Item = Self>) -> Self {
        slots.into_iter().fold(Self::default(), |mut acc, slot| {
            acc.merge(slot);
            acc
        })
    }

    pub fn summarize(self, dry_run: bool) -> RollupSummary {
        let successful = ScoreCounts::new(self.successful);
        let failed = ScoreCounts::new(self.failed);
        RollupSummary {
            dry_run,
            total_directories: self.not_processed
                + self.not_rolled_up
                + successful.total
                + failed.total,
            not_processed: self.not_processed,
            not_rolled_up: self.not_rolled_up,
            empty_dirs: self.empty_dirs,
            successful,
            failed,
            rollup_levels: Distribution::from_values(self.levels),
            remaining_subdirs: Distribution::from_values(self.remaining_subdirs),
            total_entries: self.entries,
        }
    }
}

/// Counts per rollup score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreCounts {
    /// Index 0 is score 1.
    pub by_score: [usize; 4],
    pub total: usize,
}

impl ScoreCounts {
    fn new(by_score: [usize; 4]) -> Self {
        Self {
            by_score,
            total: by_score.iter().sum(),
        }
    }
}

/// Summary statistics over a set of counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub count: usize,
    pub min: usize,
    pub max: usize,
    pub median: f64,
    pub sum: usize,
    pub average: f64,
}

impl Distribution {
    /// `None` for an empty input.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_values(mut values: Vec<usize>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_unstable();
        let count = values.len();
        let half = count / 2;
        let median = if count % 2 == 0 {
            (values[half - 1] + values[half]) as f64 / 2.0
        } else {
            values[half] as f64
        };
        let sum: usize = values.iter().sum();
        Some(Self {
            count,
            min: values[0],
            max: values[count - 1],
            median,
            sum,
            average: sum as f64 / count as f64,
        })
    }
}

/// Reduced statistics for a whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupSummary {
    pub dry_run: bool,
    pub not_processed: usize,
    pub not_rolled_up: usize,
    pub successful: ScoreCounts,
    pub failed: ScoreCounts,
    pub rollup_levels: Option<Distribution>,
    pub remaining_subdirs: Option<Distribution>,
    pub total_directories: usize,
    pub empty_dirs: usize,
    pub total_entries: u64,
}

impl RollupSummary {
    /// Multi-line plain-text report.
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        if self.dry_run {
            let _ = writeln!(out, "Dry run: no index was modified");
        }
        let _ = writeln!(out, "Not processed: {:>12}", self.not_processed);
        let _ = writeln!(out, "Not rolled up: {:>12}", self.not_rolled_up);
        render_scores(&mut out, "Successful rollups", &self.successful);
        let _ = writeln!(out);
        render_distribution(&mut out, "Rollup occurring at a level", self.rollup_levels.as_ref());
        let _ = writeln!(out);
        render_distribution(&mut out, "Remaining subdirs", self.remaining_subdirs.as_ref());
        render_scores(&mut out, "Failed rollups", &self.failed);
        let _ = writeln!(
            out,
            "Total: {:>20} ({} empty)",
            self.total_directories, self.empty_dirs
        );
        let _ = writeln!(out, "Entries: {:>18}", self.total_entries);
        out
    }
}

fn render_scores(out: &mut String, name: &str, counts: &ScoreCounts) {
    let _ = writeln!(out, "{name}:");
    for (i, count) in counts.by_score.iter().enumerate() {
        let _ = writeln!(out, "    {}: {count:>20}", i + 1);
    }
    let _ = writeln!(out, "    Total: {:>16}", counts.total);
}

fn render_distribution(out: &mut String, name: &str, dist: Option<&Distribution>) {
    let Some(d) = dist else {
        let _ = writeln!(out, "    No {name} stats");
        return;
    };
    let _ = writeln!(out, "    {name}:");
    let _ = writeln!(out, "        count:      {:>7}", d.count);
    let _ = writeln!(out, "        min:        {:>7}", d.min);
    let _ = writeln!(out, "        max:        {:>7}", d.max);
    let _ = writeln!(out, "        median:     {:>7.2}", d.median);
    let _ = writeln!(out, "        sum:        {:>7}", d.sum);
    let _ = writeln!(out, "        average:    {:>7.2}", d.average);
}
