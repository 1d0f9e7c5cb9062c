//! 📊 progress.rs: "Are we there yet?" Every migration, every time, forever.
//!
//! 🚀 Turns the importer's per-batch callbacks into a terminal progress bar with a
//! comfy-table of rates underneath. Hidden entirely when `show_progress` is off, so logs
//! piped into a file don't fill up with carriage returns.
//!
//! ⚠️ Watching this progress bar will not make the target store bill you less.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::import::ImportProgress;

/// 🔢 "1000000 records" → "1,000,000 records". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls. If it shows hours, order pizza. Plural.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📊 Progress display for one collection's import.
///
/// Rates use a sliding 5-second window so one slow batch doesn't make the
/// records-per-second figure look like a seismograph.
pub struct ProgressMetrics {
    collection: String,
    progress_bar: ProgressBar,
    /// (when, records processed at that moment)
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
    last: Option<ImportProgress>,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- ProgressBar doesn't do Debug, and printing a terminal widget is a choice anyway
        f.debug_struct("ProgressMetrics")
            .field("collection", &self.collection)
            .field("last", &self.last)
            .finish()
    }
}

impl ProgressMetrics {
    pub fn new(collection: &str, total_records: usize, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(total_records as u64)
        } else {
            ProgressBar::hidden()
        };
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n| [{bar:40.cyan/blue}]")
                // -- the template is a literal; if indicatif ever disagrees, plain bar it is
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0));
        Self {
            collection: collection.to_string(),
            progress_bar,
            rate_samples,
            start_time,
            last: None,
        }
    }

    /// 🔄 Feed one importer callback.
    pub fn update(&mut self, progress: ImportProgress) {
        self.last = Some(progress);
        let rate = self.records_per_sec(progress.processed as u64);
        self.render(progress, rate);
        self.progress_bar.set_position(progress.processed as u64);
    }

    pub fn finish(&self) {
        self.progress_bar.finish();
    }

    pub fn last(&self) -> Option<ImportProgress> {
        self.last
    }

    fn records_per_sec(&mut self, processed: u64) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, processed));

        match self.rate_samples.front() {
            Some(&(oldest_time, oldest)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    processed.saturating_sub(oldest) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// 🎨 Layout:
    /// ```text
    /// importing: <collection>
    ///   <records/s>       <processed / total>
    ///   <batch n / m>     <percent>
    ///   <elapsed>         <remaining>
    /// | [=====>----------]
    /// ```
    fn render(&self, progress: ImportProgress, records_per_sec: f64) {
        let percent = if progress.total > 0 {
            progress.processed as f64 / progress.total as f64 * 100.0
        } else {
            100.0
        };
        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0.0 && percent < 100.0 {
            // 🔮 linear extrapolation: assumes the future looks like the past
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            format_duration(Duration::from_secs_f64(
                (total_estimated - elapsed.as_secs_f64()).max(0.0),
            ))
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Records/s", format_number(records_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {} Records",
                format_number(progress.processed as u64),
                format_number(progress.total as u64)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!(
                "batch {} / {}",
                progress.current_batch, progress.total_batches
            ))
            .set_alignment(CellAlignment::Right),
            Cell::new(format!("{percent:.2}%")).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{remaining} remaining")).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("importing: {}\n{table}", self.collection));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_long_runs_grow_an_hours_column() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_a_hidden_bar_still_keeps_score() {
        let mut metrics = ProgressMetrics::new("users", 250, false);
        metrics.update(ImportProgress {
            processed: 100,
            total: 250,
            current_batch: 1,
            total_batches: 3,
        });
        metrics.finish();
        assert_eq!(metrics.last().map(|p| p.processed), Some(100));
    }
}
