//! 📊 progress.rs: "Are we there yet?" for a fleet of remote queries.
//!
//! 🚀 A spinner on stderr that counts objects queried and bytes scanned, plus the comfy
//! table the dry run prints. Stdout is for results only, so everything here draws on
//! stderr, and nothing draws at all unless progress was asked for.
//!
//! ⚠️ Watching this spinner will not make S3 go faster. We've tried. 🦆

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::estimator::DryRunSummary;

const KIB: f64 = 1024.0;
const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

/// 📦 "1073741824 bytes" is a war crime in a UI. "1.00 GiB" is not.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / KIB;
    let mut unit = 0;
    while value >= KIB && unit + 1 < UNITS.len() {
        value /= KIB;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub fn format_number(n: u64) -> String {
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

/// 📊 Shared counters for one run. Every query worker holds an `Arc` to it.
pub(crate) struct ProgressMetrics {
    objects: AtomicU64,
    bytes: AtomicU64,
    progress_bar: ProgressBar,
}

impl fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ProgressBar has no Debug
        f.debug_struct("ProgressMetrics")
            .field("objects", &self.objects())
            .field("bytes", &self.bytes())
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 A visible spinner when `show` is set, a silent counter otherwise.
    pub(crate) fn new(show: bool) -> Self {
        let progress_bar = if show {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}") {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            objects: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            progress_bar,
        }
    }

    /// 🔄 One more object fully queried.
    pub(crate) fn object_queried(&self, size: u64) {
        let objects = self.objects.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = self.bytes.fetch_add(size, Ordering::Relaxed) + size;
        if !self.progress_bar.is_hidden() {
            self.progress_bar.set_message(format!(
                "{} objects | {} scanned",
                format_number(objects),
                format_bytes(bytes)
            ));
        }
    }

    pub(crate) fn objects(&self) -> u64 {
        self.objects.load(Ordering::Relaxed)
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// ✅ Clears the spinner so the last line of stderr is not a half-drawn frame.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish_and_clear();
    }
}

/// 🍽️ The dry-run bill as a two-column table.
pub fn render_dry_run_summary(summary: &DryRunSummary) -> String {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.add_row(vec![
        Cell::new("objects"),
        Cell::new(format_number(summary.total_objects)).set_alignment(CellAlignment::Right),
    ]);
    table.add_row(vec![
        Cell::new("bytes"),
        Cell::new(format!(
            "{} ({})",
            format_bytes(summary.total_bytes),
            format_number(summary.total_bytes)
        ))
        .set_alignment(CellAlignment::Right),
    ]);
    table.to_string()
}
