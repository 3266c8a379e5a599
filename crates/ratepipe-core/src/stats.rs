//! A point-in-time snapshot of [`crate::metrics::MetricsRegistry`] plus its
//! text rendering (§6 "Metrics snapshot").
//!
//! The original renders through `text/tabwriter`; no crate in this stack
//! provides column alignment, so columns are computed by hand here (see
//! `DESIGN.md`).

use std::time::Duration;

use crate::metrics::MetricsRegistry;

#[derive(Debug, Clone, Default)]
pub struct Total {
    pub started: u64,
    pub finished: u64,
    pub success: u64,
    pub fail: u64,
    pub mean: Duration,
    pub ninety_fifth: Duration,
}

#[derive(Debug, Clone)]
pub struct Status {
    pub status: String,
    pub count: u64,
    pub fraction: f64,
    pub mean: Duration,
    pub ninety_fifth: Duration,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub desired_rate: f64,
    pub actual_rate: f64,
    pub average_concurrency: f64,
    pub duration: Duration,
    pub summary: Total,
    pub status: Vec<Status>,
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub concurrency_current: i64,
    pub concurrency_maximum: usize,
    pub skipped: u64,
    pub all: Segment,
    /// Oldest first, matching `MetricsRegistry::with_segments`.
    pub segments: Vec<Segment>,
}

fn segment_to_total(started: u64, finished: u64, success: u64, fail: u64, mean: Duration, p95: Duration) -> Total {
    Total { started, finished, success, fail, mean, ninety_fifth: p95 }
}

impl Stats {
    /// Build a snapshot from the live registry. Status groups are the union
    /// of every status name ever seen on `all`, ordered alphabetically so
    /// rendering is stable across calls.
    pub fn snapshot(registry: &MetricsRegistry) -> Self {
        let all_statuses = registry.all.status.lock().expect("status lock poisoned");
        let mut names: Vec<String> = all_statuses.keys().cloned().collect();
        names.sort();
        drop(all_statuses);

        let all = build_segment(&registry.all, &names);

        let segments = registry.with_segments(|segs| {
            segs.iter().map(|seg| build_segment(seg, &names)).collect::<Vec<_>>()
        });

        Stats {
            concurrency_current: registry.busy(),
            concurrency_maximum: registry.worker_count(),
            skipped: registry.skipped(),
            all,
            segments,
        }
    }

    /// Render the interactive/status text block, newest segment first
    /// (matching the original's reversed segment iteration).
    pub fn render(&self) -> String {
        let mut columns: Vec<Vec<String>> = Vec::new();
        let mut header = vec!["".to_string(), "all".to_string()];
        for (i, _) in self.segments.iter().enumerate().rev() {
            header.push(format!("seg{}", self.segments.len() - 1 - i));
        }
        columns.push(header);

        if self.skipped > 0 {
            columns.push(row1("Skipped:", &format!("{} from previous runs", self.skipped)));
        }
        columns.push(row1(
            "Concurrency:",
            &format!("{} / {} workers in use", self.concurrency_current, self.concurrency_maximum),
        ));

        columns.push(self.rate_row("Desired rate:", |s| s.desired_rate, true));
        columns.push(self.rate_row("Actual rate:", |s| s.actual_rate, false));
        columns.push(self.rate_row("Avg concurrency:", |s| s.average_concurrency, false));
        columns.push(self.duration_row());

        columns.push(self.count_row("Started:", |s| s.summary.started));
        columns.push(self.count_row("Finished:", |s| s.summary.finished));
        columns.push(self.count_row("Success:", |s| s.summary.success));
        columns.push(self.count_row("Fail:", |s| s.summary.fail));
        columns.push(self.ms_row("Mean:", |s| s.summary.mean));
        columns.push(self.ms_row("95th:", |s| s.summary.ninety_fifth));

        for (idx, status) in self.all.status.iter().enumerate() {
            columns.push(vec![status.status.clone()]);
            columns.push(self.status_count_row("Count:", idx));
            columns.push(self.status_ms_row("Mean:", idx, |s| s.mean));
            columns.push(self.status_ms_row("95th:", idx, |s| s.ninety_fifth));
        }

        let mut out = String::from("Metrics\n=======\n");
        render_table(&columns, &mut out);
        out
    }

    fn rate_row(&self, label: &str, pick: impl Fn(&Segment) -> f64, skip_all_value: bool) -> Vec<String> {
        let mut row = vec![label.to_string()];
        if skip_all_value {
            row.push("(all)".to_string());
        } else {
            row.push(format!("{:.0}", pick(&self.all)));
        }
        for seg in self.segments.iter().rev() {
            row.push(format!("{:.0}", pick(seg)));
        }
        row
    }

    fn duration_row(&self) -> Vec<String> {
        let mut row = vec!["Duration:".to_string(), fmt_duration(self.all.duration)];
        for seg in self.segments.iter().rev() {
            row.push(fmt_duration(seg.duration));
        }
        row
    }

    fn count_row(&self, label: &str, pick: impl Fn(&Segment) -> u64) -> Vec<String> {
        let mut row = vec![label.to_string(), pick(&self.all).to_string()];
        for seg in self.segments.iter().rev() {
            row.push(pick(seg).to_string());
        }
        row
    }

    fn ms_row(&self, label: &str, pick: impl Fn(&Segment) -> Duration) -> Vec<String> {
        let mut row = vec![label.to_string(), fmt_ms(pick(&self.all))];
        for seg in self.segments.iter().rev() {
            row.push(fmt_ms(pick(seg)));
        }
        row
    }

    fn status_count_row(&self, label: &str, idx: usize) -> Vec<String> {
        let mut row = vec![
            label.to_string(),
            format!("{} ({:.0}%)", self.all.status[idx].count, 100.0 * self.all.status[idx].fraction),
        ];
        for seg in self.segments.iter().rev() {
            let s = &seg.status[idx];
            if s.count == 0 {
                row.push("0".to_string());
            } else {
                row.push(format!("{} ({:.0}%)", s.count, 100.0 * s.fraction));
            }
        }
        row
    }

    fn status_ms_row(&self, label: &str, idx: usize, pick: impl Fn(&Status) -> Duration) -> Vec<String> {
        let mut row = vec![label.to_string(), fmt_ms(pick(&self.all.status[idx]))];
        for seg in self.segments.iter().rev() {
            let s = &seg.status[idx];
            if s.count == 0 {
                row.push("-".to_string());
            } else {
                row.push(fmt_ms(pick(s)));
            }
        }
        row
    }
}

fn row1(label: &str, value: &str) -> Vec<String> {
    vec![label.to_string(), value.to_string()]
}

fn build_segment(seg: &crate::metrics::RateSegment, status_names: &[String]) -> Segment {
    let (mean, p95) = seg.total.latency_summary();
    let status_map = seg.status.lock().expect("status lock poisoned");
    let status = status_names
        .iter()
        .map(|name| match status_map.get(name) {
            Some(item) => {
                let (mean, p95) = item.latency_summary();
                let finished = item.count();
                let fraction = if seg.total.count() == 0 {
                    0.0
                } else {
                    finished as f64 / seg.total.count() as f64
                };
                Status { status: name.clone(), count: finished, fraction, mean, ninety_fifth: p95 }
            }
            None => Status { status: name.clone(), count: 0, fraction: 0.0, mean: Duration::ZERO, ninety_fifth: Duration::ZERO },
        })
        .collect();

    Segment {
        desired_rate: seg.desired_rate,
        actual_rate: seg.actual_rate(),
        average_concurrency: seg.average_concurrency(),
        duration: seg.duration(),
        summary: segment_to_total(
            seg.total.started.load(std::sync::atomic::Ordering::Relaxed),
            seg.total.finished.load(std::sync::atomic::Ordering::Relaxed),
            seg.total.success.load(std::sync::atomic::Ordering::Relaxed),
            seg.total.fail.load(std::sync::atomic::Ordering::Relaxed),
            mean,
            p95,
        ),
        status,
    }
}

/// Format a duration as `MM:SS`, or `H:MM:SS` once it reaches an hour, per
/// §6 ("omit HH when zero").
fn fmt_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hrs = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    if hrs > 0 {
        format!("{hrs}:{mins:02}:{secs:02}")
    } else {
        format!("{mins:02}:{secs:02}")
    }
}

fn fmt_ms(d: Duration) -> String {
    format!("{:.1} ms", d.as_secs_f64() * 1000.0)
}

/// Left-pad every column in `rows` to the widest cell in that column and
/// join with two spaces, mimicking `tabwriter`'s default padding.
fn render_table(rows: &[Vec<String>], out: &mut String) {
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut widths = vec![0usize; width];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    for row in rows {
        let mut line = String::new();
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            line.push_str(cell);
            if i + 1 < row.len() {
                for _ in cell.len()..widths[i] {
                    line.push(' ');
                }
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;

    #[test]
    fn fmt_duration_omits_hours_when_zero() {
        assert_eq!(fmt_duration(Duration::from_secs(65)), "01:05");
    }

    #[test]
    fn fmt_duration_includes_hours_when_present() {
        assert_eq!(fmt_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn snapshot_reflects_registry_counters() {
        let m = MetricsRegistry::new(2, 10.0);
        let seg = m.current_segment_id();
        m.log_start(seg);
        m.log_finish(seg, "[success]", Duration::from_millis(5), true);
        let stats = Stats::snapshot(&m);
        assert_eq!(stats.all.summary.started, 1);
        assert_eq!(stats.all.summary.success, 1);
        assert_eq!(stats.all.status.len(), 1);
        assert_eq!(stats.all.status[0].status, "[success]");
    }

    #[test]
    fn render_produces_nonempty_text() {
        let m = MetricsRegistry::new(2, 10.0);
        let seg = m.current_segment_id();
        m.log_start(seg);
        m.log_finish(seg, "[success]", Duration::from_millis(5), true);
        let text = Stats::snapshot(&m).render();
        assert!(text.contains("Metrics"));
        assert!(text.contains("Started:"));
        assert!(text.contains("[success]"));
    }
}
