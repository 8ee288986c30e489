//! Multi-progress display for episode downloads.

use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use pahe_dl::orchestrator::DownloadEvent;

fn style(template: &str, chars: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(chars)
}

fn idle_style() -> ProgressStyle {
    style("  {spinner:.dim} {wide_msg}", "━╸─")
}

/// One summary bar plus one slot per worker.
pub struct EpisodeProgress {
    multi: MultiProgress,
    slots: Vec<ProgressBar>,
    summary: ProgressBar,
    succeeded: usize,
    skipped: usize,
    failed: usize,
}

impl EpisodeProgress {
    pub fn new(num_workers: usize) -> Self {
        let multi = MultiProgress::new();

        let summary = multi.add(ProgressBar::new(0));
        summary.set_style(style(
            "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len}",
            "█▓░",
        ));
        summary.set_message("Fetching episode list");

        let slots = (0..num_workers.max(1))
            .map(|_| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(idle_style());
                bar.set_message("idle");
                bar
            })
            .collect();

        Self {
            multi,
            slots,
            summary,
            succeeded: 0,
            skipped: 0,
            failed: 0,
        }
    }

    fn slot(&self, worker_id: usize) -> Option<&ProgressBar> {
        self.slots.get(worker_id)
    }

    pub fn handle(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Planned { total, .. } => {
                self.summary.set_length(*total as u64);
                self.refresh_summary();
            }
            DownloadEvent::Started {
                worker_id, episode, ..
            } => {
                if let Some(bar) = self.slot(*worker_id) {
                    bar.set_style(style("  {spinner:.cyan} {wide_msg}", "━╸─"));
                    bar.set_length(0);
                    bar.set_position(0);
                    bar.set_message(format!("Episode {episode}: resolving"));
                    bar.enable_steady_tick(Duration::from_millis(100));
                }
            }
            DownloadEvent::Progress {
                worker_id,
                episode,
                bytes,
                total,
            } => {
                if let Some(bar) = self.slot(*worker_id) {
                    if let Some(total) = total {
                        if bar.length() != Some(*total) {
                            bar.set_style(style(
                                "  {spinner:.cyan} {wide_msg} [{bar:25.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
                                "━╸─",
                            ));
                            bar.set_length(*total);
                            bar.set_message(format!("Episode {episode}"));
                        }
                    }
                    bar.set_position(*bytes);
                }
            }
            DownloadEvent::Completed {
                worker_id, episode, ..
            } => {
                self.succeeded += 1;
                self.reset_slot(*worker_id);
                let _ = self.multi.println(format!(
                    "{} Episode {}",
                    console::style("✓").green(),
                    episode
                ));
                self.summary.inc(1);
                self.refresh_summary();
            }
            DownloadEvent::Skipped { .. } => {
                self.skipped += 1;
                self.summary.inc(1);
                self.refresh_summary();
            }
            DownloadEvent::Failed {
                worker_id,
                episode,
                error,
            } => {
                self.failed += 1;
                self.reset_slot(*worker_id);
                let _ = self.multi.println(format!(
                    "{} Episode {}: {}",
                    console::style("✗").red(),
                    episode,
                    error
                ));
                self.summary.inc(1);
                self.refresh_summary();
            }
        }
    }

    fn reset_slot(&self, worker_id: usize) {
        if let Some(bar) = self.slot(worker_id) {
            bar.disable_steady_tick();
            bar.set_style(idle_style());
            bar.set_length(0);
            bar.set_position(0);
            bar.set_message("idle");
        }
    }

    fn refresh_summary(&self) {
        self.summary.set_message(format!(
            "Downloaded: {} | Skipped: {} | Failed: {}",
            self.succeeded, self.skipped, self.failed
        ));
    }

    pub fn finish(&self) {
        for bar in &self.slots {
            bar.finish_and_clear();
        }
        self.summary.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_counts_follow_events() {
        let mut progress = EpisodeProgress::new(2);
        progress.handle(&DownloadEvent::Planned {
            total: 3,
            to_download: 2,
        });
        progress.handle(&DownloadEvent::Skipped {
            episode: 1,
            path: PathBuf::from("a.mp4"),
        });
        progress.handle(&DownloadEvent::Started {
            worker_id: 1,
            episode: 2,
            output: PathBuf::from("b.mp4"),
        });
        progress.handle(&DownloadEvent::Progress {
            worker_id: 1,
            episode: 2,
            bytes: 10,
            total: Some(100),
        });
        progress.handle(&DownloadEvent::Completed {
            worker_id: 1,
            episode: 2,
            path: PathBuf::from("b.mp4"),
        });
        // Unknown worker ids are ignored.
        progress.handle(&DownloadEvent::Failed {
            worker_id: 9,
            episode: 3,
            error: "boom".to_string(),
        });

        assert_eq!((progress.succeeded, progress.skipped, progress.failed), (1, 1, 1));
        assert_eq!(progress.summary.position(), 3);
        progress.finish();
    }
}
