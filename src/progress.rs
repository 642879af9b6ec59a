use std::io::IsTerminal;
use std::path::Path;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

/// Entry counter shown while a snapshot is copied or replayed.
///
/// Draws only with the `progress` feature, on an interactive stderr, and when
/// enabled in the configuration. Otherwise every call is a no-op.
pub struct Progress {
    #[cfg(feature = "progress")]
    bar: Option<ProgressBar>,
}

impl Progress {
    pub fn new(enabled: bool, total: usize, phase: &str) -> Self {
        let visible = enabled && total > 0 && std::io::stderr().is_terminal();

        #[cfg(feature = "progress")]
        {
            let bar = visible.then(|| {
                let pb = ProgressBar::new(total as u64);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{prefix} [{bar:24.cyan/blue}] {pos}/{len} • {msg}")
                {
                    pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
                }
                pb.set_prefix(phase.to_string());
                pb
            });
            Progress { bar }
        }

        #[cfg(not(feature = "progress"))]
        {
            let _ = (visible, phase);
            Progress {}
        }
    }

    pub fn is_visible(&self) -> bool {
        #[cfg(feature = "progress")]
        {
            self.bar.is_some()
        }
        #[cfg(not(feature = "progress"))]
        {
            false
        }
    }

    pub fn advance(&self, current: &Path) {
        #[cfg(feature = "progress")]
        if let Some(ref pb) = self.bar {
            pb.inc(1);
            pb.set_message(short_name(current));
        }
        #[cfg(not(feature = "progress"))]
        let _ = current;
    }

    pub fn finish(&self) {
        #[cfg(feature = "progress")]
        if let Some(ref pb) = self.bar {
            pb.finish_and_clear();
        }
    }
}

#[cfg(feature = "progress")]
fn short_name(path: &Path) -> String {
    const MAX_LEN: usize = 30;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "...".to_string());
    if name.chars().count() > MAX_LEN {
        let head: String = name.chars().take(MAX_LEN - 3).collect();
        format!("{head}...")
    } else {
        name
    }
}
