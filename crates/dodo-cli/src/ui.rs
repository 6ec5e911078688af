//! Terminal progress bars and prompts

use dialoguer::theme::ColorfulTheme;
use dodo_core::progress::{Confirm, ProgressListener};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Progress listener backed by an indicatif bar: a counted bar when the
/// total is known, a spinner for open-ended runs and screening phases.
#[derive(Default)]
pub struct IndicatifProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressListener for IndicatifProgress {
    fn start(&self, total: Option<u64>, message: &str) {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
                        )
                        .unwrap(),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
                        .unwrap(),
                );
                bar
            }
        };
        bar.set_message(message.to_string());
        *self.bar.lock().unwrap() = Some(bar);
    }

    fn increment(&self, n: u64) {
        if let Some(bar) = &*self.bar.lock().unwrap() {
            bar.inc(n);
        }
    }

    fn finish(&self, ok: bool) {
        if let Some(bar) = self.bar.lock().unwrap().take() {
            if ok {
                bar.finish_and_clear();
            } else {
                bar.abandon();
            }
        }
    }
}

/// Interactive yes/no prompt.
pub struct DialoguerConfirm;

impl Confirm for DialoguerConfirm {
    fn confirm(&self, message: &str, default_answer: bool) -> bool {
        dialoguer::Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .default(default_answer)
            .interact()
            .unwrap_or(default_answer)
    }
}
