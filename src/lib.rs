use indicatif::{ProgressBar, ProgressStyle};

pub mod commands;
pub mod config;
pub mod decl;
pub mod engine;
pub mod error;
pub mod image;
pub mod login;
pub mod network;
pub mod provider;
pub mod resolve;
pub mod state;
pub mod table;

pub fn default_spinner() -> ProgressBar {
    let spinner_style = ProgressStyle::with_template("{spinner} {prefix:.bold.dim} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

    let progress = ProgressBar::new_spinner();
    progress.set_style(spinner_style);
    progress.enable_steady_tick(std::time::Duration::from_millis(50));
    progress
}
