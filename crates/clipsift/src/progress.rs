use indicatif::{ProgressBar, ProgressStyle};

const PERCENT_TEMPLATE: &str =
    "{prefix:<10} {bar:40.cyan/blue} {percent:>3}% [{elapsed_precise}<{eta_precise}] {msg}";

pub fn percent_bar_style() -> ProgressStyle {
    ProgressStyle::with_template(PERCENT_TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Bar over 0..=100 for stages that report whole percentages.
pub fn percent_bar(prefix: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(percent_bar_style());
    bar.set_prefix(prefix);
    bar
}

/// Adapts a bar into the `FnMut(u8)` callback the driver and exporter take.
/// Values never move the bar backwards.
pub fn percent_reporter(bar: &ProgressBar) -> impl FnMut(u8) + '_ {
    move |percent| {
        let percent = u64::from(percent.min(100));
        if percent > bar.position() {
            bar.set_position(percent);
        }
    }
}

/// Percentage of `done` out of `total`, reporting 100 for an empty job.
pub(crate) fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}
