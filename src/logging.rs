//! Logging setup. A single `fern::Dispatch` builder used by callers (CLI
//! drivers, test harnesses) to get consistent, coloured, timestamped output.

use log::LevelFilter;

/// Initialise global logging at the given verbosity. Safe to call once per
/// process; a second call will return an error from `fern`'s underlying
/// `log::set_boxed_logger`, which callers should treat as a no-op.
pub fn init(level: LevelFilter) {
    let colors = fern::colors::ColoredLevelConfig::new()
        .info(fern::colors::Color::Green)
        .warn(fern::colors::Color::Yellow)
        .error(fern::colors::Color::Red)
        .debug(fern::colors::Color::Blue)
        .trace(fern::colors::Color::Magenta);

    let start = std::time::Instant::now();
    let dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{:>10.3}s {} {}] {}",
                start.elapsed().as_secs_f64(),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    // Logger double-init is a caller error in practice (tests, repeated
    // pipeline construction); ignore rather than panic.
    let _ = dispatch.apply();
}
