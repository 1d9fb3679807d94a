use chrono::{Local, SecondsFormat};
use fern::colors::{Color, ColoredLevelConfig};
use log::Level;

/// Initialize human-readable logging to stderr at `level`.
///
/// Lines carry a millisecond timestamp, the coloured level and the emitting
/// module. Noisy HTTP internals are capped at `warn`.
pub fn init_logging(level: Level) -> anyhow::Result<()> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Blue)
		.trace(Color::BrightBlack);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {:<5} [{}] {}",
				Local::now().to_rfc3339_opts(SecondsFormat::Millis, true),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level.to_level_filter())
		.level_for("hyper_util", log::LevelFilter::Warn)
		.level_for("reqwest", log::LevelFilter::Warn)
		.chain(std::io::stderr())
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}
