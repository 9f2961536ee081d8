use ::log4rs::append::console::{ConsoleAppender, Target};
use ::log4rs::config::{Appender, Config, Logger, Root};
use ::log4rs::encode::pattern::PatternEncoder;
use log::LevelFilter;

use crate::errors::{KvError, Result};

const PATTERN: &str = concat!(
    "{T}=>kvstore[",
    env!("CARGO_PKG_VERSION"),
    "]@{d(%Y-%m-%d %H:%M:%S)}=>{t}: {m}{n}"
);

/// Everything goes to stderr, so that reports printed on stdout stay parseable.
pub fn config(level: LevelFilter) -> Result<Config> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .logger(Logger::builder()
            .appender("stderr")
            .additive(false)
            .build("app::error", LevelFilter::Error))
        .build(Root::builder()
            .appender("stderr")
            .build(level))
        .map_err(|errors| KvError::Other { reason: format!("bad logger config: {}", errors) })
}
