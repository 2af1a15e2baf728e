use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

mod com;
mod options;
mod protocol;
mod terminal;

use com::{Com, SerialCom, StdioCom};
use options::Options;
use protocol::{DiskStorageHandler, ReceivedFile, Ry, Rz, TransmissionError};
use terminal::RawModeGuard;

const LOG_PATTERN: &str = "{d(%H:%M:%S%.3f)} {h({l:5})} {t} - {m}{n}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProtocolKind {
    /// ZMODEM
    Rz,
    /// YMODEM
    Ry,
}

/// Receives files sent with ZMODEM or YMODEM.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Serial device to receive from, stdin/stdout if omitted
    #[arg(long)]
    device: Option<String>,

    #[arg(long, default_value_t = 115_200, requires = "device")]
    baud: usize,

    /// Directory received files are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Seconds to wait for the next header or packet
    #[arg(long)]
    timeout: Option<f64>,

    #[arg(long)]
    max_retries: Option<u32>,

    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// Log to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(value_enum)]
    protocol: ProtocolKind,
}

impl Args {
    fn apply(&self, options: &mut Options) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            options.output_dir = dir.clone();
        }
        if let Some(secs) = self.timeout {
            options.frame_timeout =
                Duration::try_from_secs_f64(secs).with_context(|| format!("invalid timeout {secs}"))?;
        }
        if let Some(retries) = self.max_retries {
            anyhow::ensure!(retries > 0, "max-retries must be at least 1");
            options.max_retries = retries;
        }
        if let Some(level) = self.log_level {
            options.log_level = level;
        }
        if let Some(file) = &self.log_file {
            options.log_file = Some(file.clone());
        }
        Ok(())
    }
}

/// stdout is the protocol channel, so logging goes to stderr or a file.
fn log_config(level: LevelFilter, log_file: Option<&PathBuf>) -> Result<Config> {
    let encoder = Box::new(PatternEncoder::new(LOG_PATTERN));
    let appender = match log_file {
        Some(path) => {
            let file = FileAppender::builder()
                .encoder(encoder)
                .build(path)
                .with_context(|| format!("can't open log file {}", path.display()))?;
            Appender::builder().build("out", Box::new(file))
        }
        None => {
            let console = ConsoleAppender::builder().target(Target::Stderr).encoder(encoder).build();
            Appender::builder().build("out", Box::new(console))
        }
    };
    Config::builder()
        .appender(appender)
        .build(Root::builder().appender("out").build(level))
        .context("invalid log configuration")
}

fn receive(kind: ProtocolKind, options: &Options, com: &mut dyn Com) -> Result<Vec<ReceivedFile>, TransmissionError> {
    let mut storage = DiskStorageHandler::new(&options.output_dir);
    let settings = options.transfer_settings();
    log::info!("{kind:?} receive over {}", com.name());
    match kind {
        ProtocolKind::Rz => Rz::new(settings).recv(com, &mut storage),
        ProtocolKind::Ry => Ry::new(settings).recv(com, &mut storage),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let handle = log4rs::init_config(log_config(LevelFilter::Info, None)?)?;
    let mut options = Options::load_options();
    args.apply(&mut options)?;
    handle.set_config(log_config(options.log_level, options.log_file.as_ref())?);

    let result = match &args.device {
        Some(device) => {
            let mut com = SerialCom::open(device, args.baud).with_context(|| format!("can't open {device}"))?;
            receive(args.protocol, &options, &mut com)
        }
        None => {
            let guard = RawModeGuard::enter().context("can't switch terminal to raw mode")?;
            let mut com = StdioCom::new();
            let result = receive(args.protocol, &options, &mut com);
            if let Err(err) = guard.restore() {
                log::error!("can't restore terminal: {err}");
            }
            result
        }
    };

    let files = result.context("transfer failed")?;
    for file in &files {
        log::info!("received '{}' ({} bytes)", file.file_name, file.bytes_received);
    }
    Ok(())
}
