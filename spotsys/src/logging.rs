//! Run logging.  Every run gets a log file named for the minute it started, and everything written
//! there is mirrored to stdout.

use chrono::{DateTime, Local};
use env_logger::{Target, WriteStyle};
use log::{LevelFilter, Record};
use snafu::ResultExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Log targets of the AWS SDK for Rust, which are chatty at INFO.
const SDK_TARGETS: &[&str] = &[
    "aws_config",
    "aws_credential_types",
    "aws_smithy",
    "tracing::span",
];

/// Returns the log file name for a run started at the given time, e.g. spotsys_19Oct20261432.log
pub(crate) fn log_file_name(started: &DateTime<Local>) -> String {
    format!("spotsys_{}.log", started.format("%d%b%Y%H%M"))
}

/// Writes one log line: `[2026-10-19 14:32:07,123] INFO     message`
fn write_record<W>(out: &mut W, time: &DateTime<Local>, record: &Record) -> io::Result<()>
where
    W: Write,
{
    writeln!(
        out,
        "[{}] {:<8} {}",
        time.format("%Y-%m-%d %H:%M:%S,%3f"),
        record.level(),
        record.args()
    )
}

/// Copies everything written to the run log file and to stdout.
struct RunLog {
    file: File,
}

impl Write for RunLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        io::stdout().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        io::stdout().flush()
    }
}

/// Sets up the process-wide logger and returns the path of this run's log file, which is created
/// in `directory` if needed.  Only one logger can be set per process; calling this twice fails.
pub(crate) fn init(level: LevelFilter, directory: &Path) -> Result<PathBuf> {
    fs::create_dir_all(directory).context(error::CreateDirSnafu { path: directory })?;
    let path = directory.join(log_file_name(&Local::now()));
    // Append, so two runs started in the same minute don't clobber each other.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .context(error::OpenLogSnafu { path: &path })?;

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .format(|buf, record| write_record(buf, &Local::now(), record))
        .target(Target::Pipe(Box::new(RunLog { file })))
        .write_style(WriteStyle::Never);
    // The AWS SDK for Rust is held to WARN while everything else logs at INFO.
    if level == LevelFilter::Info {
        for &target in SDK_TARGETS {
            builder.filter_module(target, LevelFilter::Warn);
        }
    }
    builder.try_init().context(error::LoggerSnafu)?;

    Ok(path)
}

mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Failed to create log directory '{}': {}", path.display(), source))]
        CreateDir {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },

        #[snafu(display("Failed to open log file '{}': {}", path.display(), source))]
        OpenLog {
            path: PathBuf,
            source: std::io::Error,
        },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
