use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use splitsort::{SortError, SorterBuilder};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let strategy: Strategy = arg_parser.value_of_t_or_exit("strategy");
    let memory_limit = arg_parser.value_of("memory_limit").expect("value is required");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");

    let src = arg_parser.value_of("src").expect("value is required");
    let dst = arg_parser.value_of("dst").expect("value is required");

    let mut sorter_builder = SorterBuilder::new()
        .with_strategy(strategy.into())
        .with_memory_limit(memory_limit.parse::<ByteSize>().expect("value is pre-validated").as_u64());

    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let sorter = sorter_builder.build();
    if let Err(err) = sorter.sort(path::Path::new(src), path::Path::new(dst)) {
        log::error!("sorting error: {}", err);
        process::exit(exit_code(&err));
    }
}

/// Maps a sorting error onto the process exit code. Usage errors exit with code 2
/// through the argument parser before any sorting starts.
fn exit_code(err: &SortError) -> i32 {
    match err {
        SortError::TempDir(_) | SortError::Io { .. } => 3,
        SortError::InvalidFileSize { .. } | SortError::InvalidText { .. } => 4,
        SortError::OutOfMemory => 5,
        SortError::ThreadPool(_) | SortError::Aborted => 1,
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Strategy {
    InMemory,
    KWayMerge,
    BalancedSplit,
}

impl Strategy {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Strategy as clap::ArgEnum>::from_str(s, false)
    }
}

impl From<Strategy> for splitsort::Strategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::InMemory => splitsort::Strategy::InMemory,
            Strategy::KWayMerge => splitsort::Strategy::KWayMerge,
            Strategy::BalancedSplit => splitsort::Strategy::BalancedSplit,
        }
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("splitsort")
        .about("external sorter for flat files of 32-bit keys")
        .arg(
            clap::Arg::new("src")
                .help("key file to be sorted")
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("dst")
                .help("file the sorted keys are written to; may be the same as the source")
                .required(true)
                .index(2),
        )
        .arg(
            clap::Arg::new("strategy")
                .short('s')
                .long("strategy")
                .help("sorting strategy")
                .takes_value(true)
                .default_value("balanced-split")
                .possible_values(Strategy::possible_values()),
        )
        .arg(
            clap::Arg::new("memory_limit")
                .short('m')
                .long("memory-limit")
                .help("memory budget shared by the sorting buffers")
                .takes_value(true)
                .default_value("256MiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory limit format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel key routing")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
