use std::path;
use std::process;

use clap::ArgEnum;
use env_logger;
use log;

use splitsort::text;
use splitsort::SortError;

fn main() {
    env_logger::init();

    let arg_parser = build_arg_parser();

    let mode: Mode = arg_parser.value_of_t_or_exit("mode");
    let src = path::Path::new(arg_parser.value_of("src").expect("value is required"));
    let dst = path::Path::new(arg_parser.value_of("dst").expect("value is required"));

    let result = match mode {
        Mode::ToText => text::keys_to_text(src, dst),
        Mode::FromText => text::text_to_keys(src, dst),
    };

    if let Err(err) = result {
        log::error!("conversion error: {}", err);
        process::exit(exit_code(&err));
    }
}

fn exit_code(err: &SortError) -> i32 {
    match err {
        SortError::TempDir(_) | SortError::Io { .. } => 3,
        SortError::InvalidFileSize { .. } | SortError::InvalidText { .. } => 4,
        SortError::OutOfMemory => 5,
        SortError::ThreadPool(_) | SortError::Aborted => 1,
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Mode {
    ToText,
    FromText,
}

impl Mode {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Mode as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("key-text")
        .about("converts key files between binary and decimal text")
        .arg(
            clap::Arg::new("mode")
                .help("conversion direction")
                .required(true)
                .index(1)
                .possible_values(Mode::possible_values()),
        )
        .arg(
            clap::Arg::new("src")
                .help("file to be converted")
                .required(true)
                .index(2),
        )
        .arg(
            clap::Arg::new("dst")
                .help("file the conversion result is written to")
                .required(true)
                .index(3),
        )
        .get_matches()
}
