use std::path;
use std::process;

use env_logger;
use log;

use splitsort::check;

fn main() {
    env_logger::init();

    let arg_parser = build_arg_parser();
    let paths = arg_parser.values_of("paths").expect("value is required");

    for path in paths {
        match check::first_disorder(path::Path::new(path)) {
            Ok(None) => println!("{}: SORTED", path),
            Ok(Some(offset)) => println!("{}: NOT SORTED: {}", path, offset),
            Err(err) => {
                log::error!("order check error: {}", err);
                process::exit(1);
            }
        }
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("is-sorted")
        .about("reports whether key files are sorted")
        .arg(
            clap::Arg::new("paths")
                .help("key files to be checked")
                .required(true)
                .multiple_values(true),
        )
        .get_matches()
}
