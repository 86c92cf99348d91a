use std::path;
use std::process;

use bytesize::ByteSize;
use env_logger;
use log;

use splitsort::generate;

fn main() {
    env_logger::init();

    let arg_parser = build_arg_parser();

    let dst = arg_parser.value_of("dst").expect("value is required");
    let size = arg_parser.value_of("size").expect("value is required");
    let bytes = size.parse::<ByteSize>().expect("value is pre-validated").as_u64();

    let result = if arg_parser.is_present("biased") {
        generate::generate_biased(path::Path::new(dst), bytes)
    } else {
        generate::generate_unbiased(path::Path::new(dst), bytes)
    };

    if let Err(err) = result {
        log::error!("key generation error: {}", err);
        process::exit(1);
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("gen-keys")
        .about("random key file generator")
        .arg(
            clap::Arg::new("dst")
                .help("file to be filled with keys")
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("size")
                .help("file size in bytes, must be a multiple of the key width")
                .required(true)
                .index(2)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("biased")
                .short('b')
                .long("biased")
                .help("make about half of the keys share one 24-bit prefix")
                .takes_value(false),
        )
        .get_matches()
}
