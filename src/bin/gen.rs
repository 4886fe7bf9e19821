use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use line_sort::generate::{generate_file, GenerateOptions};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let output = arg_parser.value_of("output").expect("value is required");
    let size = arg_parser.value_of("size").expect("value is required");
    let size = size.parse::<ByteSize>().expect("value is pre-validated").as_u64();

    let options = GenerateOptions {
        size,
        max_data_len: arg_parser.value_of_t_or_exit("string_length"),
        duplicates_ratio: arg_parser.value_of_t_or_exit("duplicates_ratio"),
    };

    if arg_parser.is_present("threads") {
        let threads: usize = arg_parser.value_of_t_or_exit("threads");
        if let Err(err) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
            log::error!("thread pool initialization error: {}", err);
            process::exit(1);
        }
    }

    match generate_file(path::Path::new(output), &options) {
        Ok(stats) => {
            log::info!(
                "generated {} records ({} bytes, {} duplicate payloads) into {}",
                stats.records,
                stats.bytes,
                stats.duplicates,
                output
            );
        }
        Err(err) => {
            log::error!("generation error: {}", err);
            process::exit(1);
        }
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

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("line-sort-gen")
        .about("test data generator for the external sorter")
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("path to the generated file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("size")
                .short('s')
                .long("size")
                .help("target file size; the result may slightly overshoot")
                .required(true)
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("string_length")
                .short('g')
                .long("string-length")
                .help("maximal payload length of generated records, up to 2048")
                .takes_value(true)
                .default_value("1024"),
        )
        .arg(
            clap::Arg::new("duplicates_ratio")
                .short('r')
                .long("duplicates-ratio")
                .help("probability that a payload is drawn from the pre-generated duplicate pool")
                .takes_value(true)
                .default_value("0.01"),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel generation")
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
