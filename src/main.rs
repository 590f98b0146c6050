#[macro_use]
extern crate log;

mod commands;

use clap::{arg, command, value_parser, ArgMatches, Command};
use commands::{OtaOptions, UnpackOptions};
use ftabkit::{error::CommandError, fwsg::Bitness, Config, Tag};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::{path::PathBuf, process::ExitCode};

/// Parses a tag given on the command line. Tags shorter than 4 bytes are padded with zeros.
fn parse_tag(s: &str) -> Result<Tag, String> {
    if s.is_empty() || s.len() > 4 {
        return Err(format!("a tag must be 1 to 4 bytes long, got {:?}", s));
    }
    let mut tag = [0u8; 4];
    tag[..s.len()].copy_from_slice(s.as_bytes());
    Ok(Tag(tag))
}

fn path_arg<'m>(matches: &'m ArgMatches, id: &str) -> Option<&'m PathBuf> {
    matches.get_one::<PathBuf>(id)
}

fn cli() -> Command {
    command!()
        .propagate_version(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(arg!(print_header: -H --print_header).help(
            "Prints fields of the ftab file header that are neither offsets nor magic \
                    (currently all are unknown and ignored).",
        ))
        .arg(
            arg!(log_level: -l --log_level <LEVEL>)
                .default_value("WARN")
                .help(
                    "Configures the log level for the tool. Available log levels are: NONE \
                    (disables logging entirely), TRACE, DEBUG, INFO, WARN and ERROR.",
                ),
        )
        .arg(
            arg!(config: -c --config <CONFIG>)
                .value_parser(value_parser!(PathBuf))
                .help(
                    "Path to a TOML file describing the binary layout and the known tags. The \
                    built-in configuration matches C4000 baseband images.",
                ),
        )
        .subcommand(
            Command::new("list")
                .arg(
                    arg!(in_file: <PATH>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the ftab file to be listed."),
                )
                .about("Lists the sections of a ftab file with their verification status."),
        )
        .subcommand(
            Command::new("unpack")
                .arg(arg!(overwrite: -o --overwrite).help(
                    "Overwrite files instead of stopping when a file exists in the output \
                        directory.",
                ))
                .arg(
                    arg!(create_parent_dirs: -p --create_parent_dirs).help(
                        "Create parent directories when the output directory does not exist.",
                    ),
                )
                .arg(arg!(silent: -s --silent).help(
                    "Never ask whether an existing file should be overwritten, fail instead.",
                ))
                .arg(
                    arg!(in_file: <PATH>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the ftab file to be unpacked."),
                )
                .arg(
                    arg!(out_dir: [OUT_DIR])
                        .value_parser(value_parser!(PathBuf))
                        .help(
                            "Path to the directory where the unpacked files will be written. The \
                            default is the current working directory.",
                        ),
                )
                .about("Unpacks a ftab file into a directory and writes a manifest."),
        )
        .subcommand(
            Command::new("pack")
                .arg(arg!(overwrite: -o --overwrite).help("Overwrite the output file."))
                .arg(arg!(rehash: -r --rehash).help(
                    "Recompute the integrity table from the contents of the other sections.",
                ))
                .arg(
                    arg!(manifest: <MANIFEST>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the manifest written by the unpack command."),
                )
                .arg(
                    arg!(out_file: <OUT_FILE>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the ftab file to be written."),
                )
                .about("Builds a ftab file from a manifest."),
        )
        .subcommand(
            Command::new("verify")
                .arg(
                    arg!(in_file: <PATH>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the ftab file to be verified."),
                )
                .about("Checks every section against the integrity table."),
        )
        .subcommand(
            Command::new("segments")
                .arg(
                    arg!(tag: -t --tag <TAG>)
                        .value_parser(parse_tag)
                        .help("Read the footer of this section of a ftab file."),
                )
                .arg(arg!(arm64: --arm64).help("Treat the segments as 64-bit code."))
                .arg(
                    arg!(thumb: --thumb)
                        .conflicts_with("arm64")
                        .help("Treat the segments as 32-bit code."),
                )
                .arg(
                    arg!(in_file: <PATH>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to a ftab file or to a single unpacked section."),
                )
                .about("Prints the fwsg segment list and the memory layout of a section."),
        )
        .subcommand(
            Command::new("ota")
                .arg(arg!(overwrite: -o --overwrite).help(
                    "Overwrite files instead of stopping when a file exists in the output \
                        directory.",
                ))
                .arg(
                    arg!(create_parent_dirs: -p --create_parent_dirs).help(
                        "Create parent directories when the output directory does not exist.",
                    ),
                )
                .arg(
                    arg!(in_file: <PATH>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the decrypted AA01 package."),
                )
                .arg(
                    arg!(out_dir: [OUT_DIR])
                        .value_parser(value_parser!(PathBuf))
                        .help("Extract the files into this directory instead of listing them."),
                )
                .about("Lists or extracts a decrypted AA01 OTA package."),
        )
}

fn run<'m>(matches: &'m ArgMatches, config: &Config) -> Result<bool, CommandError<'m>> {
    let print_header = matches.get_flag("print_header");

    match matches.subcommand() {
        Some(("list", sub_matches)) => {
            let in_file = path_arg(sub_matches, "in_file").expect("required argument");
            commands::list(in_file, config, print_header).map(|()| true)
        }
        Some(("unpack", sub_matches)) => {
            let options = UnpackOptions {
                in_file: path_arg(sub_matches, "in_file").expect("required argument"),
                out_dir: path_arg(sub_matches, "out_dir").map(PathBuf::as_path),
                overwrite: sub_matches.get_flag("overwrite"),
                silent: sub_matches.get_flag("silent"),
                create_parent_dirs: sub_matches.get_flag("create_parent_dirs"),
            };
            commands::unpack(&options, config, print_header).map(|()| true)
        }
        Some(("pack", sub_matches)) => commands::pack(
            path_arg(sub_matches, "manifest").expect("required argument"),
            path_arg(sub_matches, "out_file").expect("required argument"),
            sub_matches.get_flag("overwrite"),
            sub_matches.get_flag("rehash"),
            config,
        )
        .map(|()| true),
        Some(("verify", sub_matches)) => {
            let in_file = path_arg(sub_matches, "in_file").expect("required argument");
            commands::verify(in_file, config, print_header)
        }
        Some(("segments", sub_matches)) => {
            let bitness = if sub_matches.get_flag("arm64") {
                Some(Bitness::Bits64)
            } else if sub_matches.get_flag("thumb") {
                Some(Bitness::Bits32)
            } else {
                None
            };
            commands::segments(
                path_arg(sub_matches, "in_file").expect("required argument"),
                sub_matches.get_one::<Tag>("tag").copied(),
                bitness,
                config,
            )
            .map(|()| true)
        }
        Some(("ota", sub_matches)) => {
            let options = OtaOptions {
                in_file: path_arg(sub_matches, "in_file").expect("required argument"),
                out_dir: path_arg(sub_matches, "out_dir").map(PathBuf::as_path),
                overwrite: sub_matches.get_flag("overwrite"),
                create_parent_dirs: sub_matches.get_flag("create_parent_dirs"),
            };
            commands::ota(&options).map(|()| true)
        }
        Some(_) | None => unreachable!(),
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();

    let log_level = match matches
        .get_one::<String>("log_level")
        .map(String::as_str)
        .unwrap_or("WARN")
    {
        "NONE" | "none" => LevelFilter::Off,
        "TRACE" | "trace" => LevelFilter::Trace,
        "DEBUG" | "debug" => LevelFilter::Debug,
        "INFO" | "info" => LevelFilter::Info,
        "WARN" | "warn" => LevelFilter::Warn,
        "ERROR" | "error" => LevelFilter::Error,
        _ => LevelFilter::Warn,
    };

    if let Err(e) = SimpleLogger::new().with_level(log_level).init() {
        eprintln!("Couldn't initialize logging: {}", e);
    }

    let config = match path_arg(&matches, "config") {
        Some(path) => match commands::load_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    match run(&matches, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn parses_short_tags() {
        assert_eq!(parse_tag("rkos"), Ok(Tag(*b"rkos")));
        assert_eq!(parse_tag("ab"), Ok(Tag(*b"ab\0\0")));
        assert!(parse_tag("").is_err());
        assert!(parse_tag("toolong").is_err());
    }
}
