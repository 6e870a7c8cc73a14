use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use exhume_body::Body;
use exhume_xfs::copier::DirectBlockCopier;
use exhume_xfs::recover::Carver;
use exhume_xfs::sniff::MagicClassifier;
use exhume_xfs::XfsFS;
use log::info;
use std::collections::HashSet;
use std::path::PathBuf;

fn process_partition(
    file_path: &str,
    format: &str,
    offset: &u64,
    superblock: &bool,
    list: &bool,
    json: &bool,
    verbose: &bool,
    output_dir: &str,
    ignore_extensions: &HashSet<String>,
    recover_extensions: &HashSet<String>,
    min_ctime: &u32,
) {
    let mut body = Body::new_from(file_path.to_string(), format, Some(*offset));
    if *verbose {
        body.print_info();
    }

    let mut filesystem = match XfsFS::new(body, *offset) {
        Ok(fs) => fs,
        Err(message) => {
            eprintln!("XfsFS object creation error: {}", message);
            std::process::exit(1);
        }
    };

    if *superblock {
        if *json {
            println!(
                "{}",
                serde_json::to_string_pretty(&filesystem.superblock.to_json()).unwrap()
            );
        } else {
            filesystem.superblock.print_sp_info();
        }
        return;
    }

    if *list {
        let candidates = match filesystem.collect_deleted_inodes(*min_ctime) {
            Ok(candidates) => candidates,
            Err(err) => {
                eprintln!("{}", err);
                std::process::exit(1);
            }
        };
        eprintln!();
        if *json {
            let json_array: Vec<_> = candidates.iter().map(|inode| inode.to_json()).collect();
            println!("{}", serde_json::to_string_pretty(&json_array).unwrap());
        } else {
            for inode in &candidates {
                println!("{}", inode.to_string());
            }
        }
        return;
    }

    let copier_body = Body::new_from(file_path.to_string(), format, Some(*offset));
    let copier = DirectBlockCopier::new(copier_body, *offset);
    let mut carver = match Carver::new(
        PathBuf::from(output_dir),
        ignore_extensions.clone(),
        recover_extensions.clone(),
        copier,
        MagicClassifier,
    ) {
        Ok(carver) => carver,
        Err(err) => {
            eprintln!("Cannot prepare the output directory: {}", err);
            std::process::exit(1);
        }
    };

    let block_size = filesystem.superblock.block_size();
    let mut recovered = 0u64;
    if let Err(err) = filesystem.scan_deleted_inodes(*min_ctime, &mut |inode| {
        if carver.carve(&inode, block_size).is_some() {
            recovered += 1;
        }
    }) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
    eprintln!("\nDone.");
    info!("{} file(s) recovered into '{}'", recovered, output_dir);
}

/// Accepts raw epoch seconds or a local date/datetime such as
/// "2024-05-01", "2024-05-01 13:37" or "2024-05-01 13:37:42".
fn parse_since(value: &str) -> Result<u32, String> {
    if let Ok(seconds) = value.parse::<u32>() {
        return Ok(seconds);
    }
    let formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return local_epoch(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return local_epoch(dt);
        }
    }
    Err(format!("unrecognized timestamp '{}'", value))
}

fn local_epoch(dt: NaiveDateTime) -> Result<u32, String> {
    let seconds = Local
        .from_local_datetime(&dt)
        .single()
        .map(|local| local.timestamp())
        .ok_or_else(|| "ambiguous local timestamp".to_string())?;
    u32::try_from(seconds).map_err(|_| "timestamp outside the representable range".to_string())
}

fn parse_extension_set(value: Option<&String>) -> HashSet<String> {
    match value {
        Some(list) => list
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect(),
        None => HashSet::new(),
    }
}

fn main() {
    env_logger::init();
    let matches = Command::new("exhume_xfs")
        .version("1.0")
        .author("ForensicXlab")
        .about("Exhume recently deleted files from an XFS partition.")
        .arg(
            Arg::new("image")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the XFS evidence to exhume."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(clap::value_parser!(String))
                .default_value("raw")
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("The XFS partition starts at address 0x...."),
        )
        .arg(
            Arg::new("output_dir")
                .short('d')
                .long("output-dir")
                .value_parser(clap::value_parser!(String))
                .default_value("xfs_undeleted")
                .help("Place the recovered files in this directory."),
        )
        .arg(
            Arg::new("ignore")
                .short('i')
                .long("ignore-extensions")
                .value_parser(clap::value_parser!(String))
                .default_value("bin")
                .help("Comma separated extensions to delete right after classification."),
        )
        .arg(
            Arg::new("recover")
                .short('r')
                .long("recover-extensions")
                .value_parser(clap::value_parser!(String))
                .help("If set, only keep files classified with these comma separated extensions."),
        )
        .arg(
            Arg::new("since")
                .short('t')
                .long("since")
                .value_parser(parse_since)
                .help("Skip inodes deleted before this time (epoch seconds or 'YYYY-MM-DD[ HH:MM[:SS]]')."),
        )
        .arg(
            Arg::new("superblock")
                .short('s')
                .long("superblock")
                .action(ArgAction::SetTrue)
                .help("Display the superblock information."),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List the recoverable deleted inodes without copying any data."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let file_path = matches.get_one::<String>("image").unwrap();
    let format = matches.get_one::<String>("format").unwrap();
    let offset = matches.get_one::<u64>("offset").unwrap();
    let output_dir = matches.get_one::<String>("output_dir").unwrap();
    let ignore_extensions = parse_extension_set(matches.get_one::<String>("ignore"));
    let recover_extensions = parse_extension_set(matches.get_one::<String>("recover"));
    let min_ctime = match matches.get_one::<u32>("since") {
        Some(since) => *since,
        None => 0,
    };
    let superblock = match matches.get_one::<bool>("superblock") {
        Some(superblock) => superblock,
        None => &false,
    };
    let list = match matches.get_one::<bool>("list") {
        Some(list) => list,
        None => &false,
    };
    let verbose = match matches.get_one::<bool>("verbose") {
        Some(verbose) => verbose,
        None => &false,
    };
    let json = match matches.get_one::<bool>("json") {
        Some(json) => json,
        None => &false,
    };

    process_partition(
        file_path,
        format,
        offset,
        superblock,
        list,
        json,
        verbose,
        output_dir,
        &ignore_extensions,
        &recover_extensions,
        &min_ctime,
    );
}
