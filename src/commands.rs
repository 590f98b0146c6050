//! Implementations of the command line subcommands.

use ftabkit::{
    error::CommandError,
    fwsg::{has_footer, try_parse_footer, Bitness},
    integrity::Sha384,
    manifest::{Manifest, SectionDesc},
    ota::{ArchiveEntry, OtaPackage},
    section::extract,
    util::{self, SaveOptions, SectionNamer},
    Builder, Config, Directory, Tag, Unpacked, Unpacker,
};
use std::{
    fs,
    io::ErrorKind as IoErrorKind,
    path::Path,
};

const TICKET_FILE_NAME: &str = "ApImg4Ticket.der";
const MANIFEST_FILE_NAME: &str = "manifest.toml";

pub struct UnpackOptions<'a> {
    pub in_file: &'a Path,
    pub out_dir: Option<&'a Path>,
    pub overwrite: bool,
    pub silent: bool,
    pub create_parent_dirs: bool,
}

pub struct OtaOptions<'a> {
    pub in_file: &'a Path,
    pub out_dir: Option<&'a Path>,
    pub overwrite: bool,
    pub create_parent_dirs: bool,
}

pub fn load_config(path: &Path) -> Result<Config, CommandError<'_>> {
    let text = util::read_file("configuration file", path)?;
    let config = Config::from_toml(&String::from_utf8_lossy(&text))
        .map_err(|e| CommandError::ConfigParse(path, e))?;

    debug!(
        "Loaded configuration with {} tag rules from {}.",
        config.catalog.rules.len(),
        path.display()
    );

    Ok(config)
}

/// Creates the output directory if needed and makes sure that the path is a directory.
fn ensure_out_dir(out_dir: Option<&Path>, create_parent_dirs: bool) -> Result<(), CommandError> {
    let Some(p) = out_dir else {
        return Ok(());
    };

    let result = if create_parent_dirs {
        fs::create_dir_all(p)
    } else {
        fs::create_dir(p)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
            if p.is_dir() {
                Ok(())
            } else {
                Err(CommandError::OutDirIsNotDir(p))
            }
        }
        Err(e) => Err(CommandError::FailedToCreateOutDir(p, e)),
    }
}

fn load_unpacked<'a, 'd>(
    in_file: &'a Path,
    data: &'d [u8],
    config: &Config,
    print_header: bool,
) -> Result<Unpacked<'d>, CommandError<'a>> {
    let unpacked = Unpacker::new(config.layout, &config.catalog)
        .unpack(data)
        .map_err(|e| CommandError::Unpack(in_file, e))?;

    if print_header {
        println!("{}", unpacked.directory().header());
    }

    Ok(unpacked)
}

pub fn list<'a>(
    in_file: &'a Path,
    config: &Config,
    print_header: bool,
) -> Result<(), CommandError<'a>> {
    let data = util::read_file("ftab file", in_file)?;
    let unpacked = load_unpacked(in_file, &data, config, print_header)?;

    let mut prev_end = 0u64;
    for section in unpacked.sections() {
        let entry = section.entry();
        if prev_end != 0 && entry.offset.saturating_sub(prev_end) >= 4 {
            println!(
                "gap: {:08x}-{:08x}({:x})",
                prev_end,
                entry.offset,
                entry.offset - prev_end
            );
        }

        let (head, tail) = util::head_tail_hex(section.data(), 32);
        let segments = section
            .footer()
            .map(|footer| format!("{} segs", footer.segment_count()))
            .unwrap_or_default();
        println!(
            "{:4} {:08x}-{:08x}({:08x}) {:08x} {:<10} {:<10} {:<8} {} .. {}",
            section.tag(),
            entry.offset,
            entry.offset + entry.length,
            entry.length,
            entry.unk,
            section.category.as_str(),
            section.verification.as_str(),
            segments,
            head,
            tail
        );
        prev_end = entry.offset + entry.length;
    }

    if let Some(ticket) = unpacked.directory().ticket() {
        println!("ticket: {:#x} bytes", ticket.len());
    }

    for finding in unpacked.findings() {
        warn!("{}", finding);
    }

    Ok(())
}

pub fn unpack<'a>(
    options: &UnpackOptions<'a>,
    config: &Config,
    print_header: bool,
) -> Result<(), CommandError<'a>> {
    let data = util::read_file("ftab file", options.in_file)?;

    info!("Loaded file at path {}.", options.in_file.display());

    ensure_out_dir(options.out_dir, options.create_parent_dirs)?;
    let out_dir = options.out_dir.map(Path::to_path_buf).unwrap_or_default();

    let unpacked = load_unpacked(options.in_file, &data, config, print_header)?;
    let mut manifest = Manifest::with_directory(unpacked.directory());
    let save_options = SaveOptions {
        overwrite: options.overwrite,
        silent: options.silent,
        create_parent_dirs: false,
    };
    let save = |name, file_name: &str, data: &[u8]| {
        util::save_file(name, out_dir.join(file_name), data, save_options)
    };

    if let Some(ticket) = unpacked.directory().ticket() {
        save("ticket", TICKET_FILE_NAME, ticket)?;
        manifest.ticket = Some(TICKET_FILE_NAME.into());
    }

    let mut namer = SectionNamer::new();
    for section in unpacked.sections() {
        let file_name = namer.next_name(section.tag());
        save("section", &file_name, section.data())?;
        manifest.sections.push(SectionDesc {
            path: file_name.into(),
            tag: section.tag(),
            unk: section.entry().unk,
        });
    }

    for finding in unpacked.findings() {
        warn!("{}", finding);
    }

    let text = toml::to_string(&manifest).map_err(CommandError::ManifestSerialize)?;
    save("manifest", MANIFEST_FILE_NAME, text.as_bytes())?;

    info!("Done.");

    Ok(())
}

pub fn pack<'a>(
    manifest_path: &'a Path,
    out_file: &'a Path,
    overwrite: bool,
    rehash: bool,
    config: &Config,
) -> Result<(), CommandError<'a>> {
    let text = util::read_file("manifest", manifest_path)?;
    let manifest: Manifest = toml::from_str(&String::from_utf8_lossy(&text))
        .map_err(|e| CommandError::ManifestParse(manifest_path, e))?;

    let mut builder = Builder::with_manifest(&manifest, manifest_path.parent())?;
    if rehash {
        let tag = config.catalog.integrity_tag;
        if !builder.rehash(tag, &Sha384) {
            warn!("There is no {} section to rehash.", tag);
        }
    }

    let bytes = builder.build().map_err(CommandError::Build)?;
    util::save_file("ftab file", out_file, &bytes, SaveOptions::overwriting(overwrite))?;

    Ok(())
}

/// Prints the verification status of every section. Returns `false` when anything didn't match.
pub fn verify<'a>(
    in_file: &'a Path,
    config: &Config,
    print_header: bool,
) -> Result<bool, CommandError<'a>> {
    let data = util::read_file("ftab file", in_file)?;
    let unpacked = load_unpacked(in_file, &data, config, print_header)?;

    if unpacked.integrity_table().is_none() {
        warn!(
            "There is no {} section, nothing to verify against.",
            config.catalog.integrity_tag
        );
    }

    for section in unpacked.sections() {
        println!(
            "{:4} {:<10} {}",
            section.tag(),
            section.verification.as_str(),
            section.category.as_str()
        );
    }

    for finding in unpacked.findings() {
        println!("{}", finding);
    }

    Ok(!unpacked.has_integrity_failures())
}

pub fn segments<'a>(
    in_file: &'a Path,
    tag: Option<Tag>,
    bitness: Option<Bitness>,
    config: &Config,
) -> Result<(), CommandError<'a>> {
    let data = util::read_file("section", in_file)?;

    // A file without a footer of its own is looked up as a ftab file.
    let (tag, section) = match tag {
        Some(tag) => {
            let directory = Directory::parse(&data, &config.layout)
                .map_err(|e| CommandError::Unpack(in_file, e.into()))?;
            let entry = directory
                .entries()
                .iter()
                .find(|entry| entry.tag == tag)
                .ok_or(CommandError::NoSuchTag(tag))?;
            let section =
                extract(&data, entry).map_err(|e| CommandError::Unpack(in_file, e.into()))?;
            (Some(tag), section.data())
        }
        None => {
            if !has_footer(&data, &config.layout) {
                info!("{} doesn't end with a segment footer.", in_file.display());
            }
            let stem = in_file
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| <[u8; 4]>::try_from(stem.as_bytes()).ok())
                .map(Tag);
            (stem, &data[..])
        }
    };

    let footer = try_parse_footer(section, &config.layout)
        .map_err(|e| CommandError::Footer(in_file, e))?
        .ok_or_else(|| CommandError::NoFooter(in_file.display().to_string()))?;

    let bitness = bitness
        .or_else(|| {
            tag.and_then(|tag| config.catalog.classify(tag).arch)
                .and_then(|arch| arch.bitness())
        })
        .unwrap_or_else(|| {
            info!("Bitness is unknown, assuming 64-bit code.");
            Bitness::Bits64
        });

    println!(
        "content: {:#x} bytes, footer: {:#x} bytes",
        footer.content_len, footer.footer_len
    );
    for segment in &footer.segments {
        println!("{}", segment);
    }
    for region in footer.load_plan(bitness) {
        println!("{}", region);
    }

    Ok(())
}

fn print_entry(kind: &str, entry: &ArchiveEntry) {
    let path = entry.path.as_deref().unwrap_or("");
    match (entry.entry_type, entry.data) {
        (Some(b'F'), data) => println!(
            "{} F {:08x}  {}",
            kind,
            data.map_or(0, <[u8]>::len),
            path
        ),
        (Some(b'D'), _) => println!("{} D ........  {}", kind, path),
        _ => println!(
            "{} {} mode:{:07o} uid:{} gid:{} mtime:{:08x}  {}",
            kind,
            entry.entry_type.map(char::from).unwrap_or('-'),
            entry.mode.unwrap_or(0),
            entry.uid.unwrap_or(0),
            entry.gid.unwrap_or(0),
            entry.mtime.unwrap_or(0),
            path
        ),
    }
}

pub fn ota<'a>(options: &OtaOptions<'a>) -> Result<(), CommandError<'a>> {
    let data = util::read_file("OTA package", options.in_file)?;
    let package =
        OtaPackage::parse(&data).map_err(|e| CommandError::Package(options.in_file, e))?;

    let Some(out_dir) = options.out_dir else {
        for section in &package.sections {
            println!(
                "section {} label:{} {:#x} bytes",
                section.opcode.map(char::from).unwrap_or('-'),
                section.label.as_deref().unwrap_or("-"),
                section.data.map_or(0, <[u8]>::len)
            );
        }
        for entry in &package.infos {
            println!(
                "info idx:{:#x} idz:{:#x} siz:{:#x}",
                entry.index.unwrap_or(0),
                entry.index_size.unwrap_or(0),
                entry.size.unwrap_or(0)
            );
        }
        for entry in &package.entries {
            print_entry("entry", entry);
        }
        for entry in &package.metadata {
            print_entry("meta ", entry);
        }
        return Ok(());
    };

    ensure_out_dir(Some(out_dir), options.create_parent_dirs)?;

    let components = package
        .components()
        .map_err(|e| CommandError::Package(options.in_file, e))?;
    let save_options = SaveOptions {
        create_parent_dirs: true,
        ..SaveOptions::overwriting(options.overwrite)
    };
    for component in components {
        let relative = util::confined_path(&component.name)
            .ok_or_else(|| CommandError::UnsafePath(component.name.clone()))?;
        util::save_file("component", out_dir.join(relative), component.data, save_options)?;
    }

    info!("Done.");

    Ok(())
}
