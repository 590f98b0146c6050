use crate::{error::FileOpError, tag::Tag};
use dialoguer::Confirm;
use std::{
    borrow::Cow,
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::{Component, Path, PathBuf},
};

/// Reads the whole file at `path`. `name` describes the file in error messages.
///
/// # Errors
/// Returns a boxed [`FileOpError`] telling whether opening or reading the file failed.
pub fn read_file<P: AsRef<Path>>(name: &'static str, path: P) -> Result<Vec<u8>, Box<FileOpError>> {
    let path = path.as_ref();
    let mut contents = Vec::new();
    File::open(path)
        .map_err(|error| FileOpError::make_open(name, path.to_path_buf(), error))?
        .read_to_end(&mut contents)
        .map_err(|error| FileOpError::make_read(name, path.to_path_buf(), error))?;
    Ok(contents)
}

/// What [`save_file`] does when the file or its parent directory is missing or already there.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct SaveOptions {
    /// Truncate existing files without asking.
    pub overwrite: bool,
    /// Fail on existing files instead of asking the user.
    pub silent: bool,
    /// Create missing parent directories of the file.
    pub create_parent_dirs: bool,
}

impl SaveOptions {
    /// Options that replace existing files without asking.
    pub fn overwriting(overwrite: bool) -> Self {
        Self {
            overwrite,
            ..Self::default()
        }
    }
}

fn ask_to_overwrite(path: &Path) -> bool {
    Confirm::new()
        .with_prompt(format!(
            "Do you want to overwrite the file at '{}'?",
            path.display()
        ))
        .default(false)
        .interact()
        .unwrap_or_else(|e| {
            warn!("Couldn't ask whether to overwrite {}: {}", path.display(), e);
            false
        })
}

/// Creates a file for writing according to `options`.
///
/// Without `overwrite` an existing file is an error, unless the user agrees to replace it when
/// asked. Nobody is asked when `silent` is set.
///
/// # Errors
/// Returns a boxed [`FileOpError`] when a directory or the file can't be created.
pub fn create_file<P: AsRef<Path>>(
    name: &'static str,
    path: P,
    options: SaveOptions,
) -> Result<File, Box<FileOpError>> {
    let path = path.as_ref();
    let create_error = |error| FileOpError::make_create(name, path.to_path_buf(), error);

    if options.create_parent_dirs {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|error| FileOpError::make_create_dir(name, parent.to_path_buf(), error))?;
        }
    }

    let mut open_options = OpenOptions::new();
    open_options.write(true);
    if options.overwrite {
        open_options.create(true).truncate(true);
    } else {
        open_options.create_new(true);
    }

    let error = match open_options.open(path) {
        Ok(file) => return Ok(file),
        Err(error) => create_error(error),
    };

    // Only ask when the file exists and the caller allowed asking.
    let may_ask = !options.overwrite && !options.silent;
    if may_ask && error.is_exists() && path.is_file() && ask_to_overwrite(path) {
        return OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(create_error);
    }

    Err(error)
}

/// Writes `data` into a file created by [`create_file`] with the same `options`.
///
/// # Errors
/// Returns a boxed [`FileOpError`] when creating or writing the file fails.
pub fn save_file<P: AsRef<Path>>(
    name: &'static str,
    path: P,
    data: &[u8],
    options: SaveOptions,
) -> Result<(), Box<FileOpError>> {
    let path = path.as_ref();
    create_file(name, path, options)?
        .write_all(data)
        .map_err(|error| FileOpError::make_write(name, path.to_path_buf(), error))?;

    info!("Saved {} to {}.", name, path.display());

    Ok(())
}

/// Resolves a relative `path` against `dir`. Absolute paths and paths without a `dir` are
/// returned unchanged.
pub fn qualify_path_if_needed<'a, P, D>(path: &'a P, dir: Option<&D>) -> Cow<'a, Path>
where
    P: AsRef<Path> + ?Sized,
    D: AsRef<Path> + ?Sized,
{
    let path = path.as_ref();
    match dir {
        Some(dir) if path.is_relative() => Cow::Owned(dir.as_ref().join(path)),
        _ => Cow::Borrowed(path),
    }
}

/// Hands out file names for sections, keeping them unique when tags repeat.
///
/// The first section with a tag is named `<tag>.bin`, the following ones `<tag>_<n>.bin` where
/// `n` counts from 1. Tags that are not alphanumeric are hex encoded.
#[derive(Debug, Default)]
pub struct SectionNamer {
    seen: HashMap<Tag, usize>,
}

impl SectionNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the file name for the next section with `tag`.
    pub fn next_name(&mut self, tag: Tag) -> String {
        let count = self.seen.entry(tag).or_default();
        let name = match *count {
            0 => format!("{}.bin", tag.file_stem()),
            n => format!("{}_{}.bin", tag.file_stem(), n),
        };
        *count += 1;
        name
    }
}

/// Turns a path stored inside a package into a relative path that can't escape the output
/// directory. Returns `None` for paths with parent directory components or without any normal
/// component.
pub fn confined_path(path: &str) -> Option<PathBuf> {
    let mut confined = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => confined.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }

    if confined.as_os_str().is_empty() {
        None
    } else {
        Some(confined)
    }
}

/// Formats the first and the last `len` bytes of a slice as hex, the way section listings show
/// them. The tail is empty for slices no longer than `len`.
pub fn head_tail_hex(data: &[u8], len: usize) -> (String, String) {
    let head = &data[..data.len().min(len)];
    let tail = if data.len() > len {
        &data[data.len().saturating_sub(len).max(len)..]
    } else {
        &[]
    };
    (hex::encode(head), hex::encode(tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifies_relative_paths_only() {
        let dir = Path::new("/out");
        assert_eq!(
            qualify_path_if_needed("rkos.bin", Some(dir)),
            Path::new("/out/rkos.bin")
        );
        assert_eq!(
            qualify_path_if_needed("/abs/rkos.bin", Some(dir)),
            Path::new("/abs/rkos.bin")
        );
        assert_eq!(
            qualify_path_if_needed::<_, Path>("rkos.bin", None),
            Path::new("rkos.bin")
        );
    }

    #[test]
    fn names_repeated_tags() {
        let mut namer = SectionNamer::new();
        assert_eq!(namer.next_name(Tag(*b"CR01")), "CR01.bin");
        assert_eq!(namer.next_name(Tag(*b"CR01")), "CR01_1.bin");
        assert_eq!(namer.next_name(Tag([0, 0, 0, 1])), "00000001.bin");
        assert_eq!(namer.next_name(Tag(*b"CR01")), "CR01_2.bin");
    }

    #[test]
    fn confines_package_paths() {
        assert_eq!(confined_path("/etc/fw.bin"), Some(PathBuf::from("etc/fw.bin")));
        assert_eq!(confined_path("./a/b"), Some(PathBuf::from("a/b")));
        assert_eq!(confined_path("a/../../b"), None);
        assert_eq!(confined_path("/"), None);
    }

    #[test]
    fn head_and_tail_do_not_overlap() {
        let data: Vec<u8> = (0..40).collect();
        let (head, tail) = head_tail_hex(&data, 32);
        assert_eq!(head.len(), 64);
        assert_eq!(tail, hex::encode(&data[32..]));

        let (head, tail) = head_tail_hex(&data[..4], 32);
        assert_eq!(head, "00010203");
        assert!(tail.is_empty());
    }
}
