use crate::{fwsg::FooterError, ota::PackageError, tag::Tag, unpacker::UnpackError};
use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// The file operation that failed.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum FileOpAction {
    Create,
    Open,
    Read,
    Write,
    /// Creating a missing parent directory.
    CreateDir,
}

impl FileOpAction {
    fn verb(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Open => "open",
            Self::Read => "read",
            Self::Write => "write",
            Self::CreateDir => "create directory for",
        }
    }
}

/// A failed file operation together with what was being done and to which file.
#[derive(Debug)]
pub struct FileOpError {
    pub action: FileOpAction,
    /// A short human readable description of the file, e.g. `"manifest"`.
    pub name: &'static str,
    pub path: PathBuf,
    pub error: io::Error,
}

impl FileOpError {
    /// Creates a boxed [`FileOpError`].
    pub fn boxed(
        action: FileOpAction,
        name: &'static str,
        path: PathBuf,
        error: io::Error,
    ) -> Box<Self> {
        Box::new(Self {
            action,
            name,
            path,
            error,
        })
    }

    /// Shorthand for [`FileOpAction::Create`] errors.
    pub fn make_create(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Create, name, path, error)
    }

    /// Shorthand for [`FileOpAction::Open`] errors.
    pub fn make_open(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Open, name, path, error)
    }

    /// Shorthand for [`FileOpAction::Read`] errors.
    pub fn make_read(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Read, name, path, error)
    }

    /// Shorthand for [`FileOpAction::Write`] errors.
    pub fn make_write(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Write, name, path, error)
    }

    /// Shorthand for [`FileOpAction::CreateDir`] errors. `path` is the directory.
    pub fn make_create_dir(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::CreateDir, name, path, error)
    }

    /// Returns `true` when the operation failed because the file is already there.
    pub fn is_exists(&self) -> bool {
        self.error.kind() == io::ErrorKind::AlreadyExists
    }
}

impl fmt::Display for FileOpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "failed to {} {} at path {}: {}",
            self.action.verb(),
            self.name,
            self.path.display(),
            self.error
        )
    }
}

impl Error for FileOpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// A type that describes errors which may be returned by the command line operations.
#[derive(Debug, Error)]
pub enum CommandError<'a> {
    /// A catch-all for all file I/O errors.
    #[error("{0}")]
    FileOp(#[from] Box<FileOpError>),
    /// An error that may occur during manifest parsing.
    #[error("failed to parse the manifest file at {}: {}", .0.display(), .1)]
    ManifestParse(&'a Path, #[source] toml::de::Error),
    /// An error that may occur when writing the manifest.
    #[error("failed to serialize the manifest: {0}")]
    ManifestSerialize(#[source] toml::ser::Error),
    /// An error that may occur during configuration file parsing.
    #[error("failed to parse the configuration file at {}: {}", .0.display(), .1)]
    ConfigParse(&'a Path, #[source] toml::de::Error),
    /// An error returned when the output directory path points to something other than a directory.
    #[error("path {} exists and is not a directory.", .0.display())]
    OutDirIsNotDir(&'a Path),
    /// An error returned when the output directory couldn't be created.
    #[error("couldn't create target directory at {}: {}", .0.display(), .1)]
    FailedToCreateOutDir(&'a Path, #[source] io::Error),
    /// An error returned when the 'ftab' file can't be unpacked at all.
    #[error("failed to parse file at {}: {}", .0.display(), .1)]
    Unpack(&'a Path, #[source] UnpackError),
    /// An error returned when a standalone section has a malformed segment footer.
    #[error("failed to parse segment footer of {}: {}", .0.display(), .1)]
    Footer(&'a Path, #[source] FooterError),
    /// An error returned when the requested section has no segment footer.
    #[error("{} has no segment footer", .0)]
    NoFooter(String),
    /// An error returned when the requested tag is not in the directory.
    #[error("no section with tag {0}")]
    NoSuchTag(Tag),
    /// An error returned when an OTA package is malformed.
    #[error("failed to parse OTA package at {}: {}", .0.display(), .1)]
    Package(&'a Path, #[source] PackageError),
    /// An error returned when a package entry path would escape the output directory.
    #[error("refusing to extract {0} outside of the output directory")]
    UnsafePath(String),
    /// An error returned when writing the built 'ftab' fails.
    #[error("failed to build ftab file: {0}")]
    Build(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_errors_name_the_operation() {
        let error = FileOpError::make_create_dir(
            "component",
            PathBuf::from("out/etc"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!error.is_exists());
        assert!(error
            .to_string()
            .starts_with("failed to create directory for component at path out/etc: "));

        let error = FileOpError::make_create(
            "section",
            PathBuf::from("rkos.bin"),
            io::Error::from(io::ErrorKind::AlreadyExists),
        );
        assert!(error.is_exists());
    }
}
