//! Persisting recovered files to the destination directory.
//!
//! Files that carry a path-derived name are written as
//! `<name>-<mtime>-<tag>`; anonymous finds get a five-digit sequence number
//! instead, starting at 00001 per write call. Contents are written
//! byte-exact, and each output file's access and modify times are set to
//! the values stored in the source node.

use crate::collector::FileInfo;
use rustix::fs::{AtFlags, CWD, Timestamps, utimensat};
use rustix::time::Timespec;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while preparing or writing output.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("destination is not a directory: {0}")]
    NotADirectory(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Writes recovered files into a destination directory.
pub struct FileWriter {
    base: PathBuf,
}

impl FileWriter {
    /// Creates the destination directory if it does not exist. An existing
    /// path that is not a directory is a startup error.
    pub fn new(base: impl AsRef<Path>) -> Result<FileWriter, WriterError> {
        let base = base.as_ref().to_path_buf();
        if base.exists() {
            if !base.is_dir() {
                return Err(WriterError::NotADirectory(base.display().to_string()));
            }
        } else {
            fs::create_dir_all(&base)?;
        }
        Ok(FileWriter { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Writes every file to the destination, tagging each output name with
    /// `postfix`. Files whose contents can no longer be read are skipped
    /// with a warning. Returns the number of files written.
    pub fn write<'a, I>(&self, files: I, postfix: &str) -> Result<usize, WriterError>
    where
        I: IntoIterator<Item = &'a FileInfo>,
    {
        tracing::info!("writing files");
        let mut sequence = 0usize;
        let mut written = 0usize;

        for info in files {
            let atime = info.file().znode().atime[0];
            let mtime = info.file().znode().mtime[0];

            let file_name = match info.name() {
                Some(name) => format!("{name}-{mtime}-{postfix}"),
                None => {
                    sequence += 1;
                    format!("{sequence:05}-{mtime}-{postfix}")
                }
            };
            tracing::info!("found file: {file_name}");

            let data = match info.read() {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!("skipping {file_name}: {err}");
                    continue;
                }
            };

            let path = self.base.join(&file_name);
            fs::write(&path, &data)?;
            set_file_times(&path, atime, mtime)?;
            written += 1;
        }

        Ok(written)
    }
}

fn set_file_times(path: &Path, atime: u64, mtime: u64) -> Result<(), WriterError> {
    let times = Timestamps {
        last_access: Timespec {
            tv_sec: atime as i64,
            tv_nsec: 0,
        },
        last_modification: Timespec {
            tv_sec: mtime as i64,
            tv_nsec: 0,
        },
    };
    utimensat(CWD, path, &times, AtFlags::empty()).map_err(io::Error::from)?;
    Ok(())
}
