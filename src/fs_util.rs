use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use tempfile::Builder;
use zip::ZipArchive;

use crate::error::RetrievalError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn open_maybe_gz(path: &Utf8Path) -> Result<Box<dyn BufRead>, RetrievalError> {
    let mut file = File::open(path.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(format!("open {path}: {err}")))?;
    let mut magic = [0u8; 2];
    let mut seen = 0;
    while seen < magic.len() {
        match file.read(&mut magic[seen..]) {
            Ok(0) => break,
            Ok(read) => seen += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(RetrievalError::Filesystem(format!("read {path}: {err}"))),
        }
    }
    let file = File::open(path.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(format!("open {path}: {err}")))?;
    if seen == magic.len() && magic == GZIP_MAGIC {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn extract_zip(
    zip_path: &Utf8Path,
    target_dir: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, RetrievalError> {
    let file = File::open(zip_path.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(format!("open zip {zip_path}: {err}")))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| RetrievalError::Filesystem(format!("read zip {zip_path}: {err}")))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        let relative = entry
            .enclosed_name()
            .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
            .ok_or_else(|| {
                RetrievalError::Filesystem(format!(
                    "zip entry path traversal detected in {zip_path}"
                ))
            })?;
        let entry_path = target_dir.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(entry_path.as_std_path())
                .map_err(|err| RetrievalError::path(&entry_path, err))?;
            continue;
        }

        let parent = entry_path.parent().unwrap_or(target_dir);
        fs::create_dir_all(parent.as_std_path()).map_err(|err| RetrievalError::path(parent, err))?;
        let mut temp = Builder::new()
            .prefix(".extract-")
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| RetrievalError::path(parent, err))?;
        io::copy(&mut entry, &mut temp)
            .map_err(|err| RetrievalError::Filesystem(format!("extract {relative}: {err}")))?;
        temp.persist(entry_path.as_std_path()).map_err(|err| {
            RetrievalError::Filesystem(format!("persist {entry_path}: {}", err.error))
        })?;
        extracted.push(relative);
    }
    extracted.sort();
    Ok(extracted)
}

pub fn validate_zip(zip_path: &Utf8Path) -> Result<(), RetrievalError> {
    let file = File::open(zip_path.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(format!("open zip {zip_path}: {err}")))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| RetrievalError::Filesystem(format!("read zip {zip_path}: {err}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| RetrievalError::Filesystem(format!("read zip {zip_path}: {err}")))?;
    }
    Ok(())
}
