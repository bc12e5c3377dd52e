//! File-backed record store
//!
//! One directory per file id, one file per record key:
//! `<root>/<file_id:04x>/<key:04x>`. Records are replaced by writing a
//! temporary file and renaming it over the old one, so a crash leaves
//! either the old or the new record.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use openfido_ctap::{RecordStore, StoreError};

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

fn io_error(err: io::Error) -> StoreError {
    log::error!("record store I/O failure: {err}");
    StoreError::Io(err.to_string())
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(io_error)?;
        log::info!("record store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_dir(&self, file_id: u16) -> PathBuf {
        self.root.join(format!("{file_id:04x}"))
    }

    fn record_path(&self, file_id: u16, key: u16) -> PathBuf {
        self.file_dir(file_id).join(format!("{key:04x}"))
    }

    fn store(&self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError> {
        let dir = self.file_dir(file_id);
        fs::create_dir_all(&dir).map_err(io_error)?;

        let path = self.record_path(file_id, key);
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(io_error)?;
        file.write_all(data).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        fs::rename(&tmp, &path).map_err(io_error)
    }
}

impl RecordStore for FileStore {
    fn find(&mut self, file_id: u16, key: u16) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.record_path(file_id, key)) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(io_error(err)),
        }
    }

    fn write(&mut self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError> {
        log::debug!("write record {file_id:04x}/{key:04x}, {} bytes", data.len());
        self.store(file_id, key, data)
    }

    fn update(&mut self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError> {
        if !self.record_path(file_id, key).is_file() {
            return Err(StoreError::NotFound);
        }
        log::debug!("update record {file_id:04x}/{key:04x}, {} bytes", data.len());
        self.store(file_id, key, data)
    }

    fn delete_file(&mut self, file_id: u16) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.file_dir(file_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(err)),
        }
    }

    /// Remove temporaries left behind by an interrupted write
    fn garbage_collect(&mut self) -> Result<(), StoreError> {
        for dir in fs::read_dir(&self.root).map_err(io_error)? {
            let dir = dir.map_err(io_error)?.path();
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir).map_err(io_error)? {
                let path = entry.map_err(io_error)?.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    fs::remove_file(&path).map_err(io_error)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_find_update() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.find(1, 0x5AA5), Err(StoreError::NotFound));
        assert_eq!(store.update(1, 0x5AA5, b"x"), Err(StoreError::NotFound));

        store.write(1, 0x5AA5, b"state").unwrap();
        assert_eq!(store.find(1, 0x5AA5).unwrap(), b"state");

        store.update(1, 0x5AA5, b"newer").unwrap();
        assert_eq!(store.find(1, 0x5AA5).unwrap(), b"newer");
        assert!(dir.path().join("0001").join("5aa5").is_file());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path()).unwrap().write(3, 1, &[7, 7]).unwrap();

        let mut reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.find(3, 1).unwrap(), vec![7, 7]);
    }

    #[test]
    fn test_delete_file_removes_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.write(2, 1, b"a").unwrap();
        store.write(2, 2, b"b").unwrap();
        store.write(3, 1, b"c").unwrap();

        store.delete_file(2).unwrap();
        store.delete_file(9).unwrap();

        assert_eq!(store.find(2, 1), Err(StoreError::NotFound));
        assert_eq!(store.find(2, 2), Err(StoreError::NotFound));
        assert_eq!(store.find(3, 1).unwrap(), b"c");
    }

    #[test]
    fn test_garbage_collect_drops_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.write(1, 1, b"kept").unwrap();
        let stray = dir.path().join("0001").join("0002.tmp");
        fs::write(&stray, b"half").unwrap();

        store.garbage_collect().unwrap();

        assert!(!stray.exists());
        assert_eq!(store.find(1, 1).unwrap(), b"kept");
    }
}
