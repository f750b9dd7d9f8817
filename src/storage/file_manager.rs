use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::Mutex;

use crate::common::{BlockID, DbError, Result};
use crate::storage::Page;

/// Fixed-size block I/O over the files of one data directory.
pub struct FileManager {
    directory: PathBuf,
    block_size: usize,
    open_files: Mutex<HashMap<String, File>>,
}

impl FileManager {
    pub fn new(directory: &Path, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(DbError::InvalidConfig("block size must be > 0".to_string()));
        }
        fs::create_dir_all(directory)?;

        Ok(Self {
            directory: directory.to_path_buf(),
            block_size,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reads `block` into `page`. Bytes past the end of the file read as zero.
    pub fn read(&self, block: &BlockID, page: &mut Page) -> Result<()> {
        self.check_page(page)?;
        let mut files = self.open_files.lock();
        let file = Self::open(&mut files, &self.directory, &block.file_name)?;

        file.seek(SeekFrom::Start(self.offset_of(block)))?;
        let buf = page.contents_mut();
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break; // EOF
            }
            filled += n;
        }
        buf[filled..].fill(0);
        Ok(())
    }

    /// Writes `page` to `block` and forces data and metadata to disk.
    pub fn write(&self, block: &BlockID, page: &Page) -> Result<()> {
        self.check_page(page)?;
        let mut files = self.open_files.lock();
        let file = Self::open(&mut files, &self.directory, &block.file_name)?;

        file.seek(SeekFrom::Start(self.offset_of(block)))?;
        file.write_all(page.contents())?;
        file.sync_all()?;
        debug!("wrote block {}", block);
        Ok(())
    }

    /// Extends the file by one zeroed block and returns its id.
    pub fn append(&self, file_name: &str) -> Result<BlockID> {
        let mut files = self.open_files.lock();
        let file = Self::open(&mut files, &self.directory, file_name)?;

        let len = file.metadata()?.len();
        let number = (len / self.block_size as u64) as u32;
        let block = BlockID::new(file_name, number);
        file.seek(SeekFrom::Start(number as u64 * self.block_size as u64))?;
        file.write_all(&vec![0u8; self.block_size])?;
        file.sync_all()?;
        Ok(block)
    }

    /// Number of whole blocks in the file; a missing file has none.
    pub fn length(&self, file_name: &str) -> Result<u32> {
        let files = self.open_files.lock();
        let len = match files.get(file_name) {
            Some(file) => file.metadata()?.len(),
            None => {
                let path = self.directory.join(file_name);
                if path.exists() {
                    fs::metadata(path)?.len()
                } else {
                    0
                }
            }
        };
        Ok((len / self.block_size as u64) as u32)
    }

    fn open<'a>(
        files: &'a mut HashMap<String, File>,
        directory: &Path,
        file_name: &str,
    ) -> Result<&'a mut File> {
        if !files.contains_key(file_name) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(directory.join(file_name))?;
            files.insert(file_name.to_string(), file);
        }
        files
            .get_mut(file_name)
            .ok_or_else(|| DbError::Other(format!("file {} vanished from cache", file_name)))
    }

    fn offset_of(&self, block: &BlockID) -> u64 {
        block.number as u64 * self.block_size as u64
    }

    fn check_page(&self, page: &Page) -> Result<()> {
        if page.size() != self.block_size {
            return Err(DbError::Other(format!(
                "page of {} bytes does not match block size {}",
                page.size(),
                self.block_size
            )));
        }
        Ok(())
    }
}
