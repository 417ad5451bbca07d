//! # Table Module
//!
//! An append-only file of fixed-width records over one target type, plus
//! the [`ArrayTable`] wrapper that turns such a file into the backing
//! store for a homogeneous element sequence addressed by `(start, len)`.
//!
//! Every table holds exactly one open file handle, acquired on first
//! access and held until [`Table::close`]. Positioning is an explicit
//! seek per operation; nothing assumes a shared cursor is safe across
//! calls.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::error::{Error, Result};

/// An append-only, fixed-width record file over one type.
#[derive(Debug)]
pub struct Table {
    path: PathBuf,
    file: File,
    width: usize,
    count: u64,
}

impl Table {
    /// Opens the table file at `path`, creating it if absent. `width` is
    /// the fixed record width in bytes. If the file's tail holds a
    /// partial record (from a prior failed write), it is truncated back
    /// to the nearest complete record.
    pub fn open(path: impl AsRef<Path>, width: usize) -> Result<Self> {
        assert!(width > 0, "record width must be non-zero");
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        let count = size / width as u64;
        let complete_size = count * width as u64;
        if complete_size != size {
            debug!(
                "truncating dangling partial record in {:?}: {} -> {} bytes",
                path, size, complete_size
            );
            file.set_len(complete_size)?;
        }

        trace!("opened table {:?} (width={}, count={})", path, width, count);
        Ok(Table {
            path,
            file,
            width,
            count,
        })
    }

    /// The fixed record width of this table, in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The number of complete records currently stored.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` (which must be exactly [`Table::width`] bytes) and
    /// returns the index it was assigned. Indices are issued `0, 1, 2, …`
    /// and never reused.
    pub fn insert(&mut self, record: &[u8]) -> Result<u64> {
        self.check_width(record.len())?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(record)?;
        self.file.flush()?;
        let index = self.count;
        self.count += 1;
        Ok(index)
    }

    /// Reads the record at `index`. [`Error::Index`] if out of range.
    pub fn get(&mut self, index: u64) -> Result<Vec<u8>> {
        self.check_index(index)?;
        let mut buf = vec![0u8; self.width];
        self.file.seek(SeekFrom::Start(index * self.width as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrites the record at `index` in place. The table's `count` is
    /// unchanged. [`Error::Index`] if out of range.
    pub fn update(&mut self, index: u64, record: &[u8]) -> Result<()> {
        self.check_index(index)?;
        self.check_width(record.len())?;
        self.file.seek(SeekFrom::Start(index * self.width as u64))?;
        self.file.write_all(record)?;
        self.file.flush()?;
        Ok(())
    }

    /// Flushes and releases the underlying file handle.
    pub fn close(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    fn check_width(&self, len: usize) -> Result<()> {
        if len != self.width {
            return Err(Error::WidthMismatch {
                expected: self.width,
                actual: len,
            });
        }
        Ok(())
    }

    fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.count {
            return Err(Error::Index {
                index,
                count: self.count,
            });
        }
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}

/// Wraps an element-typed [`Table`] to store homogeneous sequences,
/// returning `(start_index, length)` references for inline storage in a
/// parent composite record.
#[derive(Debug)]
pub struct ArrayTable {
    elements: Table,
}

impl ArrayTable {
    pub fn new(elements: Table) -> Self {
        ArrayTable { elements }
    }

    pub fn element_table(&self) -> &Table {
        &self.elements
    }

    pub fn element_table_mut(&mut self) -> &mut Table {
        &mut self.elements
    }

    /// Appends each of `elements` (already encoded to the element's own
    /// row width) and returns `(start_index, length)`. An empty slice
    /// returns `(0, 0)` without touching the underlying table.
    pub fn insert(&mut self, elements: &[Vec<u8>]) -> Result<(u64, u64)> {
        if elements.is_empty() {
            return Ok((0, 0));
        }
        let start = self.elements.count();
        for element in elements {
            self.elements.insert(element)?;
        }
        Ok((start, elements.len() as u64))
    }

    /// Returns the `length` consecutive element rows starting at `start`.
    /// `length == 0` always yields an empty vector, regardless of `start`.
    pub fn get(&mut self, start: u64, length: u64) -> Result<Vec<Vec<u8>>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        (start..start + length).map(|i| self.elements.get(i)).collect()
    }

    pub fn close(&mut self) -> Result<()> {
        self.elements.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn insert_assigns_monotone_indices() {
        let dir = tempdir().unwrap();
        let mut t = Table::open(dir.path().join("t.bin"), 4).unwrap();
        assert_eq!(t.insert(&[1, 2, 3, 4]).unwrap(), 0);
        assert_eq!(t.insert(&[5, 6, 7, 8]).unwrap(), 1);
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn get_round_trips_and_rejects_out_of_range() {
        let dir = tempdir().unwrap();
        let mut t = Table::open(dir.path().join("t.bin"), 2).unwrap();
        t.insert(&[9, 9]).unwrap();
        assert_eq!(t.get(0).unwrap(), vec![9, 9]);
        assert!(matches!(t.get(1), Err(Error::Index { .. })));
    }

    #[test]
    fn update_preserves_count_and_width() {
        let dir = tempdir().unwrap();
        let mut t = Table::open(dir.path().join("t.bin"), 3).unwrap();
        t.insert(&[1, 1, 1]).unwrap();
        t.update(0, &[2, 2, 2]).unwrap();
        assert_eq!(t.get(0).unwrap(), vec![2, 2, 2]);
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn reopen_truncates_dangling_partial_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        {
            let mut t = Table::open(&path, 4).unwrap();
            t.insert(&[1, 2, 3, 4]).unwrap();
        }
        // Simulate a torn write: append 2 dangling bytes directly.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xAA, 0xBB]).unwrap();
        }
        let t = Table::open(&path, 4).unwrap();
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn array_table_empty_insert_is_zero_zero() {
        let dir = tempdir().unwrap();
        let elements = Table::open(dir.path().join("e.bin"), 1).unwrap();
        let mut arr = ArrayTable::new(elements);
        assert_eq!(arr.insert(&[]).unwrap(), (0, 0));
        assert_eq!(arr.get(5, 0).unwrap(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn array_table_insert_and_get_consecutive_range() {
        let dir = tempdir().unwrap();
        let elements = Table::open(dir.path().join("e.bin"), 1).unwrap();
        let mut arr = ArrayTable::new(elements);
        let (start, len) = arr
            .insert(&[vec![b'a'], vec![b'b'], vec![b'c']])
            .unwrap();
        assert_eq!((start, len), (0, 3));
        assert_eq!(
            arr.get(start, len).unwrap(),
            vec![vec![b'a'], vec![b'b'], vec![b'c']]
        );
    }
}
