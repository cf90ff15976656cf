//! File-backed record store.
//!
//! One file, one entity type. The header carries a magic, the format
//! version, the slot size, and the next unallocated ID so that a reopened
//! store resumes allocation where it stopped. The file is held under an
//! exclusive advisory lock for the life of the store.
//!
//! Reads and writes are positional (`pread`/`pwrite`), so any number of
//! threads may share one `&RecordStore`.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::marker::PhantomData;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fortuna_core::{Error, Result};

use crate::record::Record;
use crate::slot::{get_u32, get_u64};

/// Bytes reserved at the start of the file.
pub const HEADER_SIZE: u64 = 64;

/// First ID handed out by an empty store.
pub const FIRST_ID: u64 = 0;

const MAGIC: [u8; 8] = *b"FORTUNA\0";
const FORMAT_VERSION: u32 = 1;

const MAGIC_AT: usize = 0;
const VERSION_AT: usize = 8;
const SLOT_SIZE_AT: usize = 12;
const NEXT_ID_AT: usize = 16;

/// Fixed-slot store for records of type `R`.
pub struct RecordStore<R: Record> {
    file: File,
    path: PathBuf,
    next_id: AtomicU64,
    /// Highest `next_id` written to the header. Serializes header updates.
    persisted: Mutex<u64>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordStore<R> {
    /// Open `path`, creating it when absent.
    ///
    /// Fails with `Busy` when another store holds the file, and with
    /// `Corrupt` when the header does not describe `R`'s layout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = fs2::FileExt::try_lock_exclusive(&file) {
            return Err(if e.kind() == ErrorKind::WouldBlock {
                Error::Busy(path.display().to_string())
            } else {
                Error::Io(e)
            });
        }

        let len = file.metadata()?.len();
        let next_id = if len == 0 {
            write_header(&file, R::SLOT_SIZE, FIRST_ID)?;
            FIRST_ID
        } else {
            read_header(&file, len, R::SLOT_SIZE)?
        };

        tracing::debug!(
            path = %path.display(),
            next_id,
            slot_size = R::SLOT_SIZE,
            "record store opened"
        );

        Ok(Self {
            file,
            path,
            next_id: AtomicU64::new(next_id),
            persisted: Mutex::new(next_id),
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next ID that `increment_next_id` will hand out.
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::Acquire)
    }

    /// Remove every record and restart allocation at [`FIRST_ID`].
    pub fn drop_all(&self) -> Result<()> {
        let mut persisted = self.lock_persisted();
        self.file.set_len(HEADER_SIZE)?;
        self.next_id.store(FIRST_ID, Ordering::Release);
        write_next_id(&self.file, FIRST_ID)?;
        *persisted = FIRST_ID;
        tracing::debug!(path = %self.path.display(), "record store dropped");
        Ok(())
    }

    /// Allocate the next ID. Safe to call from many threads; every caller
    /// receives a distinct value.
    pub fn increment_next_id(&self) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.persist_next_id()?;
        Ok(id)
    }

    /// Encode `input` into the slot for `id`.
    ///
    /// `id` must have been returned by [`increment_next_id`](Self::increment_next_id).
    /// Validation happens before any I/O, so a rejected write leaves the
    /// file untouched.
    pub fn write(&self, id: u64, input: R::Input<'_>) -> Result<()> {
        let next = self.next_id();
        if id >= next {
            return Err(Error::Validation(format!(
                "id {id} was never allocated (next id is {next})"
            )));
        }
        let mut slot = vec![0u8; R::SLOT_SIZE];
        R::encode(id, &input, &mut slot)?;
        self.file.write_all_at(&slot, slot_offset::<R>(id))?;
        Ok(())
    }

    /// Read up to `buf.len()` records starting at `*cursor` and advance the
    /// cursor past them. Returns the number of records read; `0` means the
    /// cursor is at the end of the allocated range.
    ///
    /// Allocated slots that were never written decode as zeroed records.
    pub fn read_many(&self, cursor: &mut u64, buf: &mut [R]) -> Result<usize> {
        let end = self.next_id();
        if *cursor >= end || buf.is_empty() {
            return Ok(0);
        }
        let count = (end - *cursor).min(buf.len() as u64) as usize;
        let mut raw = vec![0u8; count * R::SLOT_SIZE];
        read_full_at(&self.file, &mut raw, slot_offset::<R>(*cursor))?;

        for (dst, slot) in buf.iter_mut().zip(raw.chunks_exact(R::SLOT_SIZE)) {
            *dst = R::decode(slot)?;
        }
        *cursor += count as u64;
        Ok(count)
    }

    /// Flush data and header to stable storage and release the lock.
    pub fn close(self) -> Result<()> {
        self.persist_next_id()?;
        self.file.sync_all()?;
        tracing::debug!(path = %self.path.display(), "record store closed");
        Ok(())
    }

    fn persist_next_id(&self) -> Result<()> {
        let mut persisted = self.lock_persisted();
        let target = self.next_id.load(Ordering::Acquire);
        if target != *persisted {
            write_next_id(&self.file, target)?;
            *persisted = target;
        }
        Ok(())
    }

    fn lock_persisted(&self) -> std::sync::MutexGuard<'_, u64> {
        self.persisted.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<R: Record> std::fmt::Debug for RecordStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("next_id", &self.next_id())
            .finish()
    }
}

#[inline]
fn slot_offset<R: Record>(id: u64) -> u64 {
    HEADER_SIZE + id * R::SLOT_SIZE as u64
}

fn write_header(file: &File, slot_size: usize, next_id: u64) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[MAGIC_AT..VERSION_AT].copy_from_slice(&MAGIC);
    header[VERSION_AT..SLOT_SIZE_AT].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[SLOT_SIZE_AT..NEXT_ID_AT].copy_from_slice(&(slot_size as u32).to_le_bytes());
    header[NEXT_ID_AT..NEXT_ID_AT + 8].copy_from_slice(&next_id.to_le_bytes());
    file.write_all_at(&header, 0)?;
    Ok(())
}

fn write_next_id(file: &File, next_id: u64) -> Result<()> {
    file.write_all_at(&next_id.to_le_bytes(), NEXT_ID_AT as u64)?;
    Ok(())
}

fn read_header(file: &File, len: u64, slot_size: usize) -> Result<u64> {
    if len < HEADER_SIZE {
        return Err(Error::Corrupt(format!(
            "file is {len} bytes, shorter than the {HEADER_SIZE}-byte header"
        )));
    }
    let mut header = [0u8; HEADER_SIZE as usize];
    file.read_exact_at(&mut header, 0)?;

    if header[MAGIC_AT..VERSION_AT] != MAGIC {
        return Err(Error::Corrupt("bad magic".into()));
    }
    let version = get_u32(&header[VERSION_AT..SLOT_SIZE_AT]);
    if version != FORMAT_VERSION {
        return Err(Error::Corrupt(format!("unsupported format version {version}")));
    }
    let stored = get_u32(&header[SLOT_SIZE_AT..NEXT_ID_AT]) as usize;
    if stored != slot_size {
        return Err(Error::Corrupt(format!(
            "slot size {stored} on disk, {slot_size} expected"
        )));
    }
    Ok(get_u64(&header[NEXT_ID_AT..NEXT_ID_AT + 8]))
}

/// Fill `buf` from `offset`, zero-filling past end of file.
fn read_full_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match file.read_at(buf, offset) {
            Ok(0) => {
                buf.fill(0);
                return Ok(());
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
