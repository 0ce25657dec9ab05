//! In-memory storage backend with fault injection, for tests.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{StorageFile, TransferHint};

const NO_SIZE_OVERRIDE: i64 = i64::MIN;

#[derive(Debug)]
pub(crate) struct MemoryFile {
    name: String,
    path: String,
    is_dir: AtomicBool,
    exists: AtomicBool,
    content: Arc<Mutex<Vec<u8>>>,
    children: Mutex<Vec<Arc<MemoryFile>>>,
    reported_size: AtomicI64,
    hint: Mutex<TransferHint>,
    fail_open_reads: AtomicU32,
    fail_open_writes: AtomicU32,
    fail_reads: Mutex<Option<(u64, u32)>>,
    read_delay: Mutex<Duration>,
    max_chunk: Mutex<usize>,
    read_offsets: Mutex<Vec<u64>>,
    native_copies: AtomicU32,
    fail_delete: AtomicBool,
}

impl MemoryFile {
    fn build(name: &str, path: String, is_dir: bool, exists: bool, data: Vec<u8>) -> Arc<Self> {
        Arc::new(MemoryFile {
            name: name.to_string(),
            path,
            is_dir: AtomicBool::new(is_dir),
            exists: AtomicBool::new(exists),
            content: Arc::new(Mutex::new(data)),
            children: Mutex::new(Vec::new()),
            reported_size: AtomicI64::new(NO_SIZE_OVERRIDE),
            hint: Mutex::new(TransferHint::StreamOnly),
            fail_open_reads: AtomicU32::new(0),
            fail_open_writes: AtomicU32::new(0),
            fail_reads: Mutex::new(None),
            read_delay: Mutex::new(Duration::ZERO),
            max_chunk: Mutex::new(usize::MAX),
            read_offsets: Mutex::new(Vec::new()),
            native_copies: AtomicU32::new(0),
            fail_delete: AtomicBool::new(false),
        })
    }

    pub(crate) fn file(name: &str, data: Vec<u8>) -> Arc<Self> {
        Self::build(name, format!("/mem/{}", name), false, true, data)
    }

    pub(crate) fn dir(name: &str, children: Vec<Arc<MemoryFile>>) -> Arc<Self> {
        let dir = Self::build(name, format!("/mem/{}", name), true, true, Vec::new());
        dir.children.lock().unwrap().extend(children);
        dir
    }

    pub(crate) fn as_storage(self: &Arc<Self>) -> Arc<dyn StorageFile> {
        Arc::clone(self) as Arc<dyn StorageFile>
    }

    pub(crate) fn content(&self) -> Vec<u8> {
        self.content.lock().unwrap().clone()
    }

    pub(crate) fn set_reported_size(&self, size: i64) {
        self.reported_size.store(size, Ordering::SeqCst);
    }

    pub(crate) fn set_hint(&self, hint: TransferHint) {
        *self.hint.lock().unwrap() = hint;
    }

    pub(crate) fn fail_next_open_reads(&self, times: u32) {
        self.fail_open_reads.store(times, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_open_writes(&self, times: u32) {
        self.fail_open_writes.store(times, Ordering::SeqCst);
    }

    /// The next `times` streams opened on this file fail once they reach
    /// absolute offset `at`.
    pub(crate) fn fail_reads_at(&self, at: u64, times: u32) {
        *self.fail_reads.lock().unwrap() = Some((at, times));
    }

    pub(crate) fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub(crate) fn slow_reads(&self, max_chunk: usize, delay: Duration) {
        *self.max_chunk.lock().unwrap() = max_chunk;
        *self.read_delay.lock().unwrap() = delay;
    }

    pub(crate) fn read_offsets(&self) -> Vec<u64> {
        self.read_offsets.lock().unwrap().clone()
    }

    pub(crate) fn native_copies(&self) -> u32 {
        self.native_copies.load(Ordering::SeqCst)
    }

    pub(crate) fn find_child(&self, name: &str) -> Option<Arc<MemoryFile>> {
        self.children
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StorageFile for MemoryFile {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn size(&self) -> i64 {
        let reported = self.reported_size.load(Ordering::SeqCst);
        if reported != NO_SIZE_OVERRIDE {
            return reported;
        }
        if !self.exists() {
            return -1;
        }
        if self.is_dir() {
            return 0;
        }
        self.content.lock().unwrap().len() as i64
    }

    fn exists(&self) -> bool {
        self.exists.load(Ordering::SeqCst)
    }

    fn is_dir(&self) -> bool {
        self.is_dir.load(Ordering::SeqCst)
    }

    fn open_read(&self, offset: u64) -> io::Result<Box<dyn Read + Send>> {
        if Self::take_one(&self.fail_open_reads) || !self.exists() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "cannot open source"));
        }
        self.read_offsets.lock().unwrap().push(offset);
        let fail_at = {
            let mut fail_reads = self.fail_reads.lock().unwrap();
            match fail_reads.as_mut() {
                Some((at, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*at)
                }
                _ => None,
            }
        };
        Ok(Box::new(MemoryReader {
            content: Arc::clone(&self.content),
            pos: offset,
            fail_at,
            delay: *self.read_delay.lock().unwrap(),
            max_chunk: *self.max_chunk.lock().unwrap(),
        }))
    }

    fn open_write(&self, append: bool) -> io::Result<Box<dyn Write + Send>> {
        if Self::take_one(&self.fail_open_writes) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "cannot open destination"));
        }
        self.exists.store(true, Ordering::SeqCst);
        if !append {
            self.content.lock().unwrap().clear();
        }
        Ok(Box::new(MemoryWriter {
            content: Arc::clone(&self.content),
        }))
    }

    fn children(&self) -> io::Result<Vec<Arc<dyn StorageFile>>> {
        Ok(self
            .children
            .lock()
            .unwrap()
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn StorageFile>)
            .collect())
    }

    fn child(&self, name: &str) -> io::Result<Arc<dyn StorageFile>> {
        if let Some(existing) = self.find_child(name) {
            return Ok(existing as Arc<dyn StorageFile>);
        }
        let child = Self::build(name, format!("{}/{}", self.path, name), false, false, Vec::new());
        self.children.lock().unwrap().push(Arc::clone(&child));
        Ok(child as Arc<dyn StorageFile>)
    }

    fn mkdir(&self) -> io::Result<()> {
        if self.exists() && !self.is_dir() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "a file is in the way"));
        }
        self.is_dir.store(true, Ordering::SeqCst);
        self.exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self) -> io::Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "cannot delete"));
        }
        self.exists.store(false, Ordering::SeqCst);
        self.content.lock().unwrap().clear();
        Ok(())
    }

    fn transfer_hint(&self, _dest: &dyn StorageFile) -> TransferHint {
        *self.hint.lock().unwrap()
    }

    fn copy_to(&self, dest: &dyn StorageFile) -> io::Result<()> {
        self.native_copies.fetch_add(1, Ordering::SeqCst);
        let data = self.content();
        dest.open_write(false)?.write_all(&data)
    }
}

struct MemoryReader {
    content: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    fail_at: Option<u64>,
    delay: Duration,
    max_chunk: usize,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(at) = self.fail_at {
            if self.pos >= at {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection lost"));
            }
        }
        let content = self.content.lock().unwrap();
        let start = (self.pos as usize).min(content.len());
        let mut end = content.len().min(start + buf.len().min(self.max_chunk));
        if let Some(at) = self.fail_at {
            end = end.min(at as usize).max(start);
        }
        let n = end - start;
        buf[..n].copy_from_slice(&content[start..end]);
        self.pos += n as u64;
        Ok(n)
    }
}

struct MemoryWriter {
    content: Arc<Mutex<Vec<u8>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.content.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
