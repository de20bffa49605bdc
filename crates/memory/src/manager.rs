use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::backing_store::BackingStore;
use crate::frame::{FrameInfo, FrameTable, PageTag};

/// Per-process page-table entry. A valid entry names the frame its page
/// occupies; the frame's tag always points back at (pid, vpn).
#[derive(Debug, Clone, Default)]
pub struct PageTableEntry {
    pub frame: Option<usize>,
    pub dirty: bool,
    pub referenced: bool,
}

impl PageTableEntry {
    pub fn valid(&self) -> bool {
        self.frame.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The frame table has no free frame and the eviction queue drained
    /// without yielding an occupied one.
    NoFrames,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::NoFrames => write!(f, "no frames available"),
        }
    }
}

impl std::error::Error for AllocError {}

/// Point-in-time view of physical memory, used by status reports.
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub frame_size: usize,
    pub total_bytes: usize,
    pub total_frames: usize,
    pub used_frames: usize,
    /// (pid, resident page count) for every registered process with at
    /// least one resident page, ascending by pid.
    pub resident: Vec<(u32, usize)>,
}

impl MemoryStats {
    pub fn free_frames(&self) -> usize {
        self.total_frames - self.used_frames
    }

    pub fn used_bytes(&self) -> usize {
        self.used_frames * self.frame_size
    }
}

struct ProcMem {
    mem_size: usize,
    page_table: Vec<PageTableEntry>,
    /// Sparse page contents, keyed by the 2-byte-aligned byte address. A
    /// missing key reads as zero.
    words: BTreeMap<u32, u16>,
}

struct Inner {
    frames: FrameTable,
    procs: HashMap<u32, ProcMem>,
}

/// Owner of all physical-memory state: the frame table, the FIFO eviction
/// queue, every process's page table, and the page contents themselves.
///
/// Keeping the per-process tables here rather than inside the process
/// records means evicting a victim page never touches another process's
/// lock: one mutex guards the whole resident set, and the backing-store
/// mutex nests strictly inside it.
pub struct MemoryManager {
    frame_size: usize,
    total_bytes: usize,
    store: BackingStore,
    pages_in: AtomicU64,
    pages_out: AtomicU64,
    inner: Mutex<Inner>,
}

impl MemoryManager {
    pub fn new(total_bytes: usize, frame_size: usize, store_path: impl Into<PathBuf>) -> Self {
        let num_frames = total_bytes / frame_size;
        Self {
            frame_size,
            total_bytes,
            store: BackingStore::new(store_path, frame_size),
            pages_in: AtomicU64::new(0),
            pages_out: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                frames: FrameTable::new(num_frames),
                procs: HashMap::new(),
            }),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Total page-in events so far; every fault that acquires a frame
    /// counts exactly once.
    pub fn pages_paged_in(&self) -> u64 {
        self.pages_in.load(Ordering::Relaxed)
    }

    /// Total evictions of occupied frames so far.
    pub fn pages_paged_out(&self) -> u64 {
        self.pages_out.load(Ordering::Relaxed)
    }

    /// Install an all-invalid page table of `ceil(mem_size / frame_size)`
    /// entries for `pid`. Re-registering an existing pid resets it: its
    /// frames are freed (without page-out) and its contents dropped.
    pub fn register_process(&self, pid: u32, mem_size: usize) {
        let mut inner = self.inner.lock().unwrap();
        Self::release_locked(&mut inner, pid);
        let pages = mem_size.div_ceil(self.frame_size);
        inner.procs.insert(
            pid,
            ProcMem {
                mem_size,
                page_table: vec![PageTableEntry::default(); pages],
                words: BTreeMap::new(),
            },
        );
    }

    /// Free every frame owned by `pid` without paging out, and forget its
    /// tables. Used when a process terminates or the scheduler restarts.
    pub fn release_process(&self, pid: u32) {
        let mut inner = self.inner.lock().unwrap();
        Self::release_locked(&mut inner, pid);
    }

    fn release_locked(inner: &mut Inner, pid: u32) {
        for idx in 0..inner.frames.len() {
            if inner.frames.get(idx).owner.map(|t| t.pid) == Some(pid) {
                inner.frames.free_frame(idx);
            }
        }
        inner.procs.remove(&pid);
    }

    /// Make `vpn` of `pid` resident and return its frame index, faulting it
    /// in (and evicting a victim) if necessary.
    pub fn ensure_resident(&self, pid: u32, vpn: usize) -> Result<usize, AllocError> {
        let mut inner = self.inner.lock().unwrap();
        self.ensure_resident_locked(&mut inner, pid, vpn)
    }

    /// Read the 16-bit word containing byte `addr` of `pid`'s memory,
    /// faulting the page in first. The caller has already validated that
    /// `addr` is inside the process's address space.
    pub fn read_word(&self, pid: u32, addr: u32) -> Result<u16, AllocError> {
        let mut inner = self.inner.lock().unwrap();
        let vpn = addr as usize / self.frame_size;
        self.ensure_resident_locked(&mut inner, pid, vpn)?;
        let proc = inner.procs.get(&pid).expect("pid registered");
        Ok(proc.words.get(&(addr & !1)).copied().unwrap_or(0))
    }

    /// Store a 16-bit word at byte `addr` of `pid`'s memory, faulting the
    /// page in first and marking both the page-table entry and the frame
    /// dirty.
    pub fn write_word(&self, pid: u32, addr: u32, value: u16) -> Result<(), AllocError> {
        let mut inner = self.inner.lock().unwrap();
        let vpn = addr as usize / self.frame_size;
        let frame = self.ensure_resident_locked(&mut inner, pid, vpn)?;
        inner.frames.get_mut(frame).dirty = true;
        let proc = inner.procs.get_mut(&pid).expect("pid registered");
        proc.words.insert(addr & !1, value);
        proc.page_table[vpn].dirty = true;
        Ok(())
    }

    fn ensure_resident_locked(
        &self,
        inner: &mut Inner,
        pid: u32,
        vpn: usize,
    ) -> Result<usize, AllocError> {
        let entry = inner
            .procs
            .get(&pid)
            .expect("pid registered")
            .page_table
            .get(vpn)
            .cloned()
            .expect("vpn within page table");
        if let Some(frame) = entry.frame {
            inner.frames.get_mut(frame).referenced = true;
            inner.procs.get_mut(&pid).expect("pid registered").page_table[vpn].referenced = true;
            return Ok(frame);
        }

        self.pages_in.fetch_add(1, Ordering::Relaxed);

        let victim = match inner.frames.find_free() {
            Some(idx) => idx,
            None => inner.frames.pop_victim().ok_or(AllocError::NoFrames)?,
        };

        // Flush-on-evict: only dirty pages are worth writing back.
        if let Some(tag) = inner.frames.get(victim).owner {
            if inner.frames.get(victim).dirty {
                let words = self.collect_page(inner, tag);
                self.store.page_out(tag.pid, tag.vpn, &words);
            }
            if let Some(owner) = inner.procs.get_mut(&tag.pid) {
                if let Some(pte) = owner.page_table.get_mut(tag.vpn) {
                    *pte = PageTableEntry::default();
                }
            }
            self.pages_out.fetch_add(1, Ordering::Relaxed);
            inner.frames.free_frame(victim);
            log::debug!(
                "evicted frame {victim} (pid={} vpn={}) for pid={pid} vpn={vpn}",
                tag.pid,
                tag.vpn
            );
        }

        // Page-in; a miss means the page has never left RAM and reads as
        // zero-filled.
        if let Some(words) = self.store.page_in(pid, vpn) {
            let base = (vpn * self.frame_size) as u32;
            let proc = inner.procs.get_mut(&pid).expect("pid registered");
            for (i, &word) in words.iter().enumerate() {
                let addr = base + 2 * i as u32;
                if word != 0 {
                    proc.words.insert(addr, word);
                } else {
                    proc.words.remove(&addr);
                }
            }
        }

        let tag = PageTag { pid, vpn };
        *inner.frames.get_mut(victim) = FrameInfo {
            owner: Some(tag),
            dirty: false,
            referenced: true,
        };
        inner.frames.mark_loaded(victim);
        inner.procs.get_mut(&pid).expect("pid registered").page_table[vpn] = PageTableEntry {
            frame: Some(victim),
            dirty: false,
            referenced: true,
        };
        Ok(victim)
    }

    fn collect_page(&self, inner: &Inner, tag: PageTag) -> Vec<u16> {
        let proc = inner.procs.get(&tag.pid).expect("victim owner registered");
        let base = (tag.vpn * self.frame_size) as u32;
        (0..self.store.words_per_page())
            .map(|i| proc.words.get(&(base + 2 * i as u32)).copied().unwrap_or(0))
            .collect()
    }

    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock().unwrap();
        let mut resident: Vec<(u32, usize)> = inner
            .procs
            .iter()
            .map(|(&pid, proc)| (pid, proc.page_table.iter().filter(|e| e.valid()).count()))
            .filter(|&(_, pages)| pages > 0)
            .collect();
        resident.sort_unstable_by_key(|&(pid, _)| pid);
        MemoryStats {
            frame_size: self.frame_size,
            total_bytes: self.total_bytes,
            total_frames: inner.frames.len(),
            used_frames: inner.frames.used(),
            resident,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.stats().used_bytes()
    }

    /// Registered address-space size for `pid`, if it is registered.
    pub fn mem_size(&self, pid: u32) -> Option<usize> {
        self.inner.lock().unwrap().procs.get(&pid).map(|p| p.mem_size)
    }

    // Inspection hooks for invariant checks in tests and reports.

    pub fn frame_snapshot(&self) -> Vec<FrameInfo> {
        self.inner.lock().unwrap().frames.snapshot()
    }

    pub fn eviction_queue_snapshot(&self) -> Vec<usize> {
        self.inner.lock().unwrap().frames.fifo_snapshot()
    }

    pub fn page_table_snapshot(&self, pid: u32) -> Option<Vec<PageTableEntry>> {
        self.inner
            .lock()
            .unwrap()
            .procs
            .get(&pid)
            .map(|p| p.page_table.clone())
    }
}
