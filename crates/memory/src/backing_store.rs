use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Disk-resident copy of pages that are not currently in a frame.
///
/// One record per (pid, vpn) pair, one line per record:
///
/// ```text
/// PID=3 VPN=0 DATA=002A 0000 FFFF ...
/// ```
///
/// with exactly `frame_size / 2` four-digit uppercase hex words per record.
/// Updates rewrite the whole file through a temp file + rename. A single
/// mutex serializes every read and write.
///
/// I/O failures degrade rather than propagate: a failed read behaves as a
/// miss (the caller zero-fills) and a failed write loses that page's data.
/// Both are reported through `log::error!`.
pub struct BackingStore {
    path: PathBuf,
    words_per_page: usize,
    lock: Mutex<()>,
}

struct Record {
    pid: u32,
    vpn: usize,
    words: Vec<u16>,
}

impl BackingStore {
    pub fn new(path: impl Into<PathBuf>, frame_size: usize) -> Self {
        Self {
            path: path.into(),
            words_per_page: (frame_size / 2).max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn words_per_page(&self) -> usize {
        self.words_per_page
    }

    /// Replace or insert the record for (pid, vpn). Called only for dirty
    /// victims, so a lost write means losing at most that one page.
    pub fn page_out(&self, pid: u32, vpn: usize, words: &[u16]) {
        let _guard = self.lock.lock().unwrap();
        if let Err(e) = self.rewrite_with(pid, vpn, words) {
            log::error!("backing store: page-out of pid={pid} vpn={vpn} failed: {e:#}");
        }
    }

    /// Fetch the stored words for (pid, vpn). `None` means the page has never
    /// been paged out (or the store is unreadable) and is zero-filled by the
    /// caller.
    pub fn page_in(&self, pid: u32, vpn: usize) -> Option<Vec<u16>> {
        let _guard = self.lock.lock().unwrap();
        match self.read_records() {
            Ok(records) => records
                .into_iter()
                .find(|r| r.pid == pid && r.vpn == vpn)
                .map(|r| r.words),
            Err(e) => {
                log::error!("backing store: page-in of pid={pid} vpn={vpn} failed: {e:#}");
                None
            }
        }
    }

    fn rewrite_with(&self, pid: u32, vpn: usize, words: &[u16]) -> Result<()> {
        let mut records = self.read_records().unwrap_or_else(|e| {
            log::error!("backing store: dropping unreadable contents: {e:#}");
            Vec::new()
        });
        match records.iter_mut().find(|r| r.pid == pid && r.vpn == vpn) {
            Some(record) => record.words = words.to_vec(),
            None => records.push(Record {
                pid,
                vpn,
                words: words.to_vec(),
            }),
        }

        let mut text = String::new();
        for record in &records {
            text.push_str(&format_record(record));
            text.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }

    fn read_records(&self) -> Result<Vec<Record>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        Ok(text.lines().filter_map(parse_record).collect())
    }
}

fn format_record(record: &Record) -> String {
    let data: Vec<String> = record.words.iter().map(|w| format!("{w:04X}")).collect();
    format!(
        "PID={} VPN={} DATA={}",
        record.pid,
        record.vpn,
        data.join(" ")
    )
}

fn parse_record(line: &str) -> Option<Record> {
    let mut tokens = line.split_whitespace();
    let pid = tokens.next()?.strip_prefix("PID=")?.parse().ok()?;
    let vpn = tokens.next()?.strip_prefix("VPN=")?.parse().ok()?;
    let first = tokens.next()?.strip_prefix("DATA=")?;
    let mut words = vec![u16::from_str_radix(first, 16).ok()?];
    for token in tokens {
        words.push(u16::from_str_radix(token, 16).ok()?);
    }
    Some(Record { pid, vpn, words })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> BackingStore {
        let path = std::env::temp_dir().join(format!(
            "backing-store-{tag}-{}.txt",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        BackingStore::new(path, 8)
    }

    #[test]
    fn round_trips_one_page() {
        let store = temp_store("roundtrip");
        store.page_out(1, 0, &[0x002A, 0, 0xFFFF, 7]);
        assert_eq!(store.page_in(1, 0), Some(vec![0x002A, 0, 0xFFFF, 7]));
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn update_replaces_record_in_place() {
        let store = temp_store("update");
        store.page_out(1, 0, &[1, 2, 3, 4]);
        store.page_out(2, 0, &[5, 6, 7, 8]);
        store.page_out(1, 0, &[9, 9, 9, 9]);

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(store.page_in(1, 0), Some(vec![9, 9, 9, 9]));
        assert_eq!(store.page_in(2, 0), Some(vec![5, 6, 7, 8]));
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn miss_reads_as_none() {
        let store = temp_store("miss");
        assert_eq!(store.page_in(42, 0), None);
    }

    #[test]
    fn words_are_four_digit_uppercase_hex() {
        let store = temp_store("format");
        store.page_out(3, 1, &[0xAB, 0]);
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("PID=3 VPN=1 DATA=00AB 0000"));
        let _ = fs::remove_file(store.path());
    }
}
