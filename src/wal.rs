use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::model::Event;

/// Encode one record as `[u32 len][bincode][u32 crc32]`, little endian.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Read one record. `Ok(None)` on a clean end, a torn tail, or a bad checksum.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, 8 + len as u64))),
        Err(_) => Ok(None),
    }
}

/// `read_exact` that reports EOF as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of reading a log from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the valid prefix. Anything after it is a torn or
    /// corrupt tail and gets cut off when the log is reopened.
    pub valid_len: u64,
}

/// Append-only event log of one organization.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Read every intact record from `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some((event, size)) = decode_record(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += size;
        }
        if replay.valid_len < file_len {
            warn!(
                path = %path.display(),
                discarded = file_len - replay.valid_len,
                "WAL has a damaged tail; dropping it"
            );
        }
        Ok(replay)
    }

    /// Open for appending, first cutting the file back to `valid_len` so new
    /// records never land behind garbage.
    pub fn open(path: &Path, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
        }
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer one record; nothing is durable until `sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `snapshot`: write a temp file, fsync it, rename it
    /// over the log and reopen.
    pub fn rewrite(&mut self, snapshot: &[Event]) -> io::Result<()> {
        self.sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in snapshot {
                encode_record(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }
}

// ── Group commit ─────────────────────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        done: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        snapshot: Vec<Event>,
        done: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        done: oneshot::Sender<u64>,
    },
}

/// Cloneable handle to the task that owns a `Wal`.
///
/// Appends that arrive while a flush is in progress are written together
/// and share a single fsync.
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalHandle {
    /// Must be called inside a Tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Resolves once the event is durable.
    pub async fn append(&self, event: Event) -> io::Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(WalCommand::Append { event, done }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn rewrite(&self, snapshot: Vec<Event>) -> io::Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(WalCommand::Rewrite { snapshot, done }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn appends_since_compact(&self) -> io::Result<u64> {
        let (done, rx) = oneshot::channel();
        self.send(WalCommand::AppendsSinceCompact { done }).await?;
        rx.await.map_err(|_| writer_gone())
    }

    async fn send(&self, cmd: WalCommand) -> io::Result<()> {
        self.tx.send(cmd).await.map_err(|_| writer_gone())
    }
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "WAL writer stopped")
}

async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut pending: Vec<oneshot::Sender<io::Result<()>>> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, done } => {
                    let res = wal.append_buffered(&event);
                    match res {
                        Ok(()) => pending.push(done),
                        Err(e) => {
                            let _ = done.send(Err(e));
                        }
                    }
                    // Keep draining whatever is already queued into this batch.
                    next = rx.try_recv().ok();
                }
                other => {
                    commit(&mut wal, &mut pending);
                    handle_control(&mut wal, other);
                    next = rx.try_recv().ok();
                }
            }
        }
        commit(&mut wal, &mut pending);
    }
}

fn commit(wal: &mut Wal, pending: &mut Vec<oneshot::Sender<io::Result<()>>>) {
    if pending.is_empty() {
        return;
    }
    let started = Instant::now();
    let result = wal.sync();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(pending.len() as f64);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!(path = %wal.path().display(), "WAL sync failed: {e}");
    }
    for done in pending.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = done.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Rewrite { snapshot, done } => {
            debug!(path = %wal.path().display(), records = snapshot.len(), "rewriting WAL");
            let _ = done.send(wal.rewrite(&snapshot));
        }
        WalCommand::AppendsSinceCompact { done } => {
            let _ = done.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}
