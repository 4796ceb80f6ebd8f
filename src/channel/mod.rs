//! The dashboard summary channel: a POSIX message queue carrying one
//! fixed-layout record per flushed batch.
//!
//! The record layout is shared with the out-of-process dashboard reader, so
//! it is packed with no padding and uses host byte order (both processes
//! are co-resident). The producer side never blocks: when the queue is full
//! the summary is dropped, since the durable path has already persisted the
//! batch. The consumer side opens lazily with retries, because the queue
//! only exists once the first batch flushes.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::mqueue::{mq_close, mq_open, mq_receive, mq_send, mq_unlink, MQ_OFlag, MqAttr, MqdT};
use nix::sys::stat::Mode;
use parking_lot::Mutex;

/// Well-known name of the summary queue.
pub const SUMMARY_QUEUE_NAME: &str = "/container_max_metric_mq";
/// Maximum number of queued records.
pub const SUMMARY_QUEUE_CAPACITY: i64 = 100;
/// Exact wire size of one record.
pub const SUMMARY_MESSAGE_SIZE: usize = 124;

const ID_CAPACITY: usize = 100;
const OPEN_RETRY_ATTEMPTS: u32 = 50;
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid queue name `{0}`")]
    InvalidName(String),
    #[error("failed to open message queue: {0}")]
    Open(#[source] Errno),
    #[error("message queue `{name}` did not appear after {attempts} attempts")]
    OpenTimeout { name: String, attempts: u32 },
    #[error("failed to receive from message queue: {0}")]
    Receive(#[source] Errno),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The per-batch summary record: the maxima over one batch plus the
/// container name, null-padded to 100 bytes.
///
/// Field order and packing are wire contract; `size_of` must be exactly
/// 8+8+8+100 = 124 bytes.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct SummaryMessage {
    pub max_cpu_pct: f64,
    pub max_mem_pct: f64,
    pub max_pid_pct: f64,
    pub id: [u8; ID_CAPACITY],
}

impl SummaryMessage {
    /// Builds a record, truncating the name to 99 bytes so the id field
    /// stays null-terminated.
    pub fn new(name: &str, max_cpu_pct: f64, max_mem_pct: f64, max_pid_pct: f64) -> Self {
        let mut id = [0u8; ID_CAPACITY];
        let bytes = name.as_bytes();
        let len = bytes.len().min(ID_CAPACITY - 1);
        id[..len].copy_from_slice(&bytes[..len]);
        Self {
            max_cpu_pct,
            max_mem_pct,
            max_pid_pct,
            id,
        }
    }

    /// The container name, without trailing NULs.
    pub fn name(&self) -> &str {
        let end = self.id.iter().position(|b| *b == 0).unwrap_or(ID_CAPACITY);
        std::str::from_utf8(&self.id[..end]).unwrap_or("")
    }

    /// Serializes to the packed wire layout in host byte order.
    pub fn to_bytes(&self) -> [u8; SUMMARY_MESSAGE_SIZE] {
        let mut buf = [0u8; SUMMARY_MESSAGE_SIZE];
        buf[0..8].copy_from_slice(&{ self.max_cpu_pct }.to_ne_bytes());
        buf[8..16].copy_from_slice(&{ self.max_mem_pct }.to_ne_bytes());
        buf[16..24].copy_from_slice(&{ self.max_pid_pct }.to_ne_bytes());
        buf[24..].copy_from_slice(&self.id);
        buf
    }

    /// Deserializes from the packed wire layout.
    ///
    /// Returns `None` when the buffer is shorter than one record.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < SUMMARY_MESSAGE_SIZE {
            return None;
        }
        let mut id = [0u8; ID_CAPACITY];
        id.copy_from_slice(&buf[24..SUMMARY_MESSAGE_SIZE]);
        Some(Self {
            max_cpu_pct: f64::from_ne_bytes(buf[0..8].try_into().ok()?),
            max_mem_pct: f64::from_ne_bytes(buf[8..16].try_into().ok()?),
            max_pid_pct: f64::from_ne_bytes(buf[16..24].try_into().ok()?),
            id,
        })
    }
}

impl std::fmt::Debug for SummaryMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (cpu, mem, pid) = (self.max_cpu_pct, self.max_mem_pct, self.max_pid_pct);
        f.debug_struct("SummaryMessage")
            .field("max_cpu_pct", &cpu)
            .field("max_mem_pct", &mem)
            .field("max_pid_pct", &pid)
            .field("id", &self.name())
            .finish()
    }
}

/// Send-capability for batch summaries, shared by all workers.
pub trait SummarySink: Send + Sync {
    fn send(&self, msg: &SummaryMessage);
}

/// [`SummarySink`] backed by the POSIX message queue.
///
/// The queue is created on the first send (`O_RDWR | O_CREAT`, mode 0644).
/// Sends are non-blocking; a full queue drops the record with a debug log,
/// an open failure is retried on the next send attempt.
pub struct MqSummarySink {
    name: CString,
    mqd: Mutex<Option<MqdT>>,
    open_failed_logged: AtomicBool,
}

impl MqSummarySink {
    pub fn new(name: &str) -> Result<Self> {
        let cname = CString::new(name).map_err(|_| Error::InvalidName(name.to_owned()))?;
        Ok(Self {
            name: cname,
            mqd: Mutex::new(None),
            open_failed_logged: AtomicBool::new(false),
        })
    }

    fn open(&self) -> std::result::Result<MqdT, Errno> {
        let attr = MqAttr::new(
            0,
            SUMMARY_QUEUE_CAPACITY,
            SUMMARY_MESSAGE_SIZE as i64,
            0,
        );
        mq_open(
            self.name.as_c_str(),
            MQ_OFlag::O_RDWR | MQ_OFlag::O_CREAT | MQ_OFlag::O_NONBLOCK,
            Mode::from_bits_truncate(0o644),
            Some(&attr),
        )
    }
}

impl SummarySink for MqSummarySink {
    fn send(&self, msg: &SummaryMessage) {
        let mut guard = self.mqd.lock();
        if guard.is_none() {
            match self.open() {
                Ok(mqd) => {
                    *guard = Some(mqd);
                    self.open_failed_logged.store(false, Ordering::Relaxed);
                }
                Err(errno) => {
                    if !self.open_failed_logged.swap(true, Ordering::Relaxed) {
                        log::warn!("failed to open summary queue: {errno}");
                    }
                    return;
                }
            }
        }

        let mqd = guard.as_ref().expect("handle opened above");
        match mq_send(mqd, &msg.to_bytes(), 0) {
            Ok(()) => {}
            Err(Errno::EAGAIN) => {
                log::debug!("summary queue full, dropping summary for `{}`", msg.name());
            }
            Err(errno) => {
                log::warn!("failed to send summary for `{}`: {errno}", msg.name());
                // reopen on the next send
                if let Some(mqd) = guard.take() {
                    let _ = mq_close(mqd);
                }
            }
        }
    }
}

impl Drop for MqSummarySink {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.lock().take() {
            let _ = mq_close(mqd);
        }
    }
}

/// Consumer side of the summary queue, used by the dashboard reader
/// process.
pub struct MqSummaryConsumer {
    mqd: Option<MqdT>,
}

impl MqSummaryConsumer {
    /// Opens the queue read-only, retrying up to 50 times at one-second
    /// intervals while the producer has not created it yet.
    pub fn open(name: &str) -> Result<Self> {
        Self::open_with_retries(name, OPEN_RETRY_ATTEMPTS, OPEN_RETRY_DELAY)
    }

    pub fn open_with_retries(name: &str, attempts: u32, delay: Duration) -> Result<Self> {
        let cname = CString::new(name).map_err(|_| Error::InvalidName(name.to_owned()))?;
        for attempt in 1..=attempts {
            match mq_open(
                cname.as_c_str(),
                MQ_OFlag::O_RDONLY | MQ_OFlag::O_NONBLOCK,
                Mode::empty(),
                None,
            ) {
                Ok(mqd) => {
                    log::debug!("summary queue opened on attempt {attempt}");
                    return Ok(Self { mqd: Some(mqd) });
                }
                Err(Errno::ENOENT) if attempt < attempts => thread::sleep(delay),
                Err(Errno::ENOENT) => break,
                Err(errno) => return Err(Error::Open(errno)),
            }
        }
        Err(Error::OpenTimeout {
            name: name.to_owned(),
            attempts,
        })
    }

    /// Receives one record if available.
    ///
    /// Returns `Ok(None)` when the queue is currently empty.
    pub fn try_recv(&self) -> Result<Option<SummaryMessage>> {
        let Some(mqd) = &self.mqd else {
            return Ok(None);
        };
        let mut buf = [0u8; SUMMARY_MESSAGE_SIZE];
        let mut prio = 0u32;
        match mq_receive(mqd, &mut buf, &mut prio) {
            Ok(_) => Ok(SummaryMessage::from_bytes(&buf)),
            Err(Errno::EAGAIN) => Ok(None),
            Err(errno) => Err(Error::Receive(errno)),
        }
    }
}

impl Drop for MqSummaryConsumer {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            let _ = mq_close(mqd);
        }
    }
}

/// Removes a stale queue left behind by a previous run.
///
/// Called explicitly at startup before any producer opens the queue; a
/// missing queue is the normal case and not an error.
pub fn unlink_stale(name: &str) {
    let Ok(cname) = CString::new(name) else {
        return;
    };
    match mq_unlink(cname.as_c_str()) {
        Ok(()) => log::info!("unlinked stale summary queue `{name}`"),
        Err(Errno::ENOENT) => {}
        Err(errno) => log::warn!("failed to unlink summary queue `{name}`: {errno}"),
    }
}
