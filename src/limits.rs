//! Server configuration: per-connection, per-request, and per-resource
//! limits and timeouts.
//!
//! Defaults are intentionally conservative (slowloris protection, header
//! flooding, memory exhaustion) and follow the concrete numbers used by
//! `original_source/mhttp/socket_wrapper.py` and `mhttp/files.py`.

use std::time::Duration;

/// Controls connection admission and worker-pool sizing.
///
/// A fixed worker pool is spawned once at startup and fed by a bounded
/// admission queue, rather than spawning a task per connection.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of long-lived worker tasks handling connections (default: `100`).
    pub max_connections: usize,
    /// Capacity of the admission queue between accept and a free worker
    /// (default: `250`). A connection accepted while the queue is full is
    /// dropped (the accept loop logs a warning) rather than queued; there
    /// is no spare capacity to hold it for, nor — for a TLS listener — a
    /// completed handshake yet to respond `503` over.
    pub max_pending_connections: usize,
    /// How a worker waits when the admission queue is momentarily empty
    /// (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
        }
    }
}

/// Strategy for worker task waiting when no connection is queued.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Yields to the runtime with [`tokio::task::yield_now`]. Busy-loops
    /// the worker at high CPU usage; prefer [`WaitStrategy::Sleep`] unless
    /// latency under light load is critical.
    Yield,
    /// Sleeps for the given duration between polls.
    Sleep(Duration),
}

/// Per-connection timeouts and request-count/lifetime caps.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Wall-clock deadline for a single socket read (default: `2s`).
    /// The primary defense against slowloris-style stalls.
    pub socket_read_timeout: Duration,
    /// Wall-clock deadline for a single socket write (default: `3s`).
    pub socket_write_timeout: Duration,
    /// Requests served before the connection is closed regardless of
    /// keep-alive (default: `100`).
    pub max_requests_per_connection: usize,
    /// Absolute connection lifetime from accept to close (default: `2
    /// minutes`), a final safety net independent of per-read timeouts.
    pub connection_lifetime: Duration,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            max_requests_per_connection: 100,
            connection_lifetime: Duration::from_secs(120),
        }
    }
}

/// Per-request budgets consumed by the [HTTP reader](crate::http::request) on
/// every I/O call: wall time, total body bytes, and header-section bytes.
/// Reset before each request is read.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Total wall-clock time allotted to reading one request, headers and
    /// body together (default: `100s`).
    pub request_timeout: Duration,
    /// Maximum request body size in bytes (default: `30 MB`).
    pub max_body_size: u64,
    /// Maximum bytes consumable while reading the header section, one
    /// `read_line` budget cap (default: `32 KB`).
    pub max_header_size: usize,
    /// Bytes a request body may occupy in memory before the [Temp-File
    /// Factory](crate::spool::TempFileFactory) spills it to disk (default:
    /// `64 KiB`, matching [`TempFileLimits::max_mem_size`]'s default).
    /// Independent of `max_body_size`, which only bounds the total; this
    /// is what actually triggers a spill for any body bigger than it.
    pub temp_file_spill_size: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(100),
            max_body_size: 30 * 1024 * 1024,
            max_header_size: 32 * 1024,
            temp_file_spill_size: 64 * 1024,
        }
    }
}

/// Threshold at which the [temp-file factory](crate::spool) spills a
/// body from memory to disk.
#[derive(Debug, Clone)]
pub struct TempFileLimits {
    /// Bytes a body may occupy in memory before it is spilled to a temp
    /// file (default: `64 KiB`).
    pub max_mem_size: usize,
}

impl Default for TempFileLimits {
    fn default() -> Self {
        Self {
            max_mem_size: 64 * 1024,
        }
    }
}

/// Limits applied while parsing `multipart/form-data` into a [`Form`](crate::form::Form).
#[derive(Debug, Clone)]
pub struct FormLimits {
    /// Bytes charged against header/name/filename/value sizes before
    /// `PayloadTooLarge` is raised (default: `64 KB`).
    pub max_mem_size: usize,
    /// Maximum number of fields a form may contain (default: `1000`).
    pub max_entries: usize,
}

impl Default for FormLimits {
    fn default() -> Self {
        Self {
            max_mem_size: 64 * 1024,
            max_entries: 1000,
        }
    }
}

/// Controls response buffering.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Chunk size used when streaming a sized or chunked body to the
    /// socket (default: `1024`, read and written in `≤1024`-byte pieces).
    pub io_chunk_size: usize,
}

impl Default for RespLimits {
    fn default() -> Self {
        Self { io_chunk_size: 1024 }
    }
}

/// Session TTL and sweep policy for the [`SessionManager`](crate::session::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Time a session survives without being touched (default: `20
    /// minutes`, matching `original_source/mhttp/server.py`'s
    /// `SessionManager(20*60)`).
    pub ttl: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(20 * 60),
        }
    }
}
