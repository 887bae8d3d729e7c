use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Pause after a failed read before trying again
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Shared stop flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Write half of the virtual interface.
///
/// Every frame is written with a single `write` call while holding the lock,
/// so responses completed concurrently never interleave on the interface.
pub struct FrameSink<W> {
    writer: Mutex<W>,
}

impl<W: Write> FrameSink<W> {
    pub fn new(writer: W) -> Self {
        FrameSink {
            writer: Mutex::new(writer),
        }
    }

    pub fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        // A panicked writer leaves no partial state behind the lock
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let written = writer.write(frame)?;
        if written != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write of {} out of {} bytes", written, frame.len()),
            ));
        }

        writer.flush()
    }

    /// Writes `frame`, logging instead of propagating a failure.
    pub fn send(&self, frame: &[u8]) {
        if let Err(e) = self.write_frame(frame) {
            tracing::error!("Error while writing a frame to the interface: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLoopExit {
    /// The stop flag was raised
    Stopped,
    /// A read returned 0 bytes
    Closed,
}

/// Blocking read loop. Hands every frame to `on_frame` until the interface
/// closes or `shutdown` is raised.
///
/// The flag is only checked between reads, so a stop takes effect once the
/// pending read returns.
pub fn read_frames<R, F>(
    mut reader: R,
    max_frame_size: usize,
    shutdown: &ShutdownHandle,
    mut on_frame: F,
) -> ReadLoopExit
where
    R: Read,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0; max_frame_size];
    loop {
        if shutdown.is_stopped() {
            return ReadLoopExit::Stopped;
        }

        match reader.read(&mut buf) {
            Ok(0) => return ReadLoopExit::Closed,
            Ok(len) => {
                if shutdown.is_stopped() {
                    return ReadLoopExit::Stopped;
                }
                on_frame(&buf[..len]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("Error while reading from the interface: {}", e);
                std::thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }
}
