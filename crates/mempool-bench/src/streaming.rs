//! Background upload traffic on the copy queue
//!
//! A dedicated thread repeatedly uploads a configurable amount of zeroes
//! into a GPU-local buffer through the shared upload ring, without making
//! the graphics queue wait. It competes with the benchmark's own uploads for
//! ring space and bus bandwidth.

use crate::Result;
use mempool_gpu::{BufferDesc, BufferId, GpuDevice, HeapType};
use mempool_config::BACKGROUND_UPLOAD_SIZE_RANGE;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// Sleep between checks while the upload size is zero
pub const IDLE_SLEEP: Duration = Duration::from_millis(15);

/// Size of the destination buffer: the largest selectable upload
pub const BACKGROUND_BUFFER_SIZE: u64 = *BACKGROUND_UPLOAD_SIZE_RANGE.end() as u64 * MIB;

const THREAD_NAME: &str = "background-upload";

#[derive(Debug, Default)]
struct StreamerShared {
    running: AtomicBool,
    size_mb: AtomicU32,
    wait_ms: AtomicU32,
    uploads: AtomicU64,
    bytes: AtomicU64,
}

/// Handle to the background upload thread
///
/// Dropping the handle stops the thread and releases its buffer.
pub struct BackgroundStreamer<D: GpuDevice + 'static> {
    device: Arc<D>,
    shared: Arc<StreamerShared>,
    buffer: BufferId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<D: GpuDevice + 'static> BackgroundStreamer<D> {
    /// Create the destination buffer and start the thread
    pub fn spawn(device: Arc<D>) -> Result<Self> {
        let buffer = device.create_committed_buffer(
            HeapType::Default,
            &BufferDesc::new("Background Upload Buffer", BACKGROUND_BUFFER_SIZE),
        )?;

        let shared = Arc::new(StreamerShared {
            running: AtomicBool::new(true),
            ..StreamerShared::default()
        });

        let worker = {
            let device = Arc::clone(&device);
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || upload_loop(device.as_ref(), &shared, buffer))
        };
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                device.release_buffer(buffer);
                return Err(e.into());
            }
        };

        debug!("Started background upload thread");
        Ok(Self {
            device,
            shared,
            buffer,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Megabytes uploaded per iteration; zero idles the thread
    pub fn set_upload_size_mb(&self, mb: u32) {
        self.shared.size_mb.store(mb, Ordering::Relaxed);
    }

    /// Delay after each upload
    pub fn set_wait_ms(&self, ms: u32) {
        self.shared.wait_ms.store(ms, Ordering::Relaxed);
    }

    pub fn upload_size_mb(&self) -> u32 {
        self.shared.size_mb.load(Ordering::Relaxed)
    }

    pub fn wait_ms(&self) -> u32 {
        self.shared.wait_ms.load(Ordering::Relaxed)
    }

    /// Completed upload iterations
    pub fn uploads(&self) -> u64 {
        self.shared.uploads.load(Ordering::Relaxed)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.shared.bytes.load(Ordering::Relaxed)
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop and join the thread, then release the buffer
    ///
    /// Later calls do nothing.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        self.shared.running.store(false, Ordering::Release);
        if worker.join().is_err() {
            warn!("Background upload thread panicked");
        }
        // Joined first: the thread's last copy has been submitted
        self.device.release_buffer(self.buffer);
        debug!(
            "Stopped background upload thread after {} uploads",
            self.uploads()
        );
    }
}

impl<D: GpuDevice + 'static> Drop for BackgroundStreamer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn upload_loop<D: GpuDevice + ?Sized>(device: &D, shared: &StreamerShared, buffer: BufferId) {
    let mut zeroes: Vec<u8> = Vec::new();

    while shared.running.load(Ordering::Acquire) {
        let size = (u64::from(shared.size_mb.load(Ordering::Relaxed)) * MIB).min(BACKGROUND_BUFFER_SIZE);
        if size == 0 {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        // Size is capped by the buffer, so this fits in memory
        let len = size as usize;
        if zeroes.len() < len {
            zeroes.resize(len, 0);
        }

        match upload_once(device, buffer, &zeroes[..len]) {
            Ok(()) => {
                shared.uploads.fetch_add(1, Ordering::Relaxed);
                shared.bytes.fetch_add(size, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Background upload of {} bytes failed: {}", size, e);
                std::thread::sleep(IDLE_SLEEP);
            }
        }

        let wait = Duration::from_millis(u64::from(shared.wait_ms.load(Ordering::Relaxed)));
        let start = Instant::now();
        while start.elapsed() < wait && shared.running.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }
}

fn upload_once<D: GpuDevice + ?Sized>(device: &D, buffer: BufferId, data: &[u8]) -> mempool_gpu::Result<()> {
    let size = data.len() as u64;
    let mut ctx = device.upload_begin(size)?;
    device.upload_write(&ctx, 0, data)?;
    ctx.copy_to(buffer, 0, 0, size);
    device.upload_end(ctx, false)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempool_gpu::{SimDevice, SimDeviceConfig};

    fn device() -> Arc<SimDevice> {
        Arc::new(SimDevice::new(SimDeviceConfig::default()).unwrap())
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_idle_until_size_set() {
        let device = device();
        let streamer = BackgroundStreamer::spawn(Arc::clone(&device)).unwrap();
        assert!(streamer.is_running());
        std::thread::sleep(IDLE_SLEEP * 2);
        assert_eq!(streamer.uploads(), 0);
        assert_eq!(device.statistics().copy_submissions, 0);
    }

    #[test]
    fn test_uploads_without_graphics_wait() {
        let device = device();
        let streamer = BackgroundStreamer::spawn(Arc::clone(&device)).unwrap();
        streamer.set_upload_size_mb(1);

        assert!(wait_for(|| streamer.uploads() >= 2));
        assert!(streamer.bytes_uploaded() >= 2 * MIB);
        assert!(device.statistics().copy_submissions >= 2);
        streamer.shutdown();
    }

    #[test]
    fn test_shutdown_releases_buffer() {
        let device = device();
        let streamer = BackgroundStreamer::spawn(Arc::clone(&device)).unwrap();
        streamer.set_upload_size_mb(1);
        streamer.set_wait_ms(1);
        assert_eq!(device.live_objects().1, 1);

        streamer.shutdown();
        assert!(!streamer.is_running());
        device.flush_gpu().unwrap();
        assert_eq!(device.live_objects().1, 0);

        // Second shutdown, and the one in drop, are no-ops
        streamer.shutdown();
        drop(streamer);
    }

    #[test]
    fn test_shutdown_interrupts_wait() {
        let device = device();
        let streamer = BackgroundStreamer::spawn(Arc::clone(&device)).unwrap();
        streamer.set_wait_ms(100);
        streamer.set_upload_size_mb(1);
        assert!(wait_for(|| streamer.uploads() >= 1));

        let start = Instant::now();
        streamer.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_settings_round_trip() {
        let streamer = BackgroundStreamer::spawn(device()).unwrap();
        streamer.set_upload_size_mb(8);
        streamer.set_wait_ms(20);
        assert_eq!(streamer.upload_size_mb(), 8);
        assert_eq!(streamer.wait_ms(), 20);
    }

    #[test]
    fn test_buffer_is_full_size() {
        let device = device();
        let streamer = BackgroundStreamer::spawn(Arc::clone(&device)).unwrap();
        assert_eq!(device.buffer_size(streamer.buffer()).unwrap(), BACKGROUND_BUFFER_SIZE);
    }
}
