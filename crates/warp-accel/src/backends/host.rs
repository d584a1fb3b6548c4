//! Host-resident compute device
//!
//! [`HostDevice`] implements [`ComputeDevice`] on the CPU. Device memory lives
//! in host RAM, but commands are executed asynchronously exactly like on a
//! discrete accelerator: `enqueue_*` returns an [`Event`] immediately and the
//! copy runs later on a worker.
//!
//! # Queue ordering
//!
//! - [`QueueOrder::InOrder`]: one worker thread drains a FIFO channel, so
//!   commands start and finish in submission order
//! - [`QueueOrder::OutOfOrder`]: commands are dispatched onto a rayon pool
//!   and may run concurrently; only wait lists order them
//!
//! A command is handed to its executor only once every event in its wait
//! list is terminal, so pending dependencies never hold a worker. A failed
//! dependency fails the command without running it. Dropping the device
//! fails every command that has not finished with
//! [`DeviceError::QueueShutdown`].

use crate::config::{AccelConfig, QueueOrder};
use crate::device::{ComputeDevice, DeviceInfo, MemDesc, MemHandle, MemKind, SharedHostMemory};
use crate::error::DeviceError;
use crate::event::{self, Event};
use crate::format::ImageFormat;
use crate::geometry::{Dims, Region};
use crate::memory::MemFlags;
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use tracing::{debug, info, trace, warn};

type Operation = Box<dyn FnOnce() -> std::result::Result<(), DeviceError> + Send>;

/// A queued command
struct Command {
    label: &'static str,
    event: Event,
    wait: Vec<Event>,
    op: Operation,
    closed: Arc<AtomicBool>,
}

impl Command {
    /// Event signaled once the command may start: every dependency is
    /// terminal, or the command's own event was already signaled
    fn readiness(&self) -> Event {
        let ready = Event::queued();
        let pending: Vec<Event> = self.wait.iter().filter(|e| !e.is_signaled()).cloned().collect();
        if pending.is_empty() {
            ready.try_complete();
            return ready;
        }

        let remaining = Arc::new(AtomicUsize::new(pending.len()));
        for dependency in pending {
            let remaining = Arc::clone(&remaining);
            let ready = ready.clone();
            dependency.on_terminal(move || {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    ready.try_complete();
                }
            });
        }

        let shutdown = ready.clone();
        self.event.on_terminal(move || {
            shutdown.try_complete();
        });
        ready
    }

    /// Execute the command; its dependencies must be terminal or its event
    /// already signaled
    fn run(self) {
        let Command { label, event, wait, op, closed } = self;

        if closed.load(Ordering::Acquire) || event.is_signaled() {
            drop(op);
            event.try_fail(DeviceError::QueueShutdown);
            debug!("{} for event {} dropped: {:?}", label, event.id(), event.status());
            return;
        }

        if let Err(err) = event::wait_for_events(&wait) {
            drop(op);
            debug!("{} for event {} skipped: {}", label, event.id(), err);
            event.try_fail(DeviceError::DependencyFailed(err.to_string()));
            return;
        }

        // `op` is consumed here, so its host memory reference is gone
        // before the event is signaled
        let signaled = match op() {
            Ok(()) => {
                trace!("{} for event {} complete", label, event.id());
                event.try_complete()
            }
            Err(err) => {
                warn!("{} for event {} failed: {}", label, event.id(), err);
                event.try_fail(err)
            }
        };
        if !signaled {
            debug!("{} for event {} finished after shutdown", label, event.id());
        }
    }
}

/// Executor behind the device queue
enum Executor {
    InOrder {
        sender: Mutex<Option<mpsc::Sender<(Command, Event)>>>,
    },
    OutOfOrder {
        pool: Arc<rayon::ThreadPool>,
    },
}

impl Executor {
    fn new(config: &AccelConfig) -> Result<Self> {
        match config.queue_order {
            QueueOrder::InOrder => {
                let (sender, receiver) = mpsc::channel::<(Command, Event)>();
                std::thread::Builder::new()
                    .name("warp-accel-queue".into())
                    .spawn(move || {
                        for (command, ready) in receiver {
                            // In-order: the head of the queue blocks later commands
                            let _ = ready.wait();
                            command.run();
                        }
                        trace!("Queue worker exiting");
                    })
                    .map_err(|e| Error::InvalidParameter(format!("failed to spawn queue worker: {e}")))?;

                Ok(Executor::InOrder {
                    sender: Mutex::new(Some(sender)),
                })
            }
            QueueOrder::OutOfOrder => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(config.worker_threads)
                    .thread_name(|i| format!("warp-accel-worker-{i}"))
                    .build()
                    .map_err(|e| Error::InvalidParameter(format!("failed to build worker pool: {e}")))?;

                Ok(Executor::OutOfOrder { pool: Arc::new(pool) })
            }
        }
    }

    fn submit(&self, command: Command) -> std::result::Result<(), DeviceError> {
        let ready = command.readiness();
        match self {
            Executor::InOrder { sender } => {
                let guard = sender.lock();
                let sender = guard.as_ref().ok_or(DeviceError::QueueShutdown)?;
                sender
                    .send((command, ready))
                    .map_err(|_| DeviceError::QueueShutdown)
            }
            Executor::OutOfOrder { pool } => {
                // Dispatched only when ready, so waiting commands hold no worker
                let pool = Arc::clone(pool);
                ready.on_terminal(move || pool.spawn_fifo(move || command.run()));
                Ok(())
            }
        }
    }

    /// Close the queue; the in-order worker drains what is left and exits
    fn shutdown(&self) {
        if let Executor::InOrder { sender } = self {
            sender.lock().take();
        }
    }
}

/// Device-side storage of one memory object
struct DeviceMem {
    desc: MemDesc,
    flags: MemFlags,
    data: RwLock<Vec<u8>>,
    released: AtomicBool,
}

impl DeviceMem {
    fn ensure_live(&self, handle: u64) -> std::result::Result<(), DeviceError> {
        if self.released.load(Ordering::Acquire) {
            return Err(DeviceError::ExecutionFailed(format!(
                "memory object {handle} was released before the command ran"
            )));
        }
        Ok(())
    }
}

/// CPU-resident implementation of [`ComputeDevice`]
pub struct HostDevice {
    info: DeviceInfo,
    config: AccelConfig,
    objects: DashMap<u64, Arc<DeviceMem>>,
    next_handle: AtomicU64,
    allocated: AtomicUsize,
    outstanding: Mutex<Vec<Event>>,
    closed: Arc<AtomicBool>,
    executor: Executor,
}

impl HostDevice {
    /// Create a host device with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(AccelConfig::default())
    }

    /// Create a host device
    pub fn with_config(config: AccelConfig) -> Result<Self> {
        config.validate()?;

        let executor = Executor::new(&config)?;
        let info = DeviceInfo {
            name: config.device_name.clone(),
            global_mem_size: config.global_mem_size,
            max_image_dims: config.max_image_dims,
            queue_order: config.queue_order,
        };

        info!(
            "Host device initialized: {} ({} queue, {} MB)",
            info.name,
            info.queue_order,
            info.global_mem_size / (1024 * 1024)
        );

        Ok(Self {
            info,
            config,
            objects: DashMap::new(),
            next_handle: AtomicU64::new(1),
            allocated: AtomicUsize::new(0),
            outstanding: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
            executor,
        })
    }

    /// Number of live memory objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn lookup(&self, handle: MemHandle) -> Result<Arc<DeviceMem>> {
        self.objects
            .get(&handle.0)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DeviceError::InvalidMemObject(handle.0).into())
    }

    /// Reserve `bytes` of the memory budget
    fn reserve(&self, bytes: usize) -> Result<()> {
        let budget = self.info.global_mem_size;
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= budget)
            })
            .map(|_| ())
            .map_err(|used| {
                Error::allocation(bytes, budget.saturating_sub(used), "insufficient device memory")
            })
    }

    fn check_desc(&self, desc: &MemDesc) -> Result<()> {
        desc.dims.validate()?;

        if desc.checked_byte_size().is_none() {
            return Err(Error::allocation(
                usize::MAX,
                self.free_memory(),
                format!("{} elements of {} bytes overflow the address space", desc.dims, desc.element_size()),
            ));
        }

        if desc.kind == MemKind::Image {
            if !self.config.supports_format(&desc.format) {
                return Err(Error::FormatUnsupported(desc.format));
            }

            let dims = desc.dims.as_array();
            let limits = self.info.max_image_dims;
            if dims.iter().zip(limits.iter()).any(|(d, l)| d > l) {
                return Err(Error::allocation(
                    desc.byte_size(),
                    self.free_memory(),
                    format!("image {} exceeds device limit {:?}", desc.dims, limits),
                ));
            }
        }

        Ok(())
    }

    fn submit(&self, label: &'static str, wait: &[Event], op: Operation) -> Result<Event> {
        let event = Event::queued();
        let command = Command {
            label,
            event: event.clone(),
            wait: wait.to_vec(),
            op,
            closed: Arc::clone(&self.closed),
        };

        {
            let mut outstanding = self.outstanding.lock();
            outstanding.retain(|e| !e.is_signaled());
            outstanding.push(event.clone());
        }

        trace!("Queued {} as event {} waiting on {} events", label, event.id(), wait.len());
        self.executor.submit(command)?;
        Ok(event)
    }
}

impl ComputeDevice for HostDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn supports_format(&self, format: &ImageFormat) -> bool {
        self.config.supports_format(format)
    }

    fn free_memory(&self) -> usize {
        self.info
            .global_mem_size
            .saturating_sub(self.allocated.load(Ordering::Acquire))
    }

    fn allocate(&self, desc: &MemDesc, flags: MemFlags, initial: Option<&[u8]>) -> Result<MemHandle> {
        flags.validate()?;
        self.check_desc(desc)?;

        let size = desc.byte_size();

        if let Some(data) = initial {
            if !flags.host_writable() {
                return Err(Error::allocation(
                    size,
                    self.free_memory(),
                    format!("initial data conflicts with {:?}", flags),
                ));
            }
            if data.len() != size {
                return Err(Error::dimension_mismatch(size, data.len()));
            }
        }

        self.reserve(size)?;

        let data = match initial {
            Some(bytes) => bytes.to_vec(),
            None => vec![0u8; size],
        };

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(
            handle,
            Arc::new(DeviceMem {
                desc: *desc,
                flags,
                data: RwLock::new(data),
                released: AtomicBool::new(false),
            }),
        );

        debug!("Allocated {:?} {} ({} bytes) as {}", desc.kind, desc.dims, size, handle);
        Ok(MemHandle(handle))
    }

    fn release(&self, mem: MemHandle) -> Result<()> {
        let (_, object) = self
            .objects
            .remove(&mem.0)
            .ok_or(DeviceError::InvalidMemObject(mem.0))?;

        object.released.store(true, Ordering::Release);
        self.allocated.fetch_sub(object.desc.byte_size(), Ordering::AcqRel);

        trace!("Released memory object {}", mem.0);
        Ok(())
    }

    fn enqueue_write(
        &self,
        dst: MemHandle,
        region: Region,
        src: SharedHostMemory,
        wait: &[Event],
    ) -> Result<Event> {
        let object = self.lookup(dst)?;
        if !object.flags.host_writable() {
            return Err(DeviceError::InvalidOperation(format!(
                "host write to memory object {} with {:?}",
                dst.0, object.flags
            ))
            .into());
        }
        region.check_within(&object.desc.dims)?;

        let expected = region.volume() * object.desc.element_size();
        let actual = src.lock().bytes().len();
        if actual != expected {
            return Err(Error::dimension_mismatch(expected, actual));
        }

        let handle = dst.0;
        self.submit(
            "write",
            wait,
            Box::new(move || {
                object.ensure_live(handle)?;
                // Device memory before host memory, as in every command
                let mut data = object.data.write();
                let host = src.lock();
                scatter(&mut data, &object.desc, &region, host.bytes());
                Ok(())
            }),
        )
    }

    fn enqueue_read(
        &self,
        src: MemHandle,
        region: Region,
        dst: SharedHostMemory,
        wait: &[Event],
    ) -> Result<Event> {
        let object = self.lookup(src)?;
        if !object.flags.host_readable() {
            return Err(DeviceError::InvalidOperation(format!(
                "host read from memory object {} with {:?}",
                src.0, object.flags
            ))
            .into());
        }
        region.check_within(&object.desc.dims)?;

        let expected = region.volume() * object.desc.element_size();
        let actual = dst.lock().bytes().len();
        if actual != expected {
            return Err(Error::dimension_mismatch(expected, actual));
        }

        let handle = src.0;
        self.submit(
            "read",
            wait,
            Box::new(move || {
                object.ensure_live(handle)?;
                let data = object.data.read();
                let mut host = dst.lock();
                gather(&data, &object.desc, &region, host.bytes_mut());
                Ok(())
            }),
        )
    }

    fn enqueue_copy(
        &self,
        src: MemHandle,
        src_region: Region,
        dst: MemHandle,
        dst_region: Region,
        wait: &[Event],
    ) -> Result<Event> {
        let source = self.lookup(src)?;
        let target = self.lookup(dst)?;

        src_region.check_within(&source.desc.dims)?;
        dst_region.check_within(&target.desc.dims)?;

        if source.desc.element_size() != target.desc.element_size() {
            return Err(DeviceError::InvalidOperation(format!(
                "copy between {}-byte and {}-byte elements",
                source.desc.element_size(),
                target.desc.element_size()
            ))
            .into());
        }
        if src_region.volume() != dst_region.volume() {
            return Err(Error::dimension_mismatch(dst_region.volume(), src_region.volume()));
        }

        let (src_handle, dst_handle) = (src.0, dst.0);
        self.submit(
            "copy",
            wait,
            Box::new(move || {
                source.ensure_live(src_handle)?;
                target.ensure_live(dst_handle)?;

                let mut staging = vec![0u8; src_region.volume() * source.desc.element_size()];
                {
                    let data = source.data.read();
                    gather(&data, &source.desc, &src_region, &mut staging);
                }
                let mut data = target.data.write();
                scatter(&mut data, &target.desc, &dst_region, &staging);
                Ok(())
            }),
        )
    }

    fn finish(&self) -> Result<()> {
        let pending: Vec<Event> = self.outstanding.lock().drain(..).collect();
        trace!("Finishing {} outstanding commands", pending.len());
        // Command failures belong to their own events
        let _ = event::wait_for_events(&pending);
        Ok(())
    }
}

impl Drop for HostDevice {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.executor.shutdown();

        let pending: Vec<Event> = self.outstanding.lock().drain(..).collect();
        let failed = pending
            .iter()
            .filter(|event| event.try_fail(DeviceError::QueueShutdown))
            .count();
        if failed > 0 {
            debug!("Device dropped with {} unfinished commands", failed);
        }
    }
}

impl std::fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDevice")
            .field("info", &self.info)
            .field("objects", &self.objects.len())
            .field("allocated", &self.allocated.load(Ordering::Relaxed))
            .finish()
    }
}

/// Byte ranges of each row of `region` within an object of extent `dims`
fn rows(dims: &Dims, region: &Region, element_size: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    let [width, height, _] = dims.as_array();
    let [ox, oy, oz] = region.origin.0;
    let [ex, ey, ez] = region.extent.as_array();
    let row_bytes = ex * element_size;

    (0..ez).flat_map(move |z| {
        (0..ey).map(move |y| {
            let start = (((oz + z) * height + (oy + y)) * width + ox) * element_size;
            start..start + row_bytes
        })
    })
}

/// Copy `region` of `data` into the packed buffer `out`
fn gather(data: &[u8], desc: &MemDesc, region: &Region, out: &mut [u8]) {
    let mut offset = 0;
    for row in rows(&desc.dims, region, desc.element_size()) {
        let len = row.len();
        out[offset..offset + len].copy_from_slice(&data[row]);
        offset += len;
    }
}

/// Copy the packed buffer `src` into `region` of `data`
fn scatter(data: &mut [u8], desc: &MemDesc, region: &Region, src: &[u8]) {
    let mut offset = 0;
    for row in rows(&desc.dims, region, desc.element_size()) {
        let len = row.len();
        data[row].copy_from_slice(&src[offset..offset + len]);
        offset += len;
    }
}
