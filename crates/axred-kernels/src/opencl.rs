//! OpenCL device backed by `opencl3`.
//!
//! Selects the first GPU exposed by any platform, compiles generated
//! sources behind the OpenCL portability header and launches one
//! work-group per output element.

use std::ptr;
use std::sync::Arc;

use axred_common::{DeviceLimits, Element, ReduxError, Result, ScalarValue};
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{CL_DEVICE_TYPE_GPU, Device, get_all_devices};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{Buffer, CL_MEM_READ_WRITE, ClMem};
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, cl_uchar};
use tracing::{debug, info};

use crate::array::{GpuArray, LaunchArg, gather};
use crate::cluda::{self, Dialect, NumericFlags};
use crate::device::{CompiledKernel, ComputeDevice};
use crate::source::KernelSource;

fn cl_error(what: &str, err: impl std::fmt::Display) -> ReduxError {
    ReduxError::device(format!("{what}: {err}"))
}

/// Device memory with its byte length.
pub struct OpenClBuffer {
    buffer: Buffer<cl_uchar>,
    len: usize,
}

impl OpenClBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for OpenClBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClBuffer").field("len", &self.len).finish()
    }
}

/// A built reduction kernel and its work-group limit on the device.
pub struct OpenClKernel {
    _program: Program,
    kernel: Kernel,
    work_group_size: usize,
}

impl CompiledKernel for OpenClKernel {
    fn max_supported_local_size(&self) -> usize {
        self.work_group_size
    }
}

impl std::fmt::Debug for OpenClKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClKernel").field("work_group_size", &self.work_group_size).finish()
    }
}

/// OpenCL implementation of [`ComputeDevice`].
pub struct OpenClDevice {
    device: Device,
    device_name: String,
    context: Context,
    queue: CommandQueue,
    limits: DeviceLimits,
}

impl std::fmt::Debug for OpenClDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClDevice")
            .field("device_name", &self.device_name)
            .field("limits", &self.limits)
            .finish()
    }
}

impl OpenClDevice {
    /// Open the first GPU device found.
    pub fn first_gpu() -> Result<Self> {
        let ids = get_all_devices(CL_DEVICE_TYPE_GPU)
            .map_err(|e| cl_error("failed to enumerate OpenCL devices", e))?;
        let id = *ids.first().ok_or_else(|| ReduxError::device("no OpenCL GPU device found"))?;
        let device = Device::new(id);
        let device_name = device.name().unwrap_or_default();

        let local_memory_bytes = device
            .local_mem_size()
            .map_err(|e| cl_error("failed to query local memory size", e))?;
        let max_local_workers = device
            .max_work_group_size()
            .map_err(|e| cl_error("failed to query work-group size", e))?;
        let limits = DeviceLimits::new(
            usize::try_from(local_memory_bytes).unwrap_or(usize::MAX),
            max_local_workers,
            u32::MAX as usize,
        );

        let context =
            Context::from_device(&device).map_err(|e| cl_error("failed to create context", e))?;
        let queue = CommandQueue::create_default_with_properties(&context, 0, 0)
            .map_err(|e| cl_error("failed to create command queue", e))?;

        info!(device = %device_name, max_local_workers, local_memory_bytes, "OpenCL device selected");
        Ok(Self { device, device_name, context, queue, limits })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Copy `data` into a new C-contiguous device array of `shape`.
    pub fn upload<T: Element>(&self, data: &[T], shape: Vec<usize>) -> Result<GpuArray<OpenClBuffer>> {
        let len: usize = shape.iter().product();
        if len != data.len() {
            return Err(ReduxError::argument(format!(
                "{} values do not fill shape {shape:?}",
                data.len()
            )));
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = self.alloc(bytes.len())?;
        if !bytes.is_empty() {
            // SAFETY: blocking write of exactly `bytes.len()` bytes into a
            // buffer of that size.
            unsafe {
                self.queue
                    .enqueue_write_buffer(&mut buffer.buffer, CL_BLOCKING, 0, bytes, &[])
                    .map_err(|e| cl_error("failed to write buffer", e))?;
            }
        }
        Ok(GpuArray::contiguous(buffer, T::DTYPE, shape))
    }

    /// Read `array` back in row-major order.
    pub fn download<T: Element>(&self, array: &GpuArray<OpenClBuffer>) -> Result<Vec<T>> {
        let mut bytes = vec![0_u8; array.buffer().len];
        if !bytes.is_empty() {
            // SAFETY: blocking read into a host slice of the buffer's size.
            unsafe {
                self.queue
                    .enqueue_read_buffer(&array.buffer().buffer, CL_BLOCKING, 0, &mut bytes, &[])
                    .map_err(|e| cl_error("failed to read buffer", e))?;
            }
        }
        gather(&bytes, array)
    }
}

impl ComputeDevice for OpenClDevice {
    type Buffer = OpenClBuffer;
    type Kernel = Arc<OpenClKernel>;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn alloc(&self, bytes: usize) -> Result<OpenClBuffer> {
        // Zero-sized buffers are invalid in OpenCL.
        let count = bytes.max(1);
        // SAFETY: no host pointer is passed, the runtime owns the storage.
        let buffer = unsafe {
            Buffer::<cl_uchar>::create(&self.context, CL_MEM_READ_WRITE, count, ptr::null_mut())
                .map_err(|e| cl_error("failed to allocate buffer", e))?
        };
        Ok(OpenClBuffer { buffer, len: bytes })
    }

    fn build(&self, source: &KernelSource, flags: NumericFlags) -> Result<Arc<OpenClKernel>> {
        let text = format!("{}\n{}", cluda::header(Dialect::OpenCl, flags), source.text);
        let program = Program::create_and_build_from_source(&self.context, &text, "")
            .map_err(|log| cl_error("kernel build failed", log))?;
        let kernel = Kernel::create(&program, source.name())
            .map_err(|e| cl_error("failed to create kernel", e))?;
        let work_group_size = kernel
            .get_work_group_size(self.device.id())
            .map_err(|e| cl_error("failed to query kernel work-group size", e))?;
        debug!(local_size = source.local_size(), work_group_size, "OpenCL kernel built");
        Ok(Arc::new(OpenClKernel { _program: program, kernel, work_group_size }))
    }

    fn launch(
        &self,
        kernel: &Arc<OpenClKernel>,
        args: &[LaunchArg<'_, OpenClBuffer>],
        local_size: usize,
        grid_size: usize,
    ) -> Result<()> {
        let mut exec = ExecuteKernel::new(&kernel.kernel);
        // SAFETY: arguments are set in the order and with the types of the
        // generated signature; buffers outlive the blocking wait below.
        let event = unsafe {
            for arg in args {
                match arg {
                    LaunchArg::U32(v) => exec.set_arg(v),
                    LaunchArg::I32(v) => exec.set_arg(v),
                    LaunchArg::Buffer(b) => exec.set_arg(&b.buffer.get()),
                    LaunchArg::Scalar(s) => match s {
                        ScalarValue::I8(v) => exec.set_arg(v),
                        ScalarValue::U8(v) => exec.set_arg(v),
                        ScalarValue::I16(v) => exec.set_arg(v),
                        ScalarValue::U16(v) => exec.set_arg(v),
                        ScalarValue::I32(v) => exec.set_arg(v),
                        ScalarValue::U32(v) => exec.set_arg(v),
                        ScalarValue::I64(v) => exec.set_arg(v),
                        ScalarValue::U64(v) => exec.set_arg(v),
                        ScalarValue::F32(v) => exec.set_arg(v),
                        ScalarValue::F64(v) => exec.set_arg(v),
                    },
                };
            }
            exec.set_global_work_size(grid_size * local_size)
                .set_local_work_size(local_size)
                .enqueue_nd_range(&self.queue)
                .map_err(|e| cl_error("failed to enqueue kernel", e))?
        };
        event.wait().map_err(|e| cl_error("kernel execution failed", e))?;
        debug!(grid_size, local_size, "OpenCL launch complete");
        Ok(())
    }
}
