//! Host reference device.
//!
//! Executes a [`KernelPlan`] on host memory with the same decomposition,
//! loop and tree schedule as the generated source, so reductions can be
//! verified without GPU hardware. The tree phase runs the halvings in
//! order on one thread, which is what the barriers guarantee on a device.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use axred_common::{DType, DeviceLimits, DeviceSettings, Element, ReduxError, Result, ScalarValue};
use tracing::debug;

use crate::args::KernelArg;
use crate::array::{GpuArray, LaunchArg, gather};
use crate::cluda::NumericFlags;
use crate::device::{CompiledKernel, ComputeDevice};
use crate::expr::{self, Env, Expr, Func, IntType, Value};
use crate::plan::{KernelPlan, decompose};
use crate::source::KernelSource;

/// Byte buffer in host memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct HostBuffer(Rc<RefCell<Vec<u8>>>);

impl HostBuffer {
    fn zeroed(bytes: usize) -> Self {
        Self(Rc::new(RefCell::new(vec![0; bytes])))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn same_storage(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A plan whose expressions have been parsed and checked.
#[derive(Debug)]
pub struct HostProgram {
    plan: KernelPlan,
    reduce: Expr,
    map: Expr,
    neutral: Expr,
    max_supported_local_size: usize,
}

/// Compiled kernel handle of the host device. Clones share the program.
#[derive(Debug, Clone)]
pub struct HostKernel(Rc<HostProgram>);

impl HostKernel {
    pub fn plan(&self) -> &KernelPlan {
        &self.0.plan
    }
}

impl CompiledKernel for HostKernel {
    fn max_supported_local_size(&self) -> usize {
        self.0.max_supported_local_size
    }
}

/// Reference [`ComputeDevice`] running kernels on the calling thread.
#[derive(Debug)]
pub struct HostDevice {
    limits: DeviceLimits,
    kernel_local_size_cap: Option<usize>,
    allocations: Cell<usize>,
    builds: Cell<usize>,
    launches: Cell<usize>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new(DeviceLimits::mock())
    }
}

impl HostDevice {
    pub fn new(limits: DeviceLimits) -> Self {
        Self {
            limits,
            kernel_local_size_cap: None,
            allocations: Cell::new(0),
            builds: Cell::new(0),
            launches: Cell::new(0),
        }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self::new(settings.limits()).with_kernel_local_size_cap(settings.kernel_local_size_cap)
    }

    /// Make built kernels report at most `cap` as their supported local
    /// size, as register pressure does on real devices.
    pub fn with_kernel_local_size_cap(mut self, cap: Option<usize>) -> Self {
        self.kernel_local_size_cap = cap;
        self
    }

    /// Number of [`ComputeDevice::alloc`] calls.
    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn builds(&self) -> usize {
        self.builds.get()
    }

    pub fn launches(&self) -> usize {
        self.launches.get()
    }

    /// Copy `data` into a new C-contiguous array of `shape`.
    pub fn upload<T: Element>(&self, data: &[T], shape: Vec<usize>) -> Result<GpuArray<HostBuffer>> {
        let len: usize = shape.iter().product();
        if len != data.len() {
            return Err(ReduxError::argument(format!(
                "{} values do not fill shape {shape:?}",
                data.len()
            )));
        }
        let bytes = bytemuck::cast_slice::<T, u8>(data).to_vec();
        Ok(GpuArray::contiguous(HostBuffer(Rc::new(RefCell::new(bytes))), T::DTYPE, shape))
    }

    /// Read the elements of `array` in row-major order, following its
    /// strides and offset.
    pub fn download<T: Element>(&self, array: &GpuArray<HostBuffer>) -> Result<Vec<T>> {
        gather(&array.buffer().0.borrow(), array)
    }

    fn kernel_max_local_size(&self) -> usize {
        match self.kernel_local_size_cap {
            Some(cap) => cap.min(self.limits.max_local_workers),
            None => self.limits.max_local_workers,
        }
    }
}

fn build_error(reason: impl Into<String>) -> ReduxError {
    ReduxError::device(format!("host build failed: {}", reason.into()))
}

fn launch_error(reason: impl Into<String>) -> ReduxError {
    ReduxError::device(format!("host launch failed: {}", reason.into()))
}

fn element_bytes(bytes: &[u8], at: isize, size: usize) -> Result<&[u8]> {
    usize::try_from(at)
        .ok()
        .and_then(|start| bytes.get(start..start.checked_add(size)?))
        .ok_or_else(|| launch_error(format!("access of {size} bytes at {at} is out of bounds")))
}

fn parse_for_build(what: &str, src: &str) -> Result<Expr> {
    expr::parse(src).map_err(|e| build_error(format!("{what} expression: {e}")))
}

/// Check that `expr` only refers to `vars`, `arrays` and known functions.
fn check_names(what: &str, expr: &Expr, vars: &[&str], arrays: &[&str]) -> Result<()> {
    let names = expr.names();
    if let Some(var) = names.vars.iter().find(|v| !vars.contains(&v.as_str())) {
        return Err(build_error(format!("`{var}` is undeclared in the {what} expression")));
    }
    if let Some(array) = names.arrays.iter().find(|a| !arrays.contains(&a.as_str())) {
        return Err(build_error(format!("`{array}` is not an array in the {what} expression")));
    }
    for (name, argc) in &names.calls {
        match Func::from_name(name) {
            Some(func) if func.arity() == *argc => {}
            Some(func) => {
                return Err(build_error(format!(
                    "`{name}` takes {} argument(s), got {argc}",
                    func.arity()
                )));
            }
            None => return Err(build_error(format!("unknown function `{name}`"))),
        }
    }
    Ok(())
}

fn read_value(bytes: &[u8], dtype: DType) -> Result<Value> {
    let scalar = match dtype {
        DType::I8 => ScalarValue::I8(bytemuck::pod_read_unaligned(bytes)),
        DType::U8 => ScalarValue::U8(bytemuck::pod_read_unaligned(bytes)),
        DType::I16 => ScalarValue::I16(bytemuck::pod_read_unaligned(bytes)),
        DType::U16 => ScalarValue::U16(bytemuck::pod_read_unaligned(bytes)),
        DType::I32 => ScalarValue::I32(bytemuck::pod_read_unaligned(bytes)),
        DType::U32 => ScalarValue::U32(bytemuck::pod_read_unaligned(bytes)),
        DType::I64 => ScalarValue::I64(bytemuck::pod_read_unaligned(bytes)),
        DType::U64 => ScalarValue::U64(bytemuck::pod_read_unaligned(bytes)),
        DType::F32 => ScalarValue::F32(bytemuck::pod_read_unaligned(bytes)),
        DType::F64 => ScalarValue::F64(bytemuck::pod_read_unaligned(bytes)),
        DType::C64 | DType::C128 => return Err(launch_error("complex elements are not supported")),
    };
    Ok(Value::from_scalar(scalar))
}

impl ComputeDevice for HostDevice {
    type Buffer = HostBuffer;
    type Kernel = HostKernel;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn alloc(&self, bytes: usize) -> Result<HostBuffer> {
        self.allocations.set(self.allocations.get() + 1);
        debug!(bytes, "host alloc");
        Ok(HostBuffer::zeroed(bytes))
    }

    fn build(&self, source: &KernelSource, flags: NumericFlags) -> Result<HostKernel> {
        self.builds.set(self.builds.get() + 1);
        let plan = &source.plan;
        if flags.have_complex {
            return Err(build_error("complex arithmetic is not supported"));
        }

        let reduce = parse_for_build("reduce", &plan.reduce_expr)?;
        let map = parse_for_build("map", &plan.map_expr)?;
        let neutral = parse_for_build("neutral", &plan.neutral)?;

        let arrays: Vec<&str> = plan.array_args().map(KernelArg::name).collect();
        let mut map_vars: Vec<&str> =
            plan.arguments.iter().filter(|a| !a.is_array()).map(KernelArg::name).collect();
        map_vars.push("i");
        check_names("reduce", &reduce, &["a", "b"], &[])?;
        check_names("map", &map, &map_vars, &arrays)?;
        check_names("neutral", &neutral, &[], &[])?;

        let max_supported_local_size = self.kernel_max_local_size();
        debug!(
            name = %plan.name,
            local_size = plan.local_size,
            max_supported_local_size,
            "host kernel built"
        );
        Ok(HostKernel(Rc::new(HostProgram {
            plan: plan.clone(),
            reduce,
            map,
            neutral,
            max_supported_local_size,
        })))
    }

    fn launch(
        &self,
        kernel: &HostKernel,
        args: &[LaunchArg<'_, HostBuffer>],
        local_size: usize,
        grid_size: usize,
    ) -> Result<()> {
        let program = &*kernel.0;
        if local_size != program.plan.local_size {
            return Err(launch_error(format!(
                "kernel was built for local size {}, launched with {local_size}",
                program.plan.local_size
            )));
        }
        if local_size == 0 || local_size > program.max_supported_local_size {
            return Err(launch_error(format!(
                "local size {local_size} exceeds the kernel maximum {}",
                program.max_supported_local_size
            )));
        }
        if grid_size > self.limits.max_grid_size {
            return Err(launch_error(format!(
                "grid size {grid_size} exceeds the device maximum {}",
                self.limits.max_grid_size
            )));
        }

        let decoded = DecodedArgs::decode(&program.plan, args)?;
        self.launches.set(self.launches.get() + 1);
        debug!(grid_size, local_size, extent = decoded.extent, "host launch");

        let results = Executor { program, args: &decoded }.run(grid_size)?;

        let dtype_out = program.plan.dtype_out();
        let size = dtype_out.size_in_bytes();
        let mut out = decoded.out.0.borrow_mut();
        if out.len() < grid_size * size {
            return Err(launch_error(format!(
                "output buffer of {} bytes cannot hold {grid_size} elements",
                out.len()
            )));
        }
        for (unit, value) in results.into_iter().enumerate() {
            let bytes = value.to_scalar(dtype_out)?.to_ne_bytes();
            out[unit * size..(unit + 1) * size].copy_from_slice(&bytes);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Argument decoding
// ---------------------------------------------------------------------------

enum Bound<'a> {
    Array { name: &'a str, dtype: DType, buffer: &'a HostBuffer, offset: u32, strides: Vec<i32> },
    Scalar { name: &'a str, value: Value },
}

struct DecodedArgs<'a> {
    extent: usize,
    out: &'a HostBuffer,
    dims: Vec<usize>,
    bound: Vec<Bound<'a>>,
}

impl<'a> DecodedArgs<'a> {
    /// Decode `args` in parameter order: extent, output, dims, then each
    /// argument's buffer, offset and strides or its scalar value.
    fn decode(plan: &'a KernelPlan, args: &'a [LaunchArg<'a, HostBuffer>]) -> Result<Self> {
        let mut it = args.iter();
        let mut next = |what: &str| {
            it.next().ok_or_else(|| launch_error(format!("missing launch argument: {what}")))
        };
        let malformed = |what: &str| launch_error(format!("malformed launch argument: {what}"));

        let LaunchArg::U32(extent) = next("n")? else {
            return Err(malformed("n"));
        };
        let LaunchArg::Buffer(out) = next("out")? else {
            return Err(malformed("out"));
        };
        let mut dims = Vec::with_capacity(plan.nd());
        for _ in 0..plan.nd() {
            let LaunchArg::U32(dim) = next("dim")? else {
                return Err(malformed("dim"));
            };
            dims.push(*dim as usize);
        }

        let mut bound = Vec::with_capacity(plan.arguments.len());
        for arg in &plan.arguments {
            let name = arg.name();
            match arg {
                KernelArg::Array { dtype, .. } => {
                    let LaunchArg::Buffer(buffer) = next(name)? else {
                        return Err(malformed(name));
                    };
                    let LaunchArg::U32(offset) = next(name)? else {
                        return Err(malformed(name));
                    };
                    let mut strides = Vec::with_capacity(plan.nd());
                    for _ in 0..plan.nd() {
                        let LaunchArg::I32(stride) = next(name)? else {
                            return Err(malformed(name));
                        };
                        strides.push(*stride);
                    }
                    bound.push(Bound::Array {
                        name,
                        dtype: *dtype,
                        buffer: *buffer,
                        offset: *offset,
                        strides,
                    });
                }
                KernelArg::Scalar { dtype, .. } => {
                    let LaunchArg::Scalar(value) = next(name)? else {
                        return Err(malformed(name));
                    };
                    if value.dtype() != *dtype {
                        return Err(malformed(name));
                    }
                    bound.push(Bound::Scalar { name, value: Value::from_scalar(*value) });
                }
            }
        }
        if it.next().is_some() {
            return Err(launch_error("too many launch arguments"));
        }

        Ok(Self { extent: *extent as usize, out: *out, dims, bound })
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

struct Executor<'a> {
    program: &'a HostProgram,
    args: &'a DecodedArgs<'a>,
}

/// Bindings of the map expression for one loop iteration.
struct ElementEnv<'a> {
    args: &'a DecodedArgs<'a>,
    storage: &'a [Ref<'a, Vec<u8>>],
    /// Byte address of the current element per bound argument.
    cursors: &'a [isize],
    index: usize,
}

impl Env for ElementEnv<'_> {
    fn var(&self, name: &str) -> Option<Value> {
        if name == "i" {
            return Some(Value::typed(self.index as i128, IntType::UInt));
        }
        self.args.bound.iter().find_map(|b| match b {
            Bound::Scalar { name: n, value } if *n == name => Some(*value),
            _ => None,
        })
    }

    fn element(&self, name: &str, index: i64) -> Result<Value> {
        for (slot, bound) in self.args.bound.iter().enumerate() {
            if let Bound::Array { name: n, dtype, .. } = bound {
                if *n == name {
                    let size = dtype.size_in_bytes();
                    let at = isize::try_from(index)
                        .ok()
                        .and_then(|index| index.checked_mul(size as isize))
                        .and_then(|delta| self.cursors[slot].checked_add(delta))
                        .ok_or_else(|| {
                            launch_error(format!("index {index} into `{name}` is out of bounds"))
                        })?;
                    return read_value(element_bytes(&self.storage[slot], at, size)?, *dtype);
                }
            }
        }
        Err(launch_error(format!("`{name}` is not an array")))
    }
}

/// Bindings of `REDUCE(a, b)`.
struct PairEnv {
    a: Value,
    b: Value,
}

impl Env for PairEnv {
    fn var(&self, name: &str) -> Option<Value> {
        match name {
            "a" => Some(self.a),
            "b" => Some(self.b),
            _ => None,
        }
    }

    fn element(&self, name: &str, _index: i64) -> Result<Value> {
        Err(launch_error(format!("`{name}` is not an array")))
    }
}

impl Executor<'_> {
    /// Result of every unit, computed before anything is written so inputs
    /// aliasing the output read their original values.
    fn run(&self, grid_size: usize) -> Result<Vec<Value>> {
        // Scalars get an empty placeholder so slots line up with `bound`.
        let empty = RefCell::new(Vec::new());
        let storage: Vec<Ref<'_, Vec<u8>>> = self
            .args
            .bound
            .iter()
            .map(|b| match b {
                Bound::Array { buffer, .. } => buffer.0.borrow(),
                Bound::Scalar { .. } => empty.borrow(),
            })
            .collect();

        let neutral = self.reduce_cast(expr::eval(&self.program.neutral, &PairEnv::zero())?)?;
        (0..grid_size).map(|unit| self.run_unit(unit, neutral, &storage)).collect()
    }

    fn run_unit(
        &self,
        unit: usize,
        neutral: Value,
        storage: &[Ref<'_, Vec<u8>>],
    ) -> Result<Value> {
        let plan = &self.program.plan;
        let dims = &self.args.dims;
        let local_size = plan.local_size;

        // Phase A: base address of every array for this unit.
        let mut base: Vec<isize> = self
            .args
            .bound
            .iter()
            .map(|b| match b {
                Bound::Array { offset, .. } => *offset as isize,
                Bound::Scalar { .. } => 0,
            })
            .collect();
        for (axis, pos) in decompose(unit, dims, &plan.partition.kept_steps()) {
            self.advance(&mut base, axis, pos);
        }

        // Phase B: one accumulator per worker, grid-stride over the extent.
        let reduced = plan.partition.reduced_steps();
        let mut ldata = Vec::with_capacity(local_size);
        for lid in 0..local_size {
            let mut acc = neutral;
            for index in (lid..self.args.extent).step_by(local_size) {
                let mut cursors = base.clone();
                for (axis, pos) in decompose(index, dims, &reduced) {
                    self.advance(&mut cursors, axis, pos);
                }
                let env = ElementEnv { args: self.args, storage, cursors: &cursors, index };
                let mapped = expr::eval(&self.program.map, &env)?;
                acc = self.reduce(acc, mapped)?;
            }
            ldata.push(acc);
        }

        // Phase C: halving tree.
        for half in plan.halvings() {
            for lid in 0..half {
                ldata[lid] = self.reduce(ldata[lid], ldata[lid + half])?;
            }
        }
        Ok(ldata[0])
    }

    fn advance(&self, cursors: &mut [isize], axis: usize, pos: usize) {
        for (cursor, bound) in cursors.iter_mut().zip(&self.args.bound) {
            if let Bound::Array { strides, .. } = bound {
                *cursor += pos as isize * strides[axis] as isize;
            }
        }
    }

    fn reduce(&self, a: Value, b: Value) -> Result<Value> {
        self.reduce_cast(expr::eval(&self.program.reduce, &PairEnv { a, b })?)
    }

    /// Assignment to an output-typed slot.
    fn reduce_cast(&self, value: Value) -> Result<Value> {
        value.cast(self.program.plan.dtype_out())
    }
}

impl PairEnv {
    fn zero() -> Self {
        Self { a: Value::int(0), b: Value::int(0) }
    }
}
