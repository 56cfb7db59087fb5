//! Generated kernel text.

use axred_common::{DType, DeviceLimits};
use axred_kernels::cluda::{Dialect, header};
use axred_kernels::{NumericFlags, ReductionKernel};

fn row_sum() -> ReductionKernel {
    ReductionKernel::builder(DType::F32, "0", "a + b", vec![false, true])
        .arguments_str("const float *x")
        .build(DeviceLimits::mock())
        .unwrap()
}

#[test]
fn row_sum_kernel_text() {
    let source = row_sum().source(4).unwrap();
    insta::assert_snapshot!(source.text, @r"
    #define REDUCE(a, b) (a + b)

    KERNEL void reduk(const unsigned int n, GLOBAL_MEM float *out
                      , const unsigned int dim0
                      , const unsigned int dim1
                      , GLOBAL_MEM float *x_data
                      , const unsigned int x_offset
                      , const int x_str_0
                      , const int x_str_1
    ) {
      LOCAL_MEM float ldata[4];
      const unsigned int lid = LID_0;
      unsigned int i;
      GLOBAL_MEM char *tmp;

      tmp = (GLOBAL_MEM char *)x_data; tmp += x_offset;
      x_data = (GLOBAL_MEM float *)tmp;

      i = GID_0;
      const unsigned int pos0 = i;
      GLOBAL_MEM char *x_base = (GLOBAL_MEM char *)x_data;
      x_base += (int)pos0 * x_str_0;

      float acc = 0;

      for (i = lid; i < n; i += LDIM_0) {
        unsigned int ii = i;
        unsigned int pos;
        GLOBAL_MEM char *x_p = x_base;
        pos = ii % dim1;
        ii = ii / dim1;
        x_p += (int)pos * x_str_1;
        GLOBAL_MEM float *x = (GLOBAL_MEM float *)x_p;
        acc = REDUCE((acc), (x[0]));
      }
      ldata[lid] = acc;
      local_barrier();
      if (lid < 2) {
        ldata[lid] = REDUCE(ldata[lid], ldata[lid + 2]);
      }
      local_barrier();
      if (lid < 1) {
        ldata[lid] = REDUCE(ldata[lid], ldata[lid + 1]);
      }
      if (lid == 0) out[GID_0] = ldata[0];
    }
    ");
}

#[test]
fn scalar_arguments_are_passed_by_value() {
    let k = ReductionKernel::builder(DType::F64, "0", "a + b", vec![true])
        .arguments_str("const double *x, double alpha")
        .map_expr("alpha * x[i]")
        .build(DeviceLimits::mock())
        .unwrap();
    let text = k.source(8).unwrap().text;
    assert!(text.contains("                  , double alpha\n"));
    assert!(!text.contains("alpha_data"));
    assert!(text.contains("acc = REDUCE((acc), (alpha * x[0]));"));
}

#[test]
fn reduced_axis_zero_takes_the_quotient() {
    let k = ReductionKernel::builder(DType::F32, "0", "a + b", vec![true, false, true])
        .build(DeviceLimits::mock())
        .unwrap();
    let text = k.source(2).unwrap().text;
    // kept axis 1 only: it is the outermost kept axis but not axis 0
    assert!(text.contains("  const unsigned int pos1 = i % dim1;\n  i = i / dim1;\n"));
    // reduced walk: axis 2 by remainder, axis 0 takes the quotient
    let walk = text.find("pos = ii % dim2;").unwrap();
    let last = text.find("pos = ii;").unwrap();
    assert!(walk < last);
    assert!(!text.contains("ii % dim0"));
}

#[test]
fn every_array_gets_its_own_cursor() {
    let k = ReductionKernel::builder(DType::F32, "0", "a + b", vec![true, true])
        .arguments_str("float *x, float *y")
        .map_expr("x[i] * y[i]")
        .build(DeviceLimits::mock())
        .unwrap();
    let text = k.source(2).unwrap().text;
    for name in ["x", "y"] {
        assert!(text.contains(&format!("GLOBAL_MEM char *{name}_p = {name}_base;")));
        assert!(text.contains(&format!("{name}_p += (int)pos * {name}_str_1;")));
        assert!(text.contains(&format!("{name}_p += (int)pos * {name}_str_0;")));
    }
}

#[test]
fn headers_prefix_the_generated_text() {
    let k = ReductionKernel::builder(DType::F64, "0", "a + b", vec![true])
        .arguments_str("const unsigned char *x")
        .build(DeviceLimits::mock())
        .unwrap();
    let opencl = header(Dialect::OpenCl, k.flags());
    assert!(opencl.contains("cl_khr_byte_addressable_store"));
    assert!(opencl.contains("cl_khr_fp64"));
    let cuda = header(Dialect::Cuda, NumericFlags::default());
    assert!(cuda.contains("#define GID_0 blockIdx.x"));
}
