//! Kernel source emitter.
//!
//! Turns a [`KernelPlan`] into kernel text written against the macros of
//! [`crate::cluda`]. The text has three phases:
//!
//! 1. **Unit placement**: `GID_0` is decomposed over the kept axes and the
//!    resulting offsets are folded into a per-argument base pointer.
//! 2. **Accumulation**: a grid-stride loop over the reduced extent
//!    decomposes `i` over the reduced axes, rebinds every array name to the
//!    addressed element and folds `map_expr` into `acc`.
//! 3. **Tree combine**: partials go to local memory and are halved with a
//!    barrier per level; worker 0 writes the unit's result.

use std::fmt;

use axred_common::{ReduxError, Result};

use crate::plan::KernelPlan;

/// Continuation indent for parameters after the first line of the signature.
const PARAM_INDENT: &str = "                  ";

/// Generated source for one plan.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSource {
    pub plan: KernelPlan,
    pub text: String,
}

impl KernelSource {
    /// Emit the source for `plan`. The local size must be a power of two.
    pub fn render(plan: &KernelPlan) -> Result<Self> {
        if !plan.local_size.is_power_of_two() {
            return Err(ReduxError::argument(format!(
                "local size {} is not a power of two",
                plan.local_size
            )));
        }
        let text = Emitter { plan }.to_string();
        Ok(Self { plan: plan.clone(), text })
    }

    pub fn name(&self) -> &str {
        &self.plan.name
    }

    pub fn local_size(&self) -> usize {
        self.plan.local_size
    }
}

struct Emitter<'a> {
    plan: &'a KernelPlan,
}

impl Emitter<'_> {
    fn signature(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.plan;
        writeln!(
            f,
            "KERNEL void {}(const unsigned int n, {}{}",
            plan.name,
            plan.out_arg.decl_type(),
            plan.out_arg.name()
        )?;
        for d in 0..plan.nd() {
            writeln!(f, "{PARAM_INDENT}, const unsigned int dim{d}")?;
        }
        for arg in &plan.arguments {
            let name = arg.name();
            if arg.is_array() {
                writeln!(f, "{PARAM_INDENT}, {}{name}_data", arg.decl_type())?;
                writeln!(f, "{PARAM_INDENT}, const unsigned int {name}_offset")?;
                for d in 0..plan.nd() {
                    writeln!(f, "{PARAM_INDENT}, const int {name}_str_{d}")?;
                }
            } else {
                writeln!(f, "{PARAM_INDENT}, {} {name}", arg.decl_type())?;
            }
        }
        writeln!(f, ") {{")
    }

    fn unit_placement(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.plan;
        for arg in plan.array_args() {
            let name = arg.name();
            writeln!(f, "  tmp = (GLOBAL_MEM char *){name}_data; tmp += {name}_offset;")?;
            writeln!(f, "  {name}_data = ({})tmp;", arg.decl_type())?;
        }
        Ok(())
    }

    fn accumulate(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.plan;
        writeln!(f, "  for (i = lid; i < n; i += LDIM_0) {{")?;
        writeln!(f, "    unsigned int ii = i;")?;
        writeln!(f, "    unsigned int pos;")?;
        for arg in plan.array_args() {
            writeln!(f, "    GLOBAL_MEM char *{0}_p = {0}_base;", arg.name())?;
        }
        for step in plan.partition.reduced_steps() {
            let d = step.axis;
            if step.takes_quotient {
                writeln!(f, "    pos = ii;")?;
            } else {
                writeln!(f, "    pos = ii % dim{d};")?;
                writeln!(f, "    ii = ii / dim{d};")?;
            }
            for arg in plan.array_args() {
                writeln!(f, "    {0}_p += (int)pos * {0}_str_{d};", arg.name())?;
            }
        }
        for arg in plan.array_args() {
            let decl = arg.decl_type();
            writeln!(f, "    {decl}{0} = ({decl}){0}_p;", arg.name())?;
        }
        writeln!(f, "    acc = REDUCE((acc), ({}));", plan.map_expr)?;
        writeln!(f, "  }}")
    }

    fn tree_combine(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  ldata[lid] = acc;")?;
        for half in self.plan.halvings() {
            writeln!(f, "  local_barrier();")?;
            writeln!(f, "  if (lid < {half}) {{")?;
            writeln!(f, "    ldata[lid] = REDUCE(ldata[lid], ldata[lid + {half}]);")?;
            writeln!(f, "  }}")?;
        }
        writeln!(f, "  if (lid == 0) {}[GID_0] = ldata[0];", self.plan.out_arg.name())
    }
}

impl fmt::Display for Emitter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.plan;
        let out_ctype = plan.out_arg.ctype();

        if !plan.preamble.is_empty() {
            writeln!(f, "{}", plan.preamble)?;
            writeln!(f)?;
        }
        writeln!(f, "#define REDUCE(a, b) ({})", plan.reduce_expr)?;
        writeln!(f)?;
        self.signature(f)?;

        writeln!(f, "  LOCAL_MEM {out_ctype} ldata[{}];", plan.local_size)?;
        writeln!(f, "  const unsigned int lid = LID_0;")?;
        writeln!(f, "  unsigned int i;")?;
        writeln!(f, "  GLOBAL_MEM char *tmp;")?;
        writeln!(f)?;

        self.unit_placement(f)?;
        writeln!(f)?;

        writeln!(f, "  i = GID_0;")?;
        let kept = plan.partition.kept_steps();
        for step in &kept {
            let d = step.axis;
            if step.takes_quotient {
                writeln!(f, "  const unsigned int pos{d} = i;")?;
            } else {
                writeln!(f, "  const unsigned int pos{d} = i % dim{d};")?;
                writeln!(f, "  i = i / dim{d};")?;
            }
        }
        for arg in plan.array_args() {
            let name = arg.name();
            writeln!(f, "  GLOBAL_MEM char *{name}_base = (GLOBAL_MEM char *){name}_data;")?;
            for step in &kept {
                writeln!(f, "  {name}_base += (int)pos{0} * {name}_str_{0};", step.axis)?;
            }
        }
        writeln!(f)?;

        writeln!(f, "  {out_ctype} acc = {};", plan.neutral)?;
        writeln!(f)?;
        self.accumulate(f)?;
        self.tree_combine(f)?;
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use axred_common::DType;

    use super::*;
    use crate::args::KernelArg;
    use crate::plan::{AxisPartition, KERNEL_NAME, OUT_NAME};

    fn plan(redux: Vec<bool>, local_size: usize) -> KernelPlan {
        KernelPlan {
            name: KERNEL_NAME.into(),
            preamble: String::new(),
            reduce_expr: "a + b".into(),
            neutral: "0".into(),
            map_expr: "x[0]".into(),
            out_arg: KernelArg::array(DType::F32, OUT_NAME),
            arguments: vec![KernelArg::array(DType::F32, "x")],
            partition: AxisPartition::new(redux).unwrap(),
            local_size,
        }
    }

    #[test]
    fn rejects_non_power_of_two_local_size() {
        for ls in [0, 3, 6, 100] {
            let err = KernelSource::render(&plan(vec![true], ls)).unwrap_err();
            assert!(matches!(err, ReduxError::InvalidArgument(_)), "{ls}");
        }
    }

    #[test]
    fn tree_phase_has_one_barrier_per_level() {
        let src = KernelSource::render(&plan(vec![true], 16)).unwrap();
        assert_eq!(src.text.matches("local_barrier();").count(), 4);
        assert!(src.text.contains("if (lid < 8) {"));
        assert!(src.text.contains("ldata[lid] = REDUCE(ldata[lid], ldata[lid + 1]);"));
    }

    #[test]
    fn local_size_one_has_no_barrier() {
        let src = KernelSource::render(&plan(vec![true], 1)).unwrap();
        assert!(!src.text.contains("local_barrier"));
        assert!(src.text.contains("LOCAL_MEM float ldata[1];"));
    }

    #[test]
    fn kept_axis_offsets_are_hoisted_out_of_the_loop() {
        let src = KernelSource::render(&plan(vec![false, true], 4)).unwrap();
        let text = &src.text;
        let hoisted = text.find("x_base += (int)pos0 * x_str_0;").unwrap();
        let loop_start = text.find("for (i = lid; i < n; i += LDIM_0)").unwrap();
        assert!(hoisted < loop_start);
        assert!(text.contains("    x_p += (int)pos * x_str_1;"));
        assert!(!text[loop_start..].contains("pos0"));
    }

    #[test]
    fn preamble_precedes_reduce_macro() {
        let mut p = plan(vec![true], 2);
        p.preamble = "#define SQ(v) ((v) * (v))".into();
        let src = KernelSource::render(&p).unwrap();
        assert!(src.text.starts_with("#define SQ(v) ((v) * (v))\n\n#define REDUCE(a, b) (a + b)"));
    }
}
