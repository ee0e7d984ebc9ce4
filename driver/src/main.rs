use clap::{Parser, Subcommand};
use log::info;
use shale_core::ast::{BinaryOp, BuiltinFn, BuiltinValue, Module};
use shale_core::builder::ProgramBuilder;
use shale_core::executor::{Binding, BindingList, OverrideList, ShaderExecutor};
use shale_core::invocation::UVec3;
use shale_core::memory::{Memory, SharedMemory};
use shale_core::types::{AddressSpace, ScalarKind};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "shale")]
#[command(about = "A stepping interpreter for compute shaders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in sample shader and print its output buffer
    Run {
        /// Sample name; see `list`
        #[arg(value_name = "SAMPLE")]
        sample: String,

        /// Number of workgroups along x
        #[arg(short, long, default_value_t = 2)]
        workgroups: u32,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List the built-in samples
    List,
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("Execution error: {0}")]
    ExecError(#[from] shale_core::error::ExecError),

    #[error("unknown sample '{0}', try `shale list`")]
    UnknownSample(String),
}

const SAMPLES: &[(&str, &str)] = &[
    ("double", "writes gid.x * 2 into out[gid.x]"),
    ("reverse", "mirrors values within each workgroup through shared memory"),
    ("count", "atomically counts every invocation into a single word"),
];

fn main() -> Result<(), DriverError> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { sample, workgroups, verbose } => run_sample(&sample, workgroups, verbose)?,
        Commands::List => {
            for (name, what) in SAMPLES {
                println!("{:10} {}", name, what);
            }
        }
    }

    Ok(())
}

fn run_sample(sample: &str, workgroups: u32, verbose: bool) -> Result<(), DriverError> {
    let (module, out_words) = match sample {
        "double" => (double_module(), 4 * workgroups as u64),
        "reverse" => (reverse_module(), 4 * workgroups as u64),
        "count" => (count_module(), 1),
        other => return Err(DriverError::UnknownSample(other.to_string())),
    };

    let mut exec = ShaderExecutor::create(module, "main", &OverrideList::new())?;
    exec.set_step_limit(1_000_000);
    exec.add_error_callback(|diags| {
        for diag in diags {
            eprintln!("{}", diag);
        }
    });
    if verbose {
        exec.add_workgroup_begin_callback(|group| info!("workgroup {} starting", group));
    }

    let out = Memory::new_shared(out_words * 4);
    let mut bindings = BindingList::new();
    bindings.insert((0, 0), Binding { memory: out.clone(), offset: 0 });
    exec.run(UVec3::new(workgroups, 1, 1), &bindings)?;

    print_buffer(&out);
    Ok(())
}

fn print_buffer(memory: &SharedMemory) {
    let m = memory.borrow();
    for i in 0..m.size() / 4 {
        println!("out[{}] = {}", i, m.load_u32(i * 4));
    }
}

/// out[gid.x] = gid.x * 2, workgroup size 4.
fn double_module() -> Module {
    let mut b = ProgramBuilder::new();
    let u32_ty = b.ty_u32();
    let v3u = b.ty_vec(ScalarKind::U32, 3);
    let arr = b.ty_runtime_array(u32_ty);
    let out = b.global_var("out", AddressSpace::Storage, arr, Some((0, 0)), None);
    let gid = b.param("gid", v3u, Some(BuiltinValue::GlobalInvocationId));
    let gid_ref = b.local(gid.local);
    let x1 = b.swizzle(gid_ref, &[0]);
    let out_ref = b.global(out);
    let lhs = b.index(out_ref, x1);
    let gid_ref2 = b.local(gid.local);
    let x2 = b.swizzle(gid_ref2, &[0]);
    let two = b.lit_u32(2);
    let rhs = b.binary(BinaryOp::Multiply, x2, two);
    let s = b.assign(lhs, rhs);
    let body = b.block(&[s]);
    let four = b.lit_u32(4);
    b.entry_point("main", [Some(four), None, None], vec![gid], body);
    b.build()
}

/// Each workgroup of 4 stores lid.x + 10 into shared memory, synchronizes,
/// then writes the mirrored element to out[gid.x].
fn reverse_module() -> Module {
    let mut b = ProgramBuilder::new();
    let u32_ty = b.ty_u32();
    let v3u = b.ty_vec(ScalarKind::U32, 3);
    let scratch_ty = b.ty_array(u32_ty, 4);
    let scratch = b.global_var("scratch", AddressSpace::Workgroup, scratch_ty, None, None);
    let arr = b.ty_runtime_array(u32_ty);
    let out = b.global_var("out", AddressSpace::Storage, arr, Some((0, 0)), None);
    let lid = b.param("lid", v3u, Some(BuiltinValue::LocalInvocationId));
    let gid = b.param("gid", v3u, Some(BuiltinValue::GlobalInvocationId));

    let lid_ref = b.local(lid.local);
    let lx = b.swizzle(lid_ref, &[0]);
    let scratch_ref = b.global(scratch);
    let store_lhs = b.index(scratch_ref, lx);
    let lid_ref2 = b.local(lid.local);
    let lx2 = b.swizzle(lid_ref2, &[0]);
    let ten = b.lit_u32(10);
    let value = b.binary(BinaryOp::Add, lx2, ten);
    let s1 = b.assign(store_lhs, value);

    let barrier = b.barrier(BuiltinFn::WorkgroupBarrier);
    let s2 = b.call_stmt(barrier);

    let gid_ref = b.local(gid.local);
    let gx = b.swizzle(gid_ref, &[0]);
    let out_ref = b.global(out);
    let out_lhs = b.index(out_ref, gx);
    let three = b.lit_u32(3);
    let lid_ref3 = b.local(lid.local);
    let lx3 = b.swizzle(lid_ref3, &[0]);
    let mirrored = b.binary(BinaryOp::Subtract, three, lx3);
    let scratch_ref2 = b.global(scratch);
    let loaded = b.index(scratch_ref2, mirrored);
    let s3 = b.assign(out_lhs, loaded);

    let body = b.block(&[s1, s2, s3]);
    let four = b.lit_u32(4);
    b.entry_point("main", [Some(four), None, None], vec![lid, gid], body);
    b.build()
}

/// atomicAdd(&out, 1) from every invocation, workgroup size 4.
fn count_module() -> Module {
    let mut b = ProgramBuilder::new();
    let u32_ty = b.ty_u32();
    let atomic_ty = b.ty_atomic(ScalarKind::U32);
    let total = b.global_var("out", AddressSpace::Storage, atomic_ty, Some((0, 0)), None);
    let total_ref = b.global(total);
    let addr = b.addr_of(total_ref, AddressSpace::Storage);
    let one = b.lit_u32(1);
    let add = b.call_builtin(BuiltinFn::AtomicAdd, &[addr, one], u32_ty);
    let s = b.call_stmt(add);
    let body = b.block(&[s]);
    let four = b.lit_u32(4);
    b.entry_point("main", [Some(four), None, None], vec![], body);
    b.build()
}
