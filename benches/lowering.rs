//! Lowering throughput for representative kernels.
//!
//! Measures:
//! 1. A point copy (single variant, no staging)
//! 2. A 3x3 clamp blur (ten variants, unrolled reduction)
//! 3. A 5x5 runtime-mask blur through the tile buffer with 4 pixels per thread

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pixkern::ast::{AssignOp, Block, CaptureKind, Expr, Lambda, Stmt, Ty};
use pixkern::kernel::{
    Accessor, Backend, BoundaryMode, Interpolation, IterationSpace, KernelSpec, Mask, StorageHint,
};
use pixkern::span::Span;
use pixkern::{lower_kernel, LowerOptions};

fn member(name: &str) -> Expr {
    Expr::Member {
        name: name.to_string(),
        span: Span::dummy(),
    }
}

fn apply(target: &str, args: Vec<Expr>) -> Expr {
    Expr::Apply {
        target: Box::new(member(target)),
        args,
        span: Span::dummy(),
    }
}

fn write_output(value: Expr) -> Stmt {
    Stmt::Assign {
        target: Expr::Method {
            receiver: None,
            method: "output".to_string(),
            args: vec![],
            span: Span::dummy(),
        },
        op: AssignOp::Set,
        value,
    }
}

fn weighted_sum(mask: &str) -> Expr {
    Expr::Call {
        func: "reduce".to_string(),
        args: vec![
            member(mask),
            Expr::Enum {
                name: "sum".to_string(),
                span: Span::dummy(),
            },
            Expr::Lambda(Box::new(Lambda {
                captures: vec![],
                default_capture: Some(CaptureKind::ByRef),
                ret_ty: Ty::Float,
                body: Block::new(vec![Stmt::Return(Some(Expr::mul(
                    apply(mask, vec![]),
                    apply("input", vec![member(mask)]),
                )))]),
                span: Span::dummy(),
            })),
        ],
        span: Span::dummy(),
    }
}

fn kernel(size: u32, boundary: BoundaryMode, storage: StorageHint, constant: bool) -> KernelSpec {
    let cells = (size * size) as usize;
    let masks = if size > 1 {
        vec![Mask {
            name: "m".to_string(),
            elem: Ty::Float,
            size_x: size,
            size_y: size,
            values: constant.then(|| vec![1.0 / cells as f64; cells]),
            decl_span: Span::dummy(),
        }]
    } else {
        vec![]
    };
    let value = if size > 1 {
        weighted_sum("m")
    } else {
        apply("input", vec![Expr::Int(0), Expr::Int(0)])
    };
    KernelSpec {
        name: format!("k{}", size),
        body: Block::new(vec![write_output(value)]),
        output: IterationSpace {
            name: "out".to_string(),
            pixel: Ty::Float,
            width: 4096,
            height: 4096,
            offset_x: 0,
            offset_y: 0,
            stride: None,
        },
        accessors: vec![Accessor {
            name: "input".to_string(),
            pixel: Ty::Float,
            size_x: size,
            size_y: size,
            boundary,
            interpolation: Interpolation::None,
            storage,
            offset_x: 0,
            offset_y: 0,
        }],
        masks,
        scalars: vec![],
        pixels_per_thread: if storage == StorageHint::Local { 4 } else { 1 },
        vectorize: false,
        backend: Backend::Cuda,
        threads_x: 32,
        threads_y: 4,
        source: None,
    }
}

fn bench_lowering(c: &mut Criterion) {
    let options = LowerOptions::default();
    let copy = kernel(1, BoundaryMode::Undefined, StorageHint::Global, true);
    let blur = kernel(3, BoundaryMode::Clamp, StorageHint::Global, true);
    let tiled = kernel(5, BoundaryMode::Mirror, StorageHint::Local, false);

    let mut group = c.benchmark_group("lower_kernel");
    group.bench_function("copy", |b| {
        b.iter(|| lower_kernel(black_box(&copy), &options))
    });
    group.bench_function("blur3_clamp", |b| {
        b.iter(|| lower_kernel(black_box(&blur), &options))
    });
    group.bench_function("blur5_tiled_runtime_mask", |b| {
        b.iter(|| lower_kernel(black_box(&tiled), &options))
    });
    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    let blur = kernel(3, BoundaryMode::Clamp, StorageHint::Global, true);
    let lowered = match lower_kernel(&blur, &LowerOptions::default()) {
        Ok(k) => k,
        Err(e) => panic!("benchmark kernel failed to lower: {}", e),
    };
    c.bench_function("content_hash/blur3_clamp", |b| {
        b.iter(|| pixkern::content_hash(black_box(&lowered)))
    });
}

criterion_group!(benches, bench_lowering, bench_hash);
criterion_main!(benches);
