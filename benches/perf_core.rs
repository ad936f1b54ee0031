use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fixsweep::failure::Failure;
use fixsweep::grouping::FailureGrouper;
use fixsweep::patterns::detector::MultiPatternDetector;
use fixsweep::patterns::seed::seed_patterns;
use fixsweep::patterns::PatternRecognitionEngine;

const FAILURE_TYPES: &[(&str, &str)] = &[
    ("AssertionError", "assert {} == 42"),
    ("KeyError", "'user_{}'"),
    ("AttributeError", "'NoneType' object has no attribute 'field_{}'"),
    ("TypeError", "unsupported operand type(s) for +: 'int' and 'str' at arg {}"),
    ("ValueError", "invalid literal for int() with base 10: 'x{}'"),
];

fn synthetic_failures(count: usize) -> Vec<Failure> {
    (0..count)
        .map(|i| {
            let (failure_type, template) = FAILURE_TYPES[i % FAILURE_TYPES.len()];
            Failure::new(
                format!("tests/test_mod_{:03}.py::test_case_{:05}", i % 200, i),
                format!("tests/test_mod_{:03}.py", i % 200),
                failure_type,
                template.replace("{}", &i.to_string()),
            )
        })
        .collect()
}

fn synthetic_report(lines: usize) -> String {
    synthetic_failures(lines)
        .iter()
        .map(|f| format!("FAILED {} - {}: {}\n", f.test_id, f.failure_type, f.message))
        .collect()
}

fn bench_detector(c: &mut Criterion) {
    let patterns: Vec<String> = seed_patterns().into_iter().map(|p| p.pattern).collect();

    c.bench_function("detector_build_seed", |b| {
        b.iter(|| {
            let detector = MultiPatternDetector::build(black_box(&patterns), true);
            black_box(detector.pattern_count());
        });
    });

    let detector = MultiPatternDetector::build(&patterns, true);
    let text = synthetic_report(2_000);
    c.bench_function("detector_search_report", |b| {
        b.iter(|| {
            let hits = detector.find_all(black_box(&text));
            black_box(hits.len());
        });
    });
}

fn bench_grouping(c: &mut Criterion) {
    let failures = synthetic_failures(10_000);
    let grouper = FailureGrouper::default();

    c.bench_function("group_failures_10k", |b| {
        b.iter(|| {
            let groups = grouper.group_failures(black_box(&failures));
            black_box(groups.len());
        });
    });
}

fn bench_analyze(c: &mut Criterion) {
    let engine = PatternRecognitionEngine::with_seed_patterns();
    let report = synthetic_report(5_000);

    c.bench_function("analyze_report_5k", |b| {
        b.iter(|| {
            let analysis = engine.analyze(black_box(&report), 2);
            black_box(analysis.bulk_fixes.len());
        });
    });
}

criterion_group!(perf_core, bench_detector, bench_grouping, bench_analyze);
criterion_main!(perf_core);
