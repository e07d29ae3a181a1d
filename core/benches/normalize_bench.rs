use criterion::{criterion_group, criterion_main, Criterion};
use formula_core::normalize;
use formula_core::tokenizer::extract_paths;

const FORMULAS: &[&str] = &[
    "$\\displaystyle \\sum_{i=1}^{n} \\binom{n}{i} x^{i} y^{n-i} = (x+y)^n$",
    "\\left( \\frac{\\partial f}{\\partial x} \\right)^{2} + \\mathbf{A}^H \\mathbf{b}",
    "\\begin{pmatrix} \\cos\\theta & -\\sin\\theta \\\\ \\sin\\theta & \\cos\\theta \\end{pmatrix}",
    "\\int_{0}^{\\infty} e^{-x^2}\\, dx = \\frac{\\sqrt{\\pi}}{2}",
];

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize_formulas", |b| {
        b.iter(|| FORMULAS.iter().map(|f| normalize(f).canonical.len()).sum::<usize>())
    });
}

fn bench_extract_paths(c: &mut Criterion) {
    let canonical: Vec<String> = FORMULAS.iter().map(|f| normalize(f).canonical).collect();
    c.bench_function("extract_paths_l2", |b| {
        b.iter(|| canonical.iter().map(|f| extract_paths(f, 2).len()).sum::<usize>())
    });
}

criterion_group!(benches, bench_normalize, bench_extract_paths);
criterion_main!(benches);
