use criterion::{black_box, criterion_group, criterion_main, Criterion};

pub fn parse(c: &mut Criterion) {
    let source = include_str!("complex-tree.dts");

    c.bench_function("from_str complex-tree.dts", |b| {
        b.iter(|| dts_parser::from_str(black_box(source)).unwrap())
    });
}

criterion_group!(benches, parse);
criterion_main!(benches);
