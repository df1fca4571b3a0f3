use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rust_decimal::Decimal;

use crops_watcher::normalizer::UnitNormalizer;

const PACK_LABELS: &[&str] = &[
    "500g",
    "1 kg",
    "250 gm",
    "2 x 200g",
    "1.5 Kg",
    "750 ML",
    "1 piece",
    "bunch",
    "٥٠٠ جرام",
];

const PRICE_LABELS: &[&str] = &["EGP 12.50", "24.00 ج.م", "1,250.75", "Price: 8"];

fn bench_parse_pack(c: &mut Criterion) {
    let normalizer = UnitNormalizer::new();
    c.bench_function("parse_pack", |b| {
        b.iter(|| {
            for label in PACK_LABELS {
                black_box(normalizer.parse_pack(black_box(label)));
            }
        })
    });
}

fn bench_normalize(c: &mut Criterion) {
    let normalizer = UnitNormalizer::new();
    let price = Decimal::new(1250, 2);
    c.bench_function("normalize", |b| {
        b.iter(|| {
            for label in PACK_LABELS {
                black_box(normalizer.normalize(black_box(label), price));
            }
        })
    });
}

fn bench_parse_price(c: &mut Criterion) {
    let normalizer = UnitNormalizer::new();
    c.bench_function("parse_price", |b| {
        b.iter(|| {
            for label in PRICE_LABELS {
                black_box(normalizer.parse_price(black_box(label)));
            }
        })
    });
}

criterion_group!(benches, bench_parse_pack, bench_normalize, bench_parse_price);
criterion_main!(benches);
