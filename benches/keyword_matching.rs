//! Keyword matcher latency benchmarks
//!
//! The request path budgets p95 <= 10ms for dictionaries up to 10k
//! patterns; these benches track the matcher against synthetic dictionaries
//! of increasing size.

use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use shopintent::matching::KeywordMatcher;
use shopintent::taxonomy::{seed_keywords, ActionCode, KeywordEntry};
use shopintent::text::Normalizer;

/// Grow the seed dictionary with synthetic literal and regex patterns until
/// it holds roughly `target` patterns.
fn synthetic_dictionary(target: usize) -> BTreeMap<ActionCode, KeywordEntry> {
    let mut dictionary = seed_keywords();
    let verbs = ["find", "show", "grab", "fetch", "order", "compare"];
    let nouns = ["shoes", "jacket", "phone", "watch", "dress", "socks"];

    let mut produced = 0usize;
    let mut code_index = 0usize;
    'outer: loop {
        let code = ActionCode::new(format!("SYNTHETIC_{code_index:04}"));
        let mut keywords = Vec::new();
        for verb in verbs {
            for noun in nouns {
                keywords.push(format!("{verb} the {noun} {code_index}"));
                produced += 1;
                if produced % 7 == 0 {
                    keywords.push(format!(r"\b{verb}\b.*\b{noun}\b"));
                    produced += 1;
                }
                if produced >= target {
                    dictionary.insert(
                        code,
                        KeywordEntry {
                            priority: (code_index % 9 + 1) as u8,
                            keywords,
                        },
                    );
                    break 'outer;
                }
            }
        }
        dictionary.insert(
            code,
            KeywordEntry {
                priority: (code_index % 9 + 1) as u8,
                keywords,
            },
        );
        code_index += 1;
    }
    dictionary
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyword_search");
    for size in [1_000usize, 5_000, 10_000] {
        let dictionary = synthetic_dictionary(size);
        let matcher = KeywordMatcher::new(&dictionary, Arc::new(Normalizer::default()));

        group.bench_with_input(BenchmarkId::new("exact_hit", size), &matcher, |b, m| {
            b.iter(|| black_box(m.search(black_box("add to cart"), 10)))
        });
        group.bench_with_input(BenchmarkId::new("multi_segment", size), &matcher, |b, m| {
            b.iter(|| {
                black_box(m.search(
                    black_box("find the shoes 12 and track my order, then checkout"),
                    10,
                ))
            })
        });
        group.bench_with_input(BenchmarkId::new("miss", size), &matcher, |b, m| {
            b.iter(|| black_box(m.search(black_box("completely unrelated utterance"), 10)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
