use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use skald::core::disk_index::{DiskIndex, OpenSettings};
use skald::core::types::DocId;
use skald::index::indexer::{Indexer, IndexerSettings, SourceDocument, VecSource};
use skald::schema::schema::Schema;
use skald::search::matcher::TermMatcher;

fn make_docs(count: usize) -> Vec<SourceDocument> {
    let words = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];
    (1..=count as u64)
        .map(|id| {
            let text: Vec<&str> = (0..30)
                .map(|i| words[(id as usize * 31 + i * 7) % words.len()])
                .collect();
            SourceDocument {
                doc_id: DocId(id),
                fields: vec![text.join(" ")],
                attrs: Vec::new(),
            }
        })
        .collect()
}

fn text_schema() -> Schema {
    let mut schema = Schema::new();
    schema.add_field("content").unwrap();
    schema
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for doc_count in [100usize, 1000, 5000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(doc_count),
            &doc_count,
            |b, &doc_count| {
                b.iter(|| {
                    let dir = tempfile::tempdir().unwrap();
                    let mut indexer = Indexer::new(IndexerSettings::plain(text_schema()));
                    let mut source = VecSource::new(make_docs(doc_count));
                    indexer.build(dir.path().join("idx"), &mut source).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn bench_term_query(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut indexer = Indexer::new(IndexerSettings::plain(text_schema()));
    let mut source = VecSource::new(make_docs(5000));
    indexer.build(dir.path().join("idx"), &mut source).unwrap();
    let index = DiskIndex::open(dir.path().join("idx"), OpenSettings::default()).unwrap();

    c.bench_function("term_query_5k_docs", |b| {
        b.iter(|| {
            let mut matcher = TermMatcher::new(&index, &["fox"], false).unwrap().unwrap();
            black_box(matcher.collect().unwrap());
        });
    });
}

criterion_group!(benches, bench_build, bench_term_query);
criterion_main!(benches);
