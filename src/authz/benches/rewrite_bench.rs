//! Query rewriting and schema pruning benchmarks
//!
//! Measures the per-request cost of the permission layer over a chain of
//! related entity types, with and without column restrictions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fieldguard::{
    Catalog, EntityType, OperationKind, PermissionResolver, PermissionRule, Principal, Query,
    QueryRewriter, QueryString, RegistryBuilder, Schema, SchemaTemplate,
};
use fieldguard::schema::prune;
use std::sync::Arc;

/// `node0 -> node1 -> ... -> node{depth}` through `next` relationships
fn chain_catalog(depth: usize) -> Catalog {
    let mut builder = Catalog::builder();
    for i in 0..=depth {
        let name = format!("node{}", i);
        let mut entity = EntityType::new(name.as_str())
            .columns(["label", "weight", "score", "next_id"])
            .requires("score", ["weight"]);
        let mut schema = SchemaTemplate::new(name.as_str(), name.as_str())
            .attributes(["label", "weight", "score"]);
        if i < depth {
            let next = format!("node{}", i + 1);
            entity = entity.belongs_to("next", next.as_str(), "next_id");
            schema = schema.relationship("next", next.as_str());
        }
        builder = builder.entity(entity).schema(schema);
    }
    builder.build().unwrap()
}

fn registry(depth: usize, restricted: bool) -> Arc<fieldguard::PermissionRegistry> {
    let mut builder = RegistryBuilder::new();
    for i in 0..=depth {
        let rule = if restricted {
            PermissionRule::columns(["label", "score", "next"])
        } else {
            PermissionRule::AllowAll
        };
        builder
            .register(OperationKind::GetList, format!("node{}", i), vec![rule])
            .unwrap();
    }
    Arc::new(builder.seal())
}

fn include_path(depth: usize) -> String {
    vec!["next"; depth].join(".")
}

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_rewrite");

    for depth in [1usize, 4, 8].iter() {
        let catalog = chain_catalog(*depth);
        let schema = catalog.schema("node0").unwrap();
        let raw = format!("include={}", include_path(*depth));

        for restricted in [false, true] {
            let registry = registry(*depth, restricted);
            let label = if restricted { "restricted" } else { "open" };
            group.bench_with_input(BenchmarkId::new(label, depth), depth, |b, _| {
                b.iter(|| {
                    let mut resolver = PermissionResolver::new(
                        registry.clone(),
                        Principal::new("user:bench"),
                        OperationKind::GetList,
                        true,
                    );
                    let mut qs = QueryString::parse(&raw);
                    let query = QueryRewriter::new(&catalog)
                        .rewrite(Query::new("node0"), &schema, &mut qs, &mut resolver)
                        .unwrap();
                    black_box((query, qs))
                });
            });
        }
    }

    group.finish();
}

fn bench_prune(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema_prune");

    for depth in [1usize, 4, 8].iter() {
        let catalog = chain_catalog(*depth);
        let registry = registry(*depth, true);
        let qs = QueryString::parse(&format!("include={}", include_path(*depth)));

        group.bench_with_input(BenchmarkId::new("restricted", depth), depth, |b, _| {
            b.iter(|| {
                let mut resolver = PermissionResolver::new(
                    registry.clone(),
                    Principal::new("user:bench"),
                    OperationKind::GetList,
                    true,
                );
                let mut schema = Schema::for_request(&catalog, "node0", &qs).unwrap();
                let paths = resolver
                    .response_field_paths(&catalog, &schema)
                    .unwrap()
                    .unwrap_or_default();
                prune(&mut schema, &catalog, &paths).unwrap();
                black_box(schema)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rewrite, bench_prune);
criterion_main!(benches);
