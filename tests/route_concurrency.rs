//! Route registry under concurrent readers and writers

use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use svcd::http::HttpContext;
use svcd::route::{Invoke, RouteEntry, RouteKind, RouteRegistry, ServiceLibraries};

fn services() -> ServiceLibraries {
    let mut services = ServiceLibraries::new();
    services.register("liba.so", "echo", |_, ctx: &mut HttpContext| {
        ctx.response_mut().set_body("a");
        0
    });
    services.register("libb.so", "echo", |_, ctx: &mut HttpContext| {
        ctx.response_mut().set_body("b");
        0
    });
    services
}

#[test]
fn update_is_never_observed_as_missing() {
    let registry = Arc::new(RouteRegistry::new(services()));
    registry.add("^/svc/", "svc", RouteKind::Native, "liba.so").unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let misses = Arc::new(AtomicUsize::new(0));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            let misses = Arc::clone(&misses);
            thread::spawn(move || {
                let mut ctx = HttpContext::default();
                let mut calls = 0usize;
                while !stop.load(Ordering::Acquire) {
                    ctx.reset();
                    match registry.invoke("/svc/echo", &mut ctx) {
                        Invoke::Ok => {
                            let body = ctx.response().body();
                            assert!(body == b"a" || body == b"b", "body {:?}", body);
                        }
                        _ => {
                            misses.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    calls += 1;
                }
                calls
            })
        })
        .collect();

    for i in 0..500 {
        let library = if i % 2 == 0 { "libb.so" } else { "liba.so" };
        let entry = RouteEntry::new("^/svc/", "svc", RouteKind::Native, library).unwrap();
        registry.update("svc", entry).unwrap();
    }
    stop.store(true, Ordering::Release);

    let calls: usize = readers.into_iter().map(|r| r.join().unwrap()).sum();
    assert!(calls > 0);
    assert_eq!(misses.load(Ordering::SeqCst), 0);
    assert_eq!(registry.len(), 1);
}

#[test]
fn readers_see_whole_tables_during_add_and_erase() {
    let registry = Arc::new(RouteRegistry::new(services()));
    registry.add("^/svc/", "base", RouteKind::Native, "liba.so").unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let routes = registry.routes();
                    // either just the base route or base plus the hot one,
                    // always ordered most specific first
                    match routes.len() {
                        1 => assert_eq!(routes[0].name(), "base"),
                        2 => {
                            assert_eq!(routes[0].name(), "hot");
                            assert_eq!(routes[1].name(), "base");
                        }
                        n => panic!("torn table with {} entries", n),
                    }

                    let found = registry.dispatch("/svc/echo").unwrap();
                    assert!(found.name() == "hot" || found.name() == "base");
                }
            })
        })
        .collect();

    for _ in 0..500 {
        registry
            .add("^/svc/echo", "hot", RouteKind::Native, "libb.so")
            .unwrap();
        assert_eq!(registry.erase("hot"), 1);
    }
    stop.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(registry.len(), 1);
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize, usize),
    Erase(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..6usize, 0..4usize).prop_map(|(p, n)| Op::Add(p, n)),
        (0..4usize).prop_map(Op::Erase),
    ]
}

const PATTERNS: [&str; 6] = ["/", "/a", "^/a", "/a/b", "^/a/b", "/a/b/c"];
const NAMES: [&str; 4] = ["w", "x", "y", "z"];

proptest! {
    #[test]
    fn table_order_matches_model(ops in prop::collection::vec(op(), 1..40)) {
        let registry = RouteRegistry::new(ServiceLibraries::new());
        // (pattern, name) in expected stored order
        let mut model: Vec<(&str, &str)> = Vec::new();

        for op in ops {
            match op {
                Op::Add(p, n) => {
                    let (pattern, name) = (PATTERNS[p], NAMES[n]);
                    let result = registry.add(pattern, name, RouteKind::Native, "lib");
                    if model.contains(&(pattern, name)) {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert!(result.is_ok());
                        let pos = model
                            .iter()
                            .position(|(q, _)| q.len() < pattern.len())
                            .unwrap_or(model.len());
                        model.insert(pos, (pattern, name));
                    }
                }
                Op::Erase(n) => {
                    let before = model.len();
                    model.retain(|(_, name)| *name != NAMES[n]);
                    prop_assert_eq!(registry.erase(NAMES[n]), before - model.len());
                }
            }

            let stored: Vec<(String, String)> = registry
                .routes()
                .iter()
                .map(|e| (e.pattern().to_string(), e.name().to_string()))
                .collect();
            let expected: Vec<(String, String)> = model
                .iter()
                .map(|(p, n)| (p.to_string(), n.to_string()))
                .collect();
            prop_assert_eq!(stored, expected);

            let first_match = model.iter().find(|(p, _)| {
                regex::Regex::new(p).unwrap().is_match("/a/b/c")
            });
            let dispatched = registry.dispatch("/a/b/c");
            prop_assert_eq!(
                dispatched.map(|e| e.name().to_string()),
                first_match.map(|(_, n)| n.to_string())
            );
        }
    }
}
