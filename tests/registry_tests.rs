extern crate httpstub;

use std::{
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use httpstub::prelude::*;
use serde_json::json;
use uuid::Uuid;

/// Exercises the correctness-critical consume race: with a single
/// `times.exactly(1)` expectation and many concurrent `select` calls,
/// exactly one caller wins and the counter never goes negative.
#[test]
fn exactly_once_expectation_is_consumed_exactly_once_under_contention() {
    let _ = env_logger::try_init();
    let registry = Arc::new(ExpectationRegistry::new());
    let id = registry
        .add(
            ExpectationDefinition::when(RequestMatcher::new().path("/race"))
                .with_times(Times::once()),
        )
        .unwrap();

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry
                    .select(&HttpStubRequest::new("GET", "/race"))
                    .is_some()
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(wins, 1);

    let audited = registry.retrieve(id).unwrap();
    assert_eq!(audited.times().remaining(), Some(0));
    assert!(registry.retrieve_active(None).is_empty());
}

/// Losers of the consume race must fall through to the next-priority
/// candidate instead of reporting "no match".
#[test]
fn race_losers_fall_through_to_lower_priority_candidate() {
    let _ = env_logger::try_init();
    let registry = Arc::new(ExpectationRegistry::new());
    let limited = registry
        .add(
            ExpectationDefinition::when(RequestMatcher::new().path("/race"))
                .with_priority(10)
                .with_times(Times::once())
                .with_action(json!("limited")),
        )
        .unwrap();
    let fallback = registry
        .add(
            ExpectationDefinition::when(RequestMatcher::new().path("/race"))
                .with_action(json!("fallback")),
        )
        .unwrap();

    let threads = 12;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry
                    .select(&HttpStubRequest::new("GET", "/race"))
                    .map(|expectation| expectation.id())
            })
        })
        .collect();

    let results: Vec<Option<Uuid>> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let limited_hits = results.iter().filter(|id| **id == Some(limited)).count();
    let fallback_hits = results.iter().filter(|id| **id == Some(fallback)).count();

    assert_eq!(limited_hits, 1);
    assert_eq!(fallback_hits, threads - 1);
}

#[test]
fn priority_order_beats_registration_order() {
    let _ = env_logger::try_init();
    let registry = ExpectationRegistry::new();
    registry
        .add(
            ExpectationDefinition::when(RequestMatcher::new().path("/p"))
                .with_priority(0)
                .with_action(json!("low")),
        )
        .unwrap();
    let high = registry
        .add(
            ExpectationDefinition::when(RequestMatcher::new().path("/p"))
                .with_priority(10)
                .with_action(json!("high")),
        )
        .unwrap();

    for _ in 0..5 {
        let selected = registry.select(&HttpStubRequest::new("GET", "/p")).unwrap();
        assert_eq!(selected.id(), high);
    }
}

#[test]
fn expired_expectation_is_never_selected() {
    let _ = env_logger::try_init();
    let registry = ExpectationRegistry::new();
    registry
        .add(
            ExpectationDefinition::when(RequestMatcher::new().path("/ttl"))
                .with_times(Times::exactly(100))
                .with_ttl(TimeToLive::expires_at(Instant::now())),
        )
        .unwrap();

    assert!(registry
        .select(&HttpStubRequest::new("GET", "/ttl"))
        .is_none());

    // A generous deadline keeps the expectation selectable.
    registry
        .add(
            ExpectationDefinition::when(RequestMatcher::new().path("/ttl"))
                .with_ttl(TimeToLive::ttl(Duration::from_secs(3600))),
        )
        .unwrap();
    assert!(registry
        .select(&HttpStubRequest::new("GET", "/ttl"))
        .is_some());
}

#[test]
fn concurrent_registration_and_selection_do_not_block_each_other() {
    let _ = env_logger::try_init();
    let registry = Arc::new(ExpectationRegistry::new());
    registry
        .add(ExpectationDefinition::when(RequestMatcher::new().path("/base")))
        .unwrap();

    let writer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for i in 0..50 {
                registry
                    .add(ExpectationDefinition::when(
                        RequestMatcher::new().path(format!("/extra/{i}")),
                    ))
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..200 {
                    assert!(registry
                        .select(&HttpStubRequest::new("GET", "/base"))
                        .is_some());
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(registry.len(), 51);
}
