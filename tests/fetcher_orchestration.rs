// Fetcher orchestration tests
//
// Concurrency cap, timeout isolation, result caching and validation, run
// against the in-memory store and the fake chain.

mod helpers;

use helpers::{element, engine_with, test_config, FakeChain};
use portfolio_engine::data::portfolio::{AddressSystem, FetcherStatus, NetworkId, PortfolioElement};
use portfolio_engine::{Fetcher, PortfolioError};
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn owner() -> String {
    Pubkey::new_unique().to_string()
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let mut config = test_config();
    config.fetchers.concurrency = 3;
    config.fetchers.timeout_ms = 5_000;
    let engine = engine_with(FakeChain::new(), config);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let fetchers: Vec<Fetcher> = (0..10)
        .map(|i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            Fetcher::from_fn(format!("f{}", i), NetworkId::Solana, move |_, _| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(vec![])
                }
            })
        })
        .collect();

    let result = engine
        .runner
        .run_fetchers(&owner(), AddressSystem::Solana, &fetchers)
        .await
        .unwrap();

    assert_eq!(result.fetcher_reports.len(), 10);
    assert!(result.fetcher_reports.iter().all(|r| r.status == FetcherStatus::Succeeded));
    assert_eq!(peak.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_hung_fetcher_times_out_without_affecting_others() {
    let engine = engine_with(FakeChain::new(), test_config());
    let fetchers = vec![
        Fetcher::from_fn("hangs", NetworkId::Solana, |_, _| std::future::pending()),
        Fetcher::from_fn("fast", NetworkId::Solana, |_, _| async { Ok(vec![element("fast", 3.0)]) }),
        Fetcher::from_fn("broken", NetworkId::Solana, |_, _| async {
            Err(anyhow::anyhow!("unexpected account shape"))
        }),
    ];

    let result = engine
        .runner
        .run_fetchers(&owner(), AddressSystem::Solana, &fetchers)
        .await
        .unwrap();

    let reports = &result.fetcher_reports;
    assert_eq!(reports[0].status, FetcherStatus::Failed);
    assert_eq!(reports[0].error.as_deref(), Some("Fetcher timed out: hangs"));
    assert_eq!(reports[1].status, FetcherStatus::Succeeded);
    assert_eq!(reports[2].status, FetcherStatus::Failed);
    assert_eq!(reports[2].error.as_deref(), Some("unexpected account shape"));
    assert_eq!(result.elements, vec![element("fast", 3.0)]);
}

#[tokio::test]
async fn test_cached_result_skips_executor() {
    let engine = engine_with(FakeChain::new(), test_config());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fetcher = Fetcher::from_fn("cached", NetworkId::Solana, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(vec![element("cached", 7.0)])
        }
    });
    let wallet = owner();

    let first = engine.runner.run_fetcher(&wallet, &fetcher).await.unwrap();
    let second = engine.runner.run_fetcher(&wallet, &fetcher).await.unwrap();

    assert!(first.duration > 0);
    assert_eq!(second.duration, 0);
    assert_eq!(second.elements, first.elements);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Cache entries are per owner
    let other = engine.runner.run_fetcher(&owner(), &fetcher).await.unwrap();
    assert!(other.duration > 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_wrong_address_system_is_rejected_before_execution() {
    let engine = engine_with(FakeChain::new(), test_config());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fetchers = vec![Fetcher::from_fn("sol", NetworkId::Solana, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(vec![]) }
    })];

    let err = engine
        .runner
        .run_fetchers("0x52908400098527886E0F7030069857D2E4169EE7", AddressSystem::Evm, &fetchers)
        .await
        .unwrap_err();

    assert!(matches!(err, PortfolioError::Validation(_)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.context.len(), 0);
}

#[tokio::test]
async fn test_one_success_one_timeout_end_to_end() {
    let chain = FakeChain::new();
    let engine = engine_with(chain.clone(), test_config());
    let wallet = owner();
    let a_elements: Vec<PortfolioElement> = vec![element("a", 10.0), element("a", 5.5)];

    let expected = a_elements.clone();
    let fetchers = vec![
        Fetcher::from_fn("A", NetworkId::Solana, move |_, _| {
            let elements = expected.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(elements)
            }
        }),
        Fetcher::from_fn("B", NetworkId::Solana, |_, _| std::future::pending()),
    ];

    let result = engine
        .runner
        .run_fetchers(&wallet, AddressSystem::Solana, &fetchers)
        .await
        .unwrap();

    assert_eq!(result.owner, wallet);
    assert_eq!(result.address_system, AddressSystem::Solana);
    assert_eq!(result.fetcher_reports.len(), 2);

    let a = &result.fetcher_reports[0];
    assert_eq!(a.id, "A");
    assert_eq!(a.status, FetcherStatus::Succeeded);
    assert!(a.duration.unwrap() >= 50);

    let b = &result.fetcher_reports[1];
    assert_eq!(b.id, "B");
    assert_eq!(b.status, FetcherStatus::Failed);
    assert_eq!(b.error.as_deref(), Some("Fetcher timed out: B"));
    assert!(b.duration.is_none());

    assert_eq!(result.elements, a_elements);
    assert_eq!(result.value, Some(15.5));

    // The activity prefetch ran once for the wallet before the fetchers
    assert_eq!(chain.calls.signature_scans(), 1);
    assert!(engine.context.get_request_activity(&wallet).is_some());
}

#[tokio::test]
async fn test_last_computed_is_recorded() {
    let engine = engine_with(FakeChain::new(), test_config());
    let wallet = owner();
    let fetcher = Fetcher::from_fn("noop", NetworkId::Solana, |_, _| async { Ok(vec![element("noop", 1.0)]) });

    engine.runner.run_fetcher(&wallet, &fetcher).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let last = engine.tracker.store().get_user_last_computed(&wallet).await.unwrap();
    assert!(last.is_some());
}
