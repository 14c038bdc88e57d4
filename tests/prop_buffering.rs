// Property: a cacheable body is delivered unchanged whether it is stored,
// served from the cache afterwards, or streamed past the size limit

mod common;

use common::*;
use http::StatusCode;
use http_cache_exec::{CacheConfig, CacheResponseStatus};
use proptest::prelude::*;

const MAX_OBJECT_SIZE: usize = 1024;

fn headers() -> Vec<(&'static str, String)> {
    vec![("date", http_date(0)), ("cache-control", "max-age=600".to_string())]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Bodies within the limit are committed and served identically from the cache
    #[test]
    fn prop_stored_body_round_trip(
        data in prop::collection::vec(any::<u8>(), 1..=MAX_OBJECT_SIZE),
        chunk_size in 1usize..256,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (exec, cache) = executor(CacheConfig::new(MAX_OBJECT_SIZE).unwrap());
            let body = data.clone();
            let chain = ScriptedChain::new(move |_, _| {
                streamed_response(StatusCode::OK, &headers(), body.clone(), chunk_size)
            });

            let first = exec.execute(get("/blob"), None, &scope(), &chain).await.unwrap();
            let first = first.into_body().collect().await.unwrap();
            prop_assert_eq!(&first[..], &data[..]);
            prop_assert_eq!(cache.get_stats().total_entries, 1);

            let hit_scope = scope();
            let second = exec.execute(get("/blob"), None, &hit_scope, &chain).await.unwrap();
            let second = second.into_body().collect().await.unwrap();
            prop_assert_eq!(&second[..], &data[..]);
            prop_assert_eq!(hit_scope.context().cache_response_status(), CacheResponseStatus::CacheHit);
            prop_assert_eq!(chain.calls(), 1);

            Ok(())
        })?;
    }

    /// Bodies past the limit reach the client in full and are never stored
    #[test]
    fn prop_oversized_body_streams_through(
        extra in 1usize..4096,
        chunk_size in 1usize..512,
        seed in any::<u8>(),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (exec, cache) = executor(CacheConfig::new(MAX_OBJECT_SIZE).unwrap());
            let data: Vec<u8> = (0..MAX_OBJECT_SIZE + extra)
                .map(|i| (i as u8).wrapping_add(seed))
                .collect();
            let body = data.clone();
            let chain = ScriptedChain::new(move |_, _| {
                streamed_response(StatusCode::OK, &headers(), body.clone(), chunk_size)
            });

            let response = exec.execute(get("/large"), None, &scope(), &chain).await.unwrap();
            let received = response.into_body().collect().await.unwrap();

            prop_assert_eq!(received.len(), data.len());
            prop_assert_eq!(&received[..], &data[..]);
            prop_assert_eq!(cache.get_stats().total_entries, 0);
            prop_assert_eq!(exec.metrics().get_stats().oversized_responses, 1);

            Ok(())
        })?;
    }
}
