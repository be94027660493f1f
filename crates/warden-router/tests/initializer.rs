mod common;

use std::time::Duration;

use tokio::time::Instant;
use tracing_test::traced_test;
use warden_core::{CoreError, CredentialStore, ErrorCategory, MemoryCredentials, codes};
use warden_router::{InitDynamicRouteError, RouterEngine};

use common::{Harness, SERVER_DOWN, ScriptedSource, Step, backend_routes, static_routes};

#[tokio::test]
async fn loads_and_registers_backend_routes() {
    let harness = Harness::signed_in(ScriptedSource::serving(backend_routes()), &["admin"]);

    let report = harness
        .initializer
        .init_dynamic_routes(static_routes(), false)
        .await
        .expect("initialization succeeds");

    assert_eq!(report.fetched, 2);
    assert_eq!(report.registered, 3);
    assert_eq!(report.attempts, 1);
    assert!(!report.already_loaded);
    assert!(harness.registry.has_route("Reports"));
    assert!(harness.registry.has_route("AdminUsers"));
    assert!(harness.permissions.is_loaded());
    assert_eq!(harness.permissions.static_routes(), static_routes());
    assert_eq!(harness.permissions.dynamic_routes(), backend_routes());
    assert!(!harness.initializer.is_in_flight());
}

#[tokio::test]
async fn second_call_is_a_noop() {
    let harness = Harness::signed_in(ScriptedSource::serving(backend_routes()), &[]);
    harness
        .initializer
        .init_dynamic_routes(static_routes(), false)
        .await
        .expect("first load");
    let revision = harness.registry.revision();

    let report = harness
        .initializer
        .init_dynamic_routes(static_routes(), false)
        .await
        .expect("second load");

    assert!(report.already_loaded);
    assert_eq!(harness.source.calls(), 1);
    assert_eq!(harness.registry.revision(), revision);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_fetch() {
    let source = ScriptedSource::with_latency(
        Vec::new(),
        Step::Routes(backend_routes()),
        Duration::from_millis(200),
    );
    let harness = Harness::signed_in(source, &[]);

    let (first, second, third) = tokio::join!(
        harness.initializer.init_dynamic_routes(static_routes(), false),
        harness.initializer.init_dynamic_routes(static_routes(), false),
        harness.initializer.init_dynamic_routes(static_routes(), false),
    );

    assert_eq!(harness.source.calls(), 1);
    let first = first.expect("first caller");
    assert_eq!(second.expect("second caller"), first);
    assert_eq!(third.expect("third caller"), first);
    assert_eq!(harness.registry.names().len(), 2 + 3);
}

#[tokio::test(start_paused = true)]
async fn abandoned_caller_does_not_cancel_the_fetch() {
    let source = ScriptedSource::with_latency(
        Vec::new(),
        Step::Routes(backend_routes()),
        Duration::from_millis(500),
    );
    let harness = Harness::signed_in(source, &[]);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        harness.initializer.init_dynamic_routes(static_routes(), false),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(harness.initializer.is_in_flight());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(harness.permissions.is_loaded());
    assert!(harness.registry.has_route("Reports"));
    assert!(!harness.initializer.is_in_flight());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_linear_delays() {
    let source = ScriptedSource::new(
        vec![Step::Fail(SERVER_DOWN), Step::Fail(codes::HTTP_NETWORK)],
        Step::Routes(backend_routes()),
    );
    let harness = Harness::signed_in(source, &[]);

    let started = Instant::now();
    let report = harness
        .initializer
        .init_dynamic_routes(static_routes(), false)
        .await
        .expect("third attempt succeeds");

    // 1s + 2s
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(report.attempts, 3);
    assert_eq!(harness.source.calls(), 3);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn exhaustion_degrades_to_static_routes() {
    let harness = Harness::signed_in(ScriptedSource::new(Vec::new(), Step::Fail(SERVER_DOWN)), &[]);

    let started = Instant::now();
    let err = harness
        .initializer
        .init_dynamic_routes(static_routes(), false)
        .await
        .expect_err("every attempt fails");

    assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 3));
    assert_eq!(harness.source.calls(), 4);
    assert!(matches!(
        err,
        InitDynamicRouteError::Exhausted { attempts: 4, code, .. } if code == codes::HTTP_SERVER
    ));
    assert!(harness.permissions.is_loaded());
    assert!(!harness.registry.has_route("Reports"));
    assert!(harness.credentials.token().is_some());
    assert!(logs_contain("dynamic route retries exhausted"));

    let core: CoreError = err.into();
    assert_eq!(core.code(), codes::ROUTE_INIT_FAILED);
    assert!(!core.is_retryable());
}

#[tokio::test]
async fn missing_credentials_are_fatal_without_fetching() {
    let harness = Harness::new(ScriptedSource::serving(backend_routes()), MemoryCredentials::new());

    let err = harness
        .initializer
        .init_dynamic_routes(static_routes(), false)
        .await
        .expect_err("no token");

    assert!(matches!(
        err,
        InitDynamicRouteError::Fatal { code, .. } if code == codes::AUTH_MISSING_CREDENTIALS
    ));
    assert_eq!(harness.source.calls(), 0);
    assert!(!harness.permissions.is_loaded());
}

#[tokio::test(start_paused = true)]
async fn rejected_token_is_fatal_without_retry() {
    let harness = Harness::signed_in(
        ScriptedSource::new(Vec::new(), Step::Fail(codes::AUTH_REJECTED)),
        &[],
    );

    let started = Instant::now();
    let err = harness
        .initializer
        .init_dynamic_routes(static_routes(), false)
        .await
        .expect_err("backend rejects the token");

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(harness.source.calls(), 1);
    let core: CoreError = err.into();
    assert_eq!(core.category(), ErrorCategory::Unauthenticated);
}

#[tokio::test]
#[traced_test]
async fn empty_backend_list_still_marks_loaded() {
    let harness = Harness::signed_in(ScriptedSource::serving(Vec::new()), &[]);

    let report = harness
        .initializer
        .init_dynamic_routes(static_routes(), true)
        .await
        .expect("empty list is valid");

    assert_eq!(report.registered, 0);
    assert!(harness.permissions.is_loaded());
    assert!(logs_contain("backend returned no dynamic routes"));
}

#[tokio::test]
#[traced_test]
async fn debug_mode_logs_each_registered_route() {
    let harness = Harness::signed_in(ScriptedSource::serving(backend_routes()), &[]);
    harness
        .initializer
        .init_dynamic_routes(static_routes(), true)
        .await
        .expect("initialization succeeds");
    assert!(logs_contain("registered dynamic route"));
    assert!(logs_contain("/admin/users"));
}

#[tokio::test]
async fn colliding_names_are_skipped_not_fatal() {
    let mut routes = backend_routes();
    routes.push(warden_core::RouteDescriptor::new("Welcome", "/other-welcome"));
    let harness = Harness::signed_in(ScriptedSource::serving(routes), &[]);

    let report = harness
        .initializer
        .init_dynamic_routes(static_routes(), false)
        .await
        .expect("collision is skipped");

    assert_eq!(report.registered, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        harness.registry.get("Welcome").map(|route| route.full_path),
        Some("/welcome".to_owned())
    );
}
