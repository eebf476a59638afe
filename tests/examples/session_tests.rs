use respmock::{hooks, prelude::*, Lifecycle, NoMatch};
use std::{sync::Arc, time::Duration};
use tokio::sync::Notify;

#[tokio::test]
async fn unmatched_request_fails_the_session_test() {
    let _ = env_logger::try_init();

    let session = MockSession::start().await.unwrap();
    let server = session.server();
    server.add("foo.com", "/", "get", "hi");

    let client = Client::new();
    let res = client.get("http://foo.com/").await.unwrap();
    assert_eq!(res.body().as_ref(), b"hi");

    // The expectation was consumed by the first request.
    let res = client.get("http://foo.com/").await.unwrap();
    assert_eq!(res.status(), 500);

    let expected = NoMatch {
        host: "foo.com".into(),
        path: "/".into(),
        method: "GET".into(),
        host_matched: true,
        path_matched: true,
    };
    assert_eq!(server.failure(), Some(expected.clone()));

    match session.stop().await {
        Err(respmock::Error::SessionFailed(failure)) => assert_eq!(failure, expected),
        other => panic!("unexpected stop result: {:?}", other),
    }
}

#[tokio::test]
async fn swallowed_failures_are_still_reported_test() {
    let _ = env_logger::try_init();

    let result = MockSession::run(|_server| async move {
        // The code under test ignores the 500 it gets.
        let _ = Client::new().get("http://unknown.example.com/").await;
    })
    .await;

    match result {
        Err(respmock::Error::SessionFailed(failure)) => {
            assert_eq!(failure.host, "unknown.example.com");
            assert!(!failure.host_matched);
            assert!(!failure.path_matched);
        }
        other => panic!("unexpected session result: {:?}", other.err()),
    }
}

#[tokio::test]
async fn requests_after_a_failure_are_refused_test() {
    let _ = env_logger::try_init();

    let result = MockSession::run(|server| async move {
        server.add("foo.com", "/ok", "get", "fine");

        let client = Client::new();
        let res = client.get("http://foo.com/missing").await.unwrap();
        assert_eq!(res.status(), 500);

        // The listener may already be closed, so this is either an error or a 500.
        match client.get("http://foo.com/ok").await {
            Ok(res) => assert_eq!(res.status(), 500),
            Err(_) => {}
        }

        assert_eq!(server.pending(), 1);
    })
    .await;

    match result {
        Err(respmock::Error::SessionFailed(failure)) => assert_eq!(failure.path, "/missing"),
        other => panic!("unexpected session result: {:?}", other.err()),
    }
}

#[tokio::test]
async fn unconsumed_expectations_do_not_fail_the_session_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        server.add("foo.com", "/never", "get", "unused");
        assert_eq!(server.pending(), 1);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn stopped_session_closes_its_listener_test() {
    let _ = env_logger::try_init();

    let session = MockSession::start().await.unwrap();
    assert_eq!(session.lifecycle(), Lifecycle::Running);

    // A client pinned to the session hooks keeps targeting the mock listener.
    let client = Client::with_hooks(hooks::current());

    session.stop().await.unwrap();

    let err = client.get("http://foo.com/").await.unwrap_err();
    assert!(
        matches!(err, respmock::ClientError::HyperUtilError(ref e) if e.is_connect()),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn server_handle_outlives_the_session_test() {
    let _ = env_logger::try_init();

    let server = MockSession::run(|server| async move {
        assert_eq!(server.lifecycle(), Lifecycle::Running);
        server
    })
    .await
    .unwrap();

    assert_eq!(server.lifecycle(), Lifecycle::Stopped);
}

#[tokio::test]
async fn abandoned_request_keeps_its_expectation_consumed_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        let started = Arc::new(Notify::new());
        let signal = started.clone();
        server.add(
            "foo.com",
            "/slow",
            "get",
            ResponseSource::from_async_fn(move |_req| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    MockResponse::text("too late")
                }
            }),
        );

        let client = Client::new();
        let outcome = tokio::select! {
            res = client.get("http://foo.com/slow") => Some(res),
            _ = started.notified() => None,
        };

        assert!(outcome.is_none());
        assert_eq!(server.pending(), 0);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn panics_inside_run_release_the_session_test() {
    let _ = env_logger::try_init();

    let outcome = tokio::spawn(async {
        MockSession::run(|_server| async move {
            panic!("assertion in test body");
        })
        .await
    })
    .await;
    assert!(outcome.unwrap_err().is_panic());

    // A new session can start, so the previous one released its lock.
    MockSession::run(|server| async move {
        server.add("foo.com", "/", "get", "next");
        let res = Client::new().get("http://foo.com/").await.unwrap();
        assert_eq!(res.body().as_ref(), b"next");
    })
    .await
    .unwrap();
}

#[tokio::test]
#[should_panic(expected = "mock session failed")]
async fn dropping_a_failed_session_panics_test() {
    let session = MockSession::start().await.unwrap();

    let res = Client::new().get("http://nothing.example.com/").await.unwrap();
    assert_eq!(res.status(), 500);

    drop(session);
}

#[tokio::test]
async fn builder_starts_a_session_on_the_requested_host_test() {
    let _ = env_logger::try_init();

    let session = MockServerBuilder::new()
        .host("127.0.0.1".parse().unwrap())
        .start()
        .await
        .unwrap();

    assert_eq!(session.server().host(), "127.0.0.1");
    assert_ne!(session.server().port(), 0);

    session.stop().await.unwrap();
}
