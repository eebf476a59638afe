use regex::Regex;
use respmock::prelude::*;

#[tokio::test]
async fn regex_patterns_search_anywhere_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        server.add(
            Regex::new(r"example\.(com|org)").unwrap(),
            Regex::new(r"^/users/\d+$").unwrap(),
            Regex::new("get|head").unwrap(),
            "user",
        );

        let res = Client::new()
            .get("http://api.example.org/users/17")
            .await
            .unwrap();

        assert_eq!(res.body().as_ref(), b"user");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn custom_predicate_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        let long_path = Pattern::matching(|path| path.split('/').count() > 3);
        server.add(ANY, long_path, ANY, "deep");
        server.add(ANY, ANY, ANY, "shallow");

        let client = Client::new();

        let res = client.get("http://foo.com/a").await.unwrap();
        assert_eq!(res.body().as_ref(), b"shallow");

        let res = client.get("http://foo.com/a/b/c").await.unwrap();
        assert_eq!(res.body().as_ref(), b"deep");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn host_and_method_ignore_case_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        server.add("FOO.com", "/", "GeT", "hi");

        let res = Client::new().get("http://foo.COM/").await.unwrap();

        assert_eq!(res.body().as_ref(), b"hi");
        assert!(server.host_registered("foo.com"));
        assert!(!server.host_registered("bar.com"));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn path_is_case_sensitive_test() {
    let _ = env_logger::try_init();

    let result = MockSession::run(|server| async move {
        server.add("foo.com", "/Path", "get", "hi");

        let res = Client::new().get("http://foo.com/path").await.unwrap();
        assert_eq!(res.status(), 500);
    })
    .await;

    match result {
        Err(respmock::Error::SessionFailed(failure)) => {
            assert!(failure.host_matched);
            assert!(!failure.path_matched);
        }
        other => panic!("unexpected session result: {:?}", other.err()),
    }
}
