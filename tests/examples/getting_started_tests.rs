use respmock::prelude::*;

#[tokio::test]
async fn getting_started_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        // A plain body becomes a 200 response.
        server.add("foo.com", "/", "get", "hi there!!");

        // Custom status codes need a full response.
        server.add(
            "foo.com",
            "/",
            "get",
            MockResponse::text("error").status(500),
        );

        // Producers compute the response from the request.
        server.add(
            "foo.com",
            "/",
            "get",
            ResponseSource::from_fn(|req| req.url().unwrap().to_string()),
        );

        let client = Client::new();

        let res = client.get("http://foo.com").await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.body().as_ref(), b"hi there!!");

        let res = client.get("http://foo.com").await.unwrap();
        assert_eq!(res.status(), 500);
        assert_eq!(res.body().as_ref(), b"error");

        let res = client.get("http://foo.com").await.unwrap();
        assert_eq!(res.body().as_ref(), b"http://foo.com/");

        assert_eq!(server.pending(), 0);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn https_requests_are_answered_in_plain_text_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        server.add(
            "foo.com",
            "/",
            "get",
            ResponseSource::from_fn(|req| {
                MockResponse::text("hi").header("x-scheme", req.scheme())
            }),
        );

        let res = Client::new().get("https://foo.com").await.unwrap();

        assert_eq!(res.body().as_ref(), b"hi");
        assert_eq!(res.headers()["x-scheme"], "https");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn any_matches_every_request_in_order_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        server.add(ANY, ANY, ANY, MockResponse::text("hi"));
        server.add(ANY, ANY, ANY, MockResponse::text("there"));

        let client = Client::new();

        let res = client.get("http://foo.com").await.unwrap();
        assert_eq!(res.body().as_ref(), b"hi");

        let res = client.get("http://bar.com").await.unwrap();
        assert_eq!(res.body().as_ref(), b"there");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn producer_sees_request_host_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        let echo_host = ResponseSource::from_fn(|req| req.host().unwrap_or_default());
        server.add(ANY, ANY, ANY, echo_host.clone());
        server.add(ANY, ANY, ANY, echo_host);

        let client = Client::new();

        let res = client.get("http://foo.com").await.unwrap();
        assert_eq!(res.body().as_ref(), b"foo.com");

        let res = client.get("http://bar.com:8080/x").await.unwrap();
        assert_eq!(res.body().as_ref(), b"bar.com");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn async_producer_receives_body_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        server.add(
            "api.example.com",
            "/echo",
            "post",
            ResponseSource::from_async_fn(|req| async move {
                MockResponse::text(req.body_string()).status(201)
            }),
        );

        let res = Client::new()
            .request(
                http::Method::POST,
                "http://api.example.com/echo",
                "ping body",
            )
            .await
            .unwrap();

        assert_eq!(res.status(), 201);
        assert_eq!(res.body().as_ref(), b"ping body");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn json_response_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        let body = serde_json::json!({ "status": "ok", "items": [1, 2, 3] });
        server.add(
            "api.example.com",
            "/status",
            "get",
            MockResponse::json(&body).unwrap(),
        );

        let res = Client::new()
            .get("http://api.example.com/status")
            .await
            .unwrap();

        assert_eq!(res.headers()["content-type"], "application/json");
        let value: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(value, body);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn redirect_status_is_not_followed_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        server.add("foo.com", "/", "get", MockResponse::text("hi").status(301));

        let res = Client::new().get("http://foo.com").await.unwrap();

        assert_eq!(res.status(), 301);
        assert_eq!(res.body().as_ref(), b"hi");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn raw_response_is_written_verbatim_test() {
    let _ = env_logger::try_init();

    MockSession::run(|server| async move {
        server.add(
            ANY,
            ANY,
            ANY,
            ResponseSource::raw(
                "HTTP/1.1 200 OK\r\nDate: Tue, 26 Dec 2017 05:47:50 GMT\r\n\r\n\
                 <html><body><h1>It works!</h1></body></html>\n",
            ),
        );

        let res = Client::new().get("http://foo.com/").await.unwrap();

        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["date"], "Tue, 26 Dec 2017 05:47:50 GMT");
        assert!(String::from_utf8_lossy(res.body()).contains("It works!"));
    })
    .await
    .unwrap();
}
