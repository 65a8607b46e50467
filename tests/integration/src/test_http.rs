//! Plaintext request/response integration tests.

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use ringway::run_server;
    use ringway_http::{ResponseBody, ResponseMap, Scheme, handler_fn};

    use crate::{describe, http_client, local_options, url};

    #[test]
    fn test_should_serve_handler_response_without_join() {
        let handle = run_server(
            handler_fn(|_req| {
                Ok(Some(
                    ResponseMap::new(200)
                        .header("Content-Type", "text/plain")
                        .body("Hello World"),
                ))
            }),
            local_options(),
        )
        .unwrap();
        assert!(handle.is_started());

        let response = http_client()
            .get(url(&handle, Scheme::Http, "/"))
            .send()
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/plain")
        );
        assert_eq!(response.text().unwrap(), "Hello World");

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_build_request_map_from_post() {
        let handle = run_server(
            handler_fn(|req| {
                let description = describe(req)?;
                Ok(Some(
                    ResponseMap::new(200)
                        .header("Content-Type", "application/json")
                        .body(description.to_string()),
                ))
            }),
            local_options(),
        )
        .unwrap();

        let response = http_client()
            .post(url(&handle, Scheme::Http, "/foo/bar/baz?surname=jones&age=123"))
            .header("Content-Type", "text/plain; charset=UTF-8")
            .body("hello")
            .send()
            .unwrap();
        assert_eq!(response.status(), 200);

        let map: serde_json::Value = response.json().unwrap();
        assert_eq!(map["request_method"], "post");
        assert_eq!(map["uri"], "/foo/bar/baz");
        assert_eq!(map["query_string"], "surname=jones&age=123");
        assert_eq!(map["content_type"], "text/plain; charset=UTF-8");
        assert_eq!(map["content_length"], 5);
        assert_eq!(map["character_encoding"], "UTF-8");
        assert_eq!(map["scheme"], "http");
        assert_eq!(map["server_name"], "127.0.0.1");
        assert_eq!(map["remote_addr"], "127.0.0.1");
        assert_eq!(map["protocol"], "HTTP/1.1");
        assert!(map["ssl_client_cert"].is_null());
        assert_eq!(map["body"], "hello");

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_return_not_found_when_unhandled() {
        let handle = run_server(handler_fn(|_req| Ok(None)), local_options()).unwrap();

        let response = http_client()
            .get(url(&handle, Scheme::Http, "/nothing-here"))
            .send()
            .unwrap();
        assert_eq!(response.status(), 404);

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_return_internal_error_when_handler_fails() {
        let handle = run_server(
            handler_fn(|req| {
                if req.uri == "/panic" {
                    panic!("handler bug");
                }
                anyhow::bail!("database unavailable")
            }),
            local_options(),
        )
        .unwrap();
        let client = http_client();

        let failed = client.get(url(&handle, Scheme::Http, "/")).send().unwrap();
        assert_eq!(failed.status(), 500);
        let panicked = client
            .get(url(&handle, Scheme::Http, "/panic"))
            .send()
            .unwrap();
        assert_eq!(panicked.status(), 500);

        // The server keeps serving after handler failures.
        assert!(handle.is_started());
        let again = client.get(url(&handle, Scheme::Http, "/")).send().unwrap();
        assert_eq!(again.status(), 500);

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_not_treat_idle_timeout_as_request_deadline() {
        let mut options = local_options();
        options.max_idle_time = Duration::from_millis(200);
        let handle = run_server(
            handler_fn(|_req| {
                std::thread::sleep(Duration::from_millis(800));
                Ok(Some(ResponseMap::text(200, "slow")))
            }),
            options,
        )
        .unwrap();

        let response = http_client()
            .get(url(&handle, Scheme::Http, "/"))
            .send()
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().unwrap(), "slow");

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_write_repeated_header_values() {
        let handle = run_server(
            handler_fn(|_req| {
                Ok(Some(
                    ResponseMap::new(204)
                        .header("Set-Cookie", "a=1")
                        .header("Set-Cookie", "b=2"),
                ))
            }),
            local_options(),
        )
        .unwrap();

        let response = http_client()
            .get(url(&handle, Scheme::Http, "/"))
            .send()
            .unwrap();
        assert_eq!(response.status(), 204);
        let cookies: Vec<_> = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_stream_reader_and_file_bodies() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"from disk").unwrap();
        let path = file.path().to_path_buf();

        let handle = run_server(
            handler_fn(move |req| {
                let body = match req.uri.as_str() {
                    "/file" => ResponseBody::File(path.clone()),
                    _ => ResponseBody::Stream(Box::new(std::io::Cursor::new(vec![b'z'; 100_000]))),
                };
                Ok(Some(ResponseMap::new(200).body(body)))
            }),
            local_options(),
        )
        .unwrap();
        let client = http_client();

        let streamed = client
            .get(url(&handle, Scheme::Http, "/stream"))
            .send()
            .unwrap()
            .bytes()
            .unwrap();
        assert_eq!(streamed.len(), 100_000);
        assert!(streamed.iter().all(|b| *b == b'z'));

        let from_file = client
            .get(url(&handle, Scheme::Http, "/file"))
            .send()
            .unwrap();
        assert_eq!(from_file.content_length(), Some(9));
        assert_eq!(from_file.text().unwrap(), "from disk");

        handle.stop().unwrap();
    }
}
