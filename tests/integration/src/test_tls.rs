//! HTTPS connector integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ringway::{ClientAuth, RingwayError, Server, ServerHandle, ServerOptions, run_server};
    use ringway_http::{ResponseMap, Scheme, handler_fn};

    use crate::{
        TEST_CLIENT_PEM, UNTRUSTED_CLIENT_PEM, describe, http_client, http_client_with_identity,
        keystore_file, local_options, tls_options, truststore_file, url,
    };

    fn client_cert_server(options: ServerOptions) -> ServerHandle {
        run_server(
            handler_fn(|req| {
                let chain = req.ssl_client_cert.as_ref().map(Vec::len);
                Ok(Some(ResponseMap::text(200, format!("{chain:?}"))))
            }),
            options,
        )
        .unwrap()
    }

    fn ca_trusting_options(
        keystore: &tempfile::NamedTempFile,
        truststore: &tempfile::NamedTempFile,
        client_auth: ClientAuth,
    ) -> ServerOptions {
        let mut options = tls_options(keystore);
        options.truststore = Some(truststore.path().into());
        options.client_auth = client_auth;
        options
    }

    #[test]
    fn test_should_serve_same_content_over_https() {
        let keystore = keystore_file();
        let handle = run_server(
            handler_fn(|_req| Ok(Some(ResponseMap::text(200, "Hello World")))),
            tls_options(&keystore),
        )
        .unwrap();
        assert_eq!(handle.connectors().len(), 2);
        let client = http_client();

        let plain = client
            .get(url(&handle, Scheme::Http, "/"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        let secure = client
            .get(url(&handle, Scheme::Https, "/"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(plain, "Hello World");
        assert_eq!(secure, plain);

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_report_https_scheme_to_handler() {
        let keystore = keystore_file();
        let handle = run_server(
            handler_fn(|req| Ok(Some(ResponseMap::text(200, describe(req)?.to_string())))),
            tls_options(&keystore),
        )
        .unwrap();

        let map: serde_json::Value = http_client()
            .get(url(&handle, Scheme::Https, "/secure?x=1"))
            .send()
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(map["scheme"], "https");
        assert_eq!(map["uri"], "/secure");
        assert_eq!(map["query_string"], "x=1");
        assert!(map["ssl_client_cert"].is_null());

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_accept_missing_client_cert_when_wanted() {
        let keystore = keystore_file();
        let mut options = tls_options(&keystore);
        options.client_auth = ClientAuth::Want;
        let handle = run_server(
            handler_fn(|_req| Ok(Some(ResponseMap::text(200, "ok")))),
            options,
        )
        .unwrap();

        let response = http_client()
            .get(url(&handle, Scheme::Https, "/"))
            .send()
            .unwrap();
        assert_eq!(response.status(), 200);

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_reject_missing_client_cert_when_needed() {
        let keystore = keystore_file();
        let mut options = tls_options(&keystore);
        options.client_auth = ClientAuth::Need;
        let handle = run_server(
            handler_fn(|_req| Ok(Some(ResponseMap::text(200, "ok")))),
            options,
        )
        .unwrap();

        let result = http_client()
            .get(url(&handle, Scheme::Https, "/"))
            .send();
        assert!(result.is_err(), "handshake without a client certificate should fail");

        // The plaintext connector is unaffected.
        let plain = http_client()
            .get(url(&handle, Scheme::Http, "/"))
            .send()
            .unwrap();
        assert_eq!(plain.status(), 200);

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_deliver_client_certificate_when_wanted() {
        let keystore = keystore_file();
        let truststore = truststore_file();
        let handle =
            client_cert_server(ca_trusting_options(&keystore, &truststore, ClientAuth::Want));

        let with_cert = http_client_with_identity(TEST_CLIENT_PEM)
            .get(url(&handle, Scheme::Https, "/"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(with_cert, "Some(1)");

        let without_cert = http_client()
            .get(url(&handle, Scheme::Https, "/"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(without_cert, "None");

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_deliver_client_certificate_when_needed() {
        let keystore = keystore_file();
        let truststore = truststore_file();
        let handle =
            client_cert_server(ca_trusting_options(&keystore, &truststore, ClientAuth::Need));

        let response = http_client_with_identity(TEST_CLIENT_PEM)
            .get(url(&handle, Scheme::Https, "/"))
            .send()
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().unwrap(), "Some(1)");

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_reject_client_certificate_from_untrusted_ca() {
        let keystore = keystore_file();
        let truststore = truststore_file();
        let handle =
            client_cert_server(ca_trusting_options(&keystore, &truststore, ClientAuth::Need));

        let result = http_client_with_identity(UNTRUSTED_CLIENT_PEM)
            .get(url(&handle, Scheme::Https, "/"))
            .send();
        assert!(result.is_err(), "untrusted client certificate should be rejected");

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_keep_slow_https_requests_past_idle_timeout() {
        let keystore = keystore_file();
        let mut options = tls_options(&keystore);
        options.max_idle_time = Duration::from_millis(200);
        let handle = run_server(
            handler_fn(|_req| {
                std::thread::sleep(Duration::from_millis(800));
                Ok(Some(ResponseMap::text(200, "slow")))
            }),
            options,
        )
        .unwrap();

        let body = http_client()
            .get(url(&handle, Scheme::Https, "/"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(body, "slow");

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_fail_start_without_keystore() {
        let mut options = local_options();
        options.ssl = true;
        options.ssl_port = Some(0);

        let mut server = Server::new(handler_fn(|_req| Ok(None)), &options);
        let handle = server.handle();

        let err = server.start().unwrap_err();
        assert!(matches!(err, RingwayError::Config(_)), "{err}");
        assert!(handle.is_stopped());
        assert!(handle.thread_tracker().wait_until_idle(Duration::from_secs(10)));
    }

    #[test]
    fn test_should_fail_start_with_unreadable_keystore() {
        let mut options = local_options();
        options.ssl_port = Some(0);
        options.keystore = Some(std::path::PathBuf::from("/definitely/not/here.pem").into());

        let err = run_server(handler_fn(|_req| Ok(None)), options).unwrap_err();
        assert!(matches!(err, RingwayError::Io { .. }), "{err}");
    }
}
