//! Server lifecycle, pool and configurator integration tests.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, mpsc};
    use std::time::Duration;

    use ringway::{
        RingwayError, Server, ServerHandle, ServerOptions, ServerState, current_thread_daemon,
        run_server,
    };
    use ringway_http::{ResponseMap, Scheme, handler_fn};

    use crate::{http_client, keystore_file, local_options, tls_options, url};

    fn daemon_flag_server(daemon: Option<bool>) -> Option<bool> {
        let mut options = local_options();
        if let Some(daemon) = daemon {
            options.daemon = daemon;
        }
        let handle = run_server(
            handler_fn(|_req| {
                Ok(Some(ResponseMap::text(
                    200,
                    format!("{:?}", current_thread_daemon()),
                )))
            }),
            options,
        )
        .unwrap();

        let reported = http_client()
            .get(url(&handle, Scheme::Http, "/"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        handle.stop().unwrap();

        match reported.as_str() {
            "Some(true)" => Some(true),
            "Some(false)" => Some(false),
            _ => None,
        }
    }

    #[test]
    fn test_should_apply_default_idle_timeout_and_pool_sizes() {
        let keystore = keystore_file();
        let mut options = tls_options(&keystore);
        let defaults = ServerOptions::default();
        options.min_threads = defaults.min_threads;
        options.max_threads = defaults.max_threads;

        let server = Server::new(handler_fn(|_req| Ok(None)), &options);
        assert_eq!(server.connectors().len(), 2);
        for connector in server.connectors() {
            assert_eq!(connector.idle_timeout(), Duration::from_millis(200_000));
        }
        assert_eq!(server.thread_pool().min_threads, 8);
        assert_eq!(server.thread_pool().max_threads, 50);
        assert!(!server.thread_pool().daemon);

        let handle = run_server(handler_fn(|_req| Ok(None)), options).unwrap();
        for connector in handle.connectors() {
            assert_eq!(connector.idle_timeout, Duration::from_millis(200_000));
        }
        assert_eq!(handle.thread_pool().min_threads, 8);
        assert_eq!(handle.thread_pool().max_threads, 50);
        handle.stop().unwrap();
    }

    #[test]
    fn test_should_mark_pool_threads_daemon_only_when_requested() {
        assert_eq!(daemon_flag_server(Some(true)), Some(true));
        assert_eq!(daemon_flag_server(Some(false)), Some(false));
        assert_eq!(daemon_flag_server(None), Some(false));
    }

    #[test]
    fn test_should_run_configurator_after_default_wiring() {
        let (seen_tx, seen_rx) = mpsc::channel();
        let mut options = local_options();
        options.configurator = Some(Box::new(move |server: &mut Server| {
            // Defaults are wired before the hook runs.
            let _ = seen_tx.send((
                server.connectors().len(),
                server.thread_pool().max_threads,
                server.state(),
            ));
            server.thread_pool_mut().max_threads = 20;
            server.connectors_mut()[0].set_idle_timeout(Duration::from_secs(3));
            server.set_handler(handler_fn(|_req| {
                Ok(Some(ResponseMap::text(200, "from configurator")))
            }));
        }));

        let handle = run_server(handler_fn(|_req| Ok(None)), options).unwrap();

        let (connectors, max_threads, state) = seen_rx.recv().unwrap();
        assert_eq!(connectors, 1);
        assert_eq!(max_threads, 8);
        assert_eq!(state, ServerState::Configured);

        assert_eq!(handle.thread_pool().max_threads, 20);
        assert_eq!(handle.connectors()[0].idle_timeout, Duration::from_secs(3));
        let body = http_client()
            .get(url(&handle, Scheme::Http, "/"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(body, "from configurator");

        handle.stop().unwrap();
    }

    #[test]
    fn test_should_leave_no_live_threads_after_failed_start() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let slot: Arc<Mutex<Option<ServerHandle>>> = Arc::default();
        let mut options = local_options();
        options.port = port;
        options.configurator = Some(Box::new({
            let slot = Arc::clone(&slot);
            move |server: &mut Server| *slot.lock().unwrap() = Some(server.handle())
        }));

        let err = run_server(handler_fn(|_req| Ok(None)), options).unwrap_err();
        assert!(matches!(err, RingwayError::Bind { .. }), "{err}");

        let handle = slot.lock().unwrap().take().expect("configurator should have run");
        assert_eq!(handle.state(), ServerState::Stopped);
        assert!(handle.thread_tracker().wait_until_idle(Duration::from_secs(10)));
        assert_eq!(handle.live_threads(), 0);
    }

    #[test]
    fn test_should_release_pool_threads_after_stop() {
        let handle = run_server(
            handler_fn(|_req| Ok(Some(ResponseMap::text(200, "ok")))),
            local_options(),
        )
        .unwrap();
        http_client()
            .get(url(&handle, Scheme::Http, "/"))
            .send()
            .unwrap();
        assert!(handle.live_threads() > 0);

        handle.stop().unwrap();
        assert!(handle.thread_tracker().wait_until_idle(Duration::from_secs(10)));
    }

    #[test]
    fn test_should_block_until_stopped_when_joining() {
        let (handle_tx, handle_rx) = mpsc::channel();
        let mut options = local_options();
        options.join = true;
        options.configurator = Some(Box::new(move |server: &mut Server| {
            let _ = handle_tx.send(server.handle());
        }));

        let runner =
            std::thread::spawn(move || run_server(handler_fn(|_req| Ok(None)), options));
        let handle = handle_rx.recv().unwrap();
        while handle.state() == ServerState::Configured {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!runner.is_finished());

        handle.stop().unwrap();
        let returned = runner.join().unwrap().unwrap();
        assert!(returned.is_stopped());
    }

    #[test]
    fn test_should_finish_in_flight_requests_on_stop() {
        let handle = run_server(
            handler_fn(|_req| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(Some(ResponseMap::text(200, "slow")))
            }),
            local_options(),
        )
        .unwrap();

        let request_url = url(&handle, Scheme::Http, "/");
        let client = std::thread::spawn(move || {
            http_client()
                .get(request_url)
                .send()
                .and_then(reqwest::blocking::Response::text)
        });
        std::thread::sleep(Duration::from_millis(100));

        handle.stop().unwrap();
        assert_eq!(client.join().unwrap().unwrap(), "slow");
    }
}
