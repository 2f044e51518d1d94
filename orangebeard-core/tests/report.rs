use mockito::{Matcher, Server};
use orangebeard_core::{
    entity::{
        Finish, FinishTestRun, Log, LogLevel, StartStep, StartSuite, StartTest, StartTestRun,
        TestStatus, TestType,
    },
    Config, Error, OrangebeardClient, ResolvedId, RetryConfig,
};
use std::time::Duration;

fn config(server: &Server) -> Config {
    Config {
        endpoint: Some(server.url()),
        token: Some("0f9c6c2e-1d2b-4a57-8d7e-9b1e2f3a4b5c".into()),
        project: Some("demo".into()),
        testset: Some("nightly".into()),
        retry: RetryConfig {
            attempts: Some(2),
            min_delay: Some(Duration::from_millis(1)),
            max_delay: Some(Duration::from_millis(5)),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn partial(json: &str) -> Matcher {
    Matcher::PartialJsonString(json.into())
}

#[tokio::test]
async fn full_lineage_is_reported_with_resolved_ids() -> eyre::Result<()> {
    let mut server = Server::new_async().await;
    let auth = "Bearer 0f9c6c2e-1d2b-4a57-8d7e-9b1e2f3a4b5c";

    let builders = [
        server
            .mock("POST", "/listener/v3/demo/test-run/start")
            .match_header("authorization", auth)
            .match_body(partial(r#"{"testSetName":"nightly"}"#))
            .with_body(r#""run-1""#),
        server
            .mock("POST", "/listener/v3/demo/suite/start")
            .match_body(partial(
                r#"{"testRunUUID":"run-1","suiteNames":["Top","Child"]}"#,
            ))
            .with_body(
                r#"[{"suiteUUID":"suite-top","localSuiteName":"Top"},
                    {"suiteUUID":"suite-child","localSuiteName":"Child"}]"#,
            ),
        server
            .mock("POST", "/listener/v3/demo/test/start")
            .match_body(partial(
                r#"{"testRunUUID":"run-1","suiteUUID":"suite-child","testName":"login"}"#,
            ))
            .with_body(r#""test-1""#),
        server
            .mock("POST", "/listener/v3/demo/step/start")
            .match_body(partial(
                r#"{"testRunUUID":"run-1","testUUID":"test-1","stepName":"open page"}"#,
            ))
            .with_body(r#""step-1""#),
        server
            .mock("POST", "/listener/v3/demo/log/batch")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""stepUUID":"step-1""#.into()),
                Matcher::Regex(r#""message":"hello""#.into()),
                Matcher::Regex(r#""logLevel":"INFO""#.into()),
            ]))
            .with_body(r#"["log-1"]"#),
        server
            .mock("PUT", "/listener/v3/demo/step/finish/step-1")
            .match_body(partial(r#"{"testRunUUID":"run-1","status":"PASSED"}"#)),
        server
            .mock("PUT", "/listener/v3/demo/test/finish/test-1")
            .match_body(partial(r#"{"testRunUUID":"run-1","status":"FAILED"}"#)),
        server
            .mock("PUT", "/listener/v3/demo/test-run/finish/run-1")
            .match_body(Matcher::Regex("endTime".into())),
    ];
    let mut mocks = Vec::with_capacity(builders.len());
    for builder in builders {
        mocks.push(builder.expect(1).create_async().await);
    }

    let client = OrangebeardClient::new(config(&server))?;
    let run = client.start_configured_test_run()?;
    let suites = client.start_suite(StartSuite::from_path(run, "Top/Child"));
    let test = client.start_test(StartTest::new(run, suites[1], "login", TestType::Test));
    let step = client.start_step(StartStep::new(run, test, "open page"));
    let log = client.log(Log::new(run, test, LogLevel::Info, "hello").step(step));
    client.finish_step(step, Finish::new(run, TestStatus::Passed));
    client.finish_test(test, Finish::new(run, TestStatus::Failed));

    client.finish_test_run(run, FinishTestRun::now()).await?;

    for mock in &mocks {
        mock.assert_async().await;
    }
    // Ids are gone once the run is finished.
    assert!(matches!(
        client.wait_for(log).await,
        Err(Error::UnknownId(_))
    ));
    Ok(())
}

#[tokio::test]
async fn unreachable_listener_surfaces_on_finish() -> eyre::Result<()> {
    let mut config = config(&*Server::new_async().await);
    config.endpoint = Some("http://127.0.0.1:9".into());

    let client = OrangebeardClient::new(config)?;
    let run = client.start_test_run(StartTestRun::new("nightly"));
    let suites = client.start_suite(StartSuite::from_path(run, "Top"));

    let res = client.finish_test_run(run, FinishTestRun::now()).await;
    assert!(matches!(res, Err(Error::ConnectionInvalid(_))));
    assert!(!client.is_connection_valid());
    assert_eq!(suites.len(), 1);
    Ok(())
}

#[tokio::test]
async fn silent_listener_does_not_hang_finish() -> eyre::Result<()> {
    // Accepts connections and never answers them.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut config = config(&*Server::new_async().await);
    config.endpoint = Some(format!("http://{addr}"));
    config.client.request_timeout = Duration::from_millis(200);
    config.client.await_timeout = Duration::from_millis(500);

    let client = OrangebeardClient::new(config)?;
    let run = client.start_test_run(StartTestRun::new("nightly"));
    let suites = client.start_suite(StartSuite::from_path(run, "Top"));

    let res = tokio::time::timeout(
        Duration::from_secs(10),
        client.finish_test_run(run, FinishTestRun::now()),
    )
    .await?;
    assert!(res.is_err());
    assert!(!client.is_connection_valid());
    assert_eq!(suites.len(), 1);

    silent.abort();
    Ok(())
}

#[tokio::test]
async fn rejected_test_start_does_not_stop_siblings() -> eyre::Result<()> {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/listener/v3/demo/test/start")
        .match_body(partial(r#"{"testName":"broken"}"#))
        .with_status(422)
        .with_body("bad test")
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/listener/v3/demo/test/start")
        .match_body(partial(r#"{"testName":"fine"}"#))
        .with_body(r#""test-ok""#)
        .expect(1)
        .create_async()
        .await;
    let finish = server
        .mock("PUT", "/listener/v3/demo/test-run/finish/run-1")
        .expect(1)
        .create_async()
        .await;

    let client = OrangebeardClient::new(config(&server))?;
    let run = client.resume_test_run(ResolvedId::new("run-1"));
    let suite = client.resume_test_run(ResolvedId::new("suite-1"));
    let broken = client.start_test(StartTest::new(run, suite, "broken", TestType::Test));
    let fine = client.start_test(StartTest::new(run, suite, "fine", TestType::Test));

    assert_eq!(client.wait_for(fine).await?, Some(ResolvedId::new("test-ok")));
    assert!(matches!(
        client.wait_for(broken).await,
        Err(Error::ServerRejection { status: 422, .. })
    ));

    let res = client.finish_test_run(run, FinishTestRun::now()).await;
    assert!(matches!(res, Err(Error::ServerRejection { status: 422, .. })));
    assert!(client.is_connection_valid());

    rejected.assert_async().await;
    accepted.assert_async().await;
    finish.assert_async().await;
    Ok(())
}
