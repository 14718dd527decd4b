use std::sync::Arc;
use std::time::{Duration, Instant};

use apiary::{
    Config, Controller, ControllerConfig, ControllerError, Event, Orchestrator, RestartPolicy,
    ServiceOptions, bridge,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

const ECHO: &str = env!("CARGO_BIN_EXE_apiary-echo");

fn controller(dir: &TempDir) -> Arc<Controller> {
    let mut cfg = ControllerConfig::named("serviceEnv");
    cfg.ipc_dir = dir.path().to_path_buf();
    cfg.kill_timeout = Duration::from_secs(2);
    let ctrl = Controller::new(cfg);
    ctrl.service_add("echo", ECHO).unwrap();
    ctrl
}

/// Names of events matching `pattern` on the controller bus.
fn watch(ctrl: &Controller, pattern: &str) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctrl.bus().on(pattern, move |ev| {
        let _ = tx.send(ev.name.to_string());
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("event in time")
        .expect("bus alive")
}

/// Next event whose last segment is one of `kinds`.
async fn next_of(rx: &mut mpsc::UnboundedReceiver<String>, kinds: &[&str]) -> String {
    loop {
        let name = next(rx).await;
        if kinds.iter().any(|k| name.rsplit("::").next() == Some(*k)) {
            return name;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generated_name_and_clean_stop() {
    let dir = tempfile::tempdir().unwrap();
    let ctrl = controller(&dir);
    let mut running = watch(&ctrl, "*::running");

    let handle = ctrl
        .start_service(ServiceOptions::new("echo").options(json!({"port": 8080})))
        .await
        .unwrap();
    assert_eq!(handle.name(), "echoService1");
    assert!(handle.pid().is_some());
    assert_eq!(next(&mut running).await, "echoService1::running");

    let remote = handle.remote().unwrap();
    assert_eq!(remote.functions(), ["emit", "options", "ping"]);
    assert_eq!(remote.call("options", vec![]).await.unwrap(), [json!({"port": 8080})]);

    let outcomes = ctrl.stop().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].name, "echoService1");
    assert!(outcomes[0].is_ok(), "{:?}", outcomes[0].error);
    assert!(ctrl.services().is_empty());
    assert!(!handle.monitor().is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn controller_stop_runs_services_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let ctrl = controller(&dir);
    for name in ["alice", "bob"] {
        ctrl.start_service(ServiceOptions::new("echo").name(name).arg("--stop-delay-ms=1000"))
            .await
            .unwrap();
    }

    let begun = Instant::now();
    let outcomes = ctrl.stop().await;
    let elapsed = begun.elapsed();

    let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["alice", "bob"]);
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1800), "{elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_timeout_still_removes_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let ctrl = controller(&dir);
    let mut stopped = watch(&ctrl, "alice::stopped");
    let handle = ctrl
        .start_service(ServiceOptions::new("echo").name("alice").arg("--hang-on-stop"))
        .await
        .unwrap();

    let begun = Instant::now();
    let err = ctrl
        .stop_service("alice", Some(Duration::from_millis(300)))
        .await
        .unwrap_err();
    let elapsed = begun.elapsed();

    assert!(matches!(err, ControllerError::Timeout { ref name, .. } if name == "alice"));
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert!(matches!(ctrl.get_service("alice"), Err(ControllerError::UnknownName(_))));
    assert_eq!(next(&mut stopped).await, "alice::stopped");

    // the hung child is still signalled
    tokio::time::timeout(Duration::from_secs(5), handle.monitor().wait_terminal())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_start_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let ctrl = controller(&dir);

    let err = ctrl
        .start_service(ServiceOptions::new("echo").name("carol").arg("--fail-start"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "service `carol` failed to start: refusing to start (--fail-start)"
    );
    assert!(ctrl.services().is_empty());

    // the name is free again
    let handle = ctrl.start_service(ServiceOptions::new("echo").name("carol")).await.unwrap();
    assert_eq!(handle.name(), "carol");
    assert!(ctrl.stop().await.iter().all(|o| o.is_ok()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashed_service_is_restarted_and_handshaken_again() {
    let dir = tempfile::tempdir().unwrap();
    let ctrl = controller(&dir);
    let mut seen = watch(&ctrl, "dave::*");

    let policy = RestartPolicy {
        min_uptime: Duration::from_millis(100),
        ..RestartPolicy::default()
    };
    let handle = ctrl
        .start_service(ServiceOptions::new("echo").name("dave").restart(policy))
        .await
        .unwrap();
    assert_eq!(next_of(&mut seen, &["restart", "running"]).await, "dave::running");
    let first = handle.pid().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(first as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();

    assert_eq!(next_of(&mut seen, &["restart", "running"]).await, "dave::restart");
    assert_eq!(next_of(&mut seen, &["restart", "running"]).await, "dave::running");
    assert_ne!(handle.pid(), Some(first));
    assert_eq!(handle.monitor().restart_count(), 1);

    assert!(ctrl.stop().await.iter().all(|o| o.is_ok()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn root_bus_reaches_services_and_mirrors_their_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    for sub in &mut config.subsystems {
        sub.ipc_dir = dir.path().to_path_buf();
    }
    config.subsystems[0].services.insert("echo".into(), ECHO.into());
    let orch = Orchestrator::new(config).unwrap();
    orch.start().await.unwrap();

    let (tx, mut echoed) = mpsc::unbounded_channel();
    orch.bus().on("log::serviceEnv::alice::app::echoed", move |ev| {
        let _ = tx.send(ev.payload.clone());
    });

    let started = orch
        .router()
        .request(Event::new(
            "serviceEnv::service::start",
            vec![json!({"type": "echo", "name": "alice", "service_options": {"tenant": "t1"}})],
        ))
        .await
        .unwrap();
    assert_eq!(bridge::split_reply(started), Ok(vec![json!("alice")]));

    let reply = orch
        .router()
        .request(Event::new("serviceEnv::alice::app::deploy", vec![json!({"app": "blog"})]))
        .await
        .unwrap();
    assert_eq!(
        bridge::split_reply(reply),
        Ok(vec![json!("app::deploy"), json!({"app": "blog"})])
    );

    let payload = tokio::time::timeout(Duration::from_secs(10), echoed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, [json!("app::deploy")]);

    let listed = orch
        .router()
        .request(Event::new("serviceEnv::service::list", vec![]))
        .await
        .unwrap();
    let listed = bridge::split_reply(listed).unwrap();
    assert_eq!(listed[0][0]["name"], "alice");
    assert_eq!(listed[0][0]["state"], "running");

    orch.shutdown().await.unwrap();
    assert!(orch.controller("serviceEnv").unwrap().services().is_empty());
}
