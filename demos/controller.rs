//! # Example: one controller, two echo services
//!
//! Build the reference service first, then run:
//! ```text
//! cargo build --bin apiary-echo
//! cargo run --example controller -- target/debug/apiary-echo
//! ```

use std::time::Duration;

use apiary::{Controller, ControllerConfig, Event, ServiceOptions, bridge};
use serde_json::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let echo = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "target/debug/apiary-echo".into());

    let ctrl = Controller::new(ControllerConfig::named("demo"));
    ctrl.service_add("echo", &echo)?;

    for kind in ["start", "running", "stopped"] {
        ctrl.bus().on(&format!("*::{kind}"), |ev| {
            println!("[bus] {} {:?}", ev.name, ev.payload);
        });
    }
    ctrl.bus().on("*::app::**", |ev| {
        println!("[child] {} {:?}", ev.name, ev.payload);
    });

    let alice = ctrl
        .start_service(ServiceOptions::new("echo").name("alice").options(json!({"tenant": "a"})))
        .await?;
    let generated = ctrl.start_service(ServiceOptions::new("echo")).await?;
    println!("started {} and {}", alice.name(), generated.name());

    let reply = alice
        .request(&Event::new("app::deploy", vec![json!({"app": "blog"})]))
        .await?;
    println!("alice answered {:?}", bridge::split_reply(reply));

    let remote = generated.remote().ok_or_else(|| anyhow::anyhow!("not connected"))?;
    println!("ping -> {:?}", remote.call("ping", vec![json!(1)]).await?);

    // give the child's upward app::echoed event time to arrive
    tokio::time::sleep(Duration::from_millis(100)).await;

    for outcome in ctrl.stop().await {
        match outcome.error {
            None => println!("stopped {}", outcome.name),
            Some(e) => println!("stop of {} failed: {e}", outcome.name),
        }
    }
    Ok(())
}
