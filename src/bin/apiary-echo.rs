//! `apiary-echo`: reference service.
//!
//! Answers the start handshake with its pid and options, echoes every
//! `app::**` request back, and reports each one upwards as `app::echoed`.
//! Flags make it misbehave on purpose.

use std::future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use apiary::{
    BoxError, Event, LocalApi, LoggingConfig, Service, ServiceRuntime, Values, bridge, logging,
};
use async_trait::async_trait;
use clap::Parser;
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "apiary-echo")]
#[command(version, about, long_about = None)]
struct Args {
    /// Never answer the stop handshake
    #[arg(long)]
    hang_on_stop: bool,

    /// Answer the start handshake with an error
    #[arg(long)]
    fail_start: bool,

    /// Delay before answering the stop handshake, in milliseconds
    #[arg(long, default_value_t = 0)]
    stop_delay_ms: u64,
}

struct Echo {
    args: Args,
    options: Arc<Mutex<Value>>,
}

#[async_trait]
impl Service for Echo {
    async fn start(&self, options: Value) -> Result<Values, BoxError> {
        if self.args.fail_start {
            return Err("refusing to start (--fail-start)".into());
        }
        *self.options.lock().unwrap_or_else(PoisonError::into_inner) = options.clone();
        Ok(vec![json!({"pid": std::process::id(), "options": options})])
    }

    async fn stop(&self) -> Result<(), BoxError> {
        if self.args.hang_on_stop {
            warn!("ignoring stop request");
            future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(self.args.stop_delay_ms)).await;
        Ok(())
    }

    fn api(&self) -> LocalApi {
        let options = Arc::clone(&self.options);
        LocalApi::new()
            .function("ping", |args, reply| {
                reply.send(std::iter::once(json!("pong")).chain(args).collect())
            })
            .function("options", move |_, reply| {
                let current = options.lock().unwrap_or_else(PoisonError::into_inner).clone();
                reply.send(vec![current])
            })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    logging::init(&LoggingConfig::default())?;

    let echo = Arc::new(Echo {
        args,
        options: Arc::new(Mutex::new(Value::Null)),
    });
    let runtime = ServiceRuntime::connect(echo).await?;

    let upward = runtime.clone();
    runtime.bus().on("app::**", move |ev| {
        let name = ev.name.to_string();
        let reply = std::iter::once(json!(name.clone()))
            .chain(ev.payload.iter().cloned())
            .collect();
        ev.respond(bridge::ok_reply(reply));

        let upward = upward.clone();
        tokio::spawn(async move {
            let echoed = Event::new("app::echoed", vec![json!(name)]);
            if let Err(e) = upward.emit(&echoed).await {
                warn!(error = %e, "could not report echo");
            }
        });
    });

    info!(pid = std::process::id(), "echo service connected");
    runtime.run().await;
    info!("echo service exiting");
    Ok(())
}
