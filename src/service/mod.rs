//! Child side of the master/service protocol.
//!
//! A service binary implements [`Service`] and hands it to [`ServiceRuntime`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use apiary::{BoxError, Service, ServiceRuntime, Values};
//!
//! struct Worker;
//!
//! #[async_trait]
//! impl Service for Worker {
//!     async fn start(&self, _options: serde_json::Value) -> Result<Values, BoxError> {
//!         Ok(Vec::new())
//!     }
//!     async fn stop(&self) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = ServiceRuntime::connect(Arc::new(Worker)).await?;
//!     runtime.run().await;
//!     Ok(())
//! }
//! ```

mod runtime;

pub use runtime::{BoxError, Service, ServiceRuntime};
