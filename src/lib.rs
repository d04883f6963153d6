//! Reconnecting RTSP client transport pipeline
//!
//! Delivers an RTSP session to its consumers over raw TCP or RTSP tunnelled
//! through HTTP(S), and keeps it alive by rebuilding the transport in place
//! when the network fails.
//!
//! # Layout
//!
//! - [`component`]: the duplex [`Component`] trait and the arena-backed
//!   [`Pipeline`] chaining components together
//! - [`transport`]: [`TcpTransport`] and [`HttpTunnelTransport`], plus the
//!   [`Signal`]s they report health with
//! - [`multiplexer`]: fan-out of one ingress flow to many sinks
//! - [`supervisor`]: [`RtspPipeline`], the reconnection state machine
//!
//! # Example
//!
//! ```no_run
//! use rtsp_transport::component::{Component, Passthrough};
//! use rtsp_transport::multiplexer::Multiplexer;
//! use rtsp_transport::supervisor::{PipelineConfig, RtspPipeline};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> rtsp_transport::error::Result<()> {
//! let config = PipelineConfig::new("https://camera.example/axis-media/media.amp");
//!
//! // The RTSP session stage is built from the normalised rtsp:// URI
//! let mut rtsp = RtspPipeline::new(config, |uri: &str| {
//!     tracing::info!(uri, "Building session");
//!     Box::new(Passthrough::new("session")) as Box<dyn Component>
//! })?;
//!
//! let mux = Multiplexer::new();
//! let (tx, mut rx) = mpsc::unbounded_channel::<rtsp_transport::Message>();
//! mux.sinks().add(tx);
//! rtsp.append(Box::new(mux));
//!
//! rtsp.play();
//! tokio::spawn(async move {
//!     while let Some(msg) = rx.recv().await {
//!         println!("{} bytes", msg.len());
//!     }
//! });
//! rtsp.run().await;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod error;
pub mod message;
pub mod multiplexer;
pub mod stats;
pub mod supervisor;
pub mod transport;

pub use component::{Component, ComponentId, Context, Control, Pipeline};
pub use error::{Error, Result};
pub use message::{Message, MessageKind};
pub use multiplexer::{MessageSink, Multiplexer, SinkSet};
pub use stats::SupervisorStats;
pub use supervisor::{ConnectionState, PipelineConfig, PipelineHandle, RtspPipeline};
pub use transport::{
    HttpTunnelTransport, Signal, TcpTransport, TransportConfig, TransportFactory, TransportKind,
};
