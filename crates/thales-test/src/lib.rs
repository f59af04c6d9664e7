//! # Thales Test
//!
//! Test utilities for the Thales framework: an in-memory transport and a
//! client that drives all four call shapes end to end, through the real
//! registry, adapters, and error pipeline, without binding a socket.
//!
//! ## Example
//!
//! ```ignore
//! use thales_test::MemoryTransport;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_say_hello() {
//!     let transport = MemoryTransport::new();
//!     let server = app.start(&transport, "memory:0", &Credentials::Insecure).await.unwrap();
//!
//!     let client = transport.client(server.local_addr());
//!     let outcome = client
//!         .unary("helloworld.Greeter", "SayHello", json!({ "message": "hello world" }))
//!         .await
//!         .unwrap();
//!
//!     outcome.assert_ok();
//!     assert_eq!(outcome.message().unwrap()["message"], "HELLO WORLD");
//!
//!     server.close().await.unwrap();
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/thales-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod transport;

pub use client::{CallBuilder, CallOutcome, StreamingCall, TestClient};
pub use error::TestError;
pub use transport::{CallEvent, MemoryListener, MemoryTransport};
