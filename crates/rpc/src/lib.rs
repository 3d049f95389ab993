//! Transport between the chunkvault uploader and store.
//!
//! [`ArtifactService`] is the seam both ends program against: the store
//! implements it for real, [`client::RpcClient`] implements it by forwarding
//! calls over TCP to a [`server::RpcServer`].
//!
//! # Wire format
//!
//! See [`wire`] module for the frame layout.

pub mod client;
pub mod error;
pub mod server;
pub mod service;
pub mod wire;

pub use client::RpcClient;
pub use error::RpcError;
pub use server::RpcServer;
pub use service::{ArtifactService, ServiceFuture, UploadStream};

use std::time::Duration;

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connections kept by a client for reuse.
pub const MAX_IDLE_CONNECTIONS: usize = 8;
