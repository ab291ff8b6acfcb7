// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Boat upload server
//!
//! A TLS-secured file drop service. Clients authenticate with a
//! username/password pair and upload files into per-user repositories
//! using a small line-oriented protocol (three-digit reply codes,
//! uppercase verbs, length-prefixed binary blocks).
//!
//! # Architecture
//!
//! ```text
//! BoatServer
//! +-- TLS acceptor            (rustls, server-authenticated)
//! +-- ServerContext           (user registry + repository layout)
//! +-- ConnectionSupervisor    (one task per connection)
//!     +-- StreamFramer        (text lines / raw block bytes)
//!     +-- Session             (protocol state machine)
//!     +-- StagedUpload        (temp file, unlinked on drop)
//! ```
//!
//! Uploads are staged under `<root>/tmp/` and promoted into the user's
//! repository with an atomic rename on SAVE; a `current.<filename>`
//! symlink always points at the newest version.
//!
//! # Example
//!
//! ```ignore
//! use boatd::{BoatServer, ServerConfig};
//!
//! let config = ServerConfig::from_file(&path)?;
//! let server = BoatServer::new(config)?;
//! server.run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod repository;
pub mod server;
pub mod tls;

pub use config::{ConfigError, ServerConfig, UserConfig};
pub use server::{BoatServer, ServerContext, ServerError};
