// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol state machine.
//!
//! One verb per line; verbs are case-insensitive and everything after the
//! first space is the argument string, passed through untouched. Replies are
//! a three-digit code, a space, and a short message.
//!
//! State/command matrix (anything else replies 500):
//!
//! ```text
//!                  USER  PASS  PUT  BLOCK  SAVE  QUIT
//! INIT              x                             x
//! AWAIT_PASSWORD          x                       x
//! AUTHENTICATED                  x                x
//! PUT_OPEN                            x      x    x
//! RECEIVING_BLOCK   (raw bytes; no commands until the block completes)
//! ```

use crate::auth;
use crate::repository::{self, StagedUpload, MAX_FILENAME_LENGTH};
use crate::server::framing::MAX_BLOCK_SIZE;
use crate::server::registry::User;
use crate::server::ServerContext;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use zeroize::Zeroize;

pub const GREETING: &str = "220 boat server\n";
pub const REPLY_BYE: &str = "221 bye\n";
const REPLY_PASSWORD_PLEASE: &str = "251 hi, password please\n";
const REPLY_AUTHENTICATED: &str = "252 authenticated\n";
const REPLY_PUT_OK: &str = "255 ok\n";
const REPLY_COMMENCE_UPLOAD: &str = "256 commence data upload\n";
pub const REPLY_BLOCK_RECEIVED: &str = "257 block received\n";
const REPLY_SAVED: &str = "259 file saved\n";
const REPLY_UNKNOWN: &str = "500 unknown command or inappropriate command for current state\n";
pub const REPLY_LINE_TOO_LONG: &str = "500 line too long\n";
const REPLY_NO_USERNAME: &str = "510 must specify a username\n";
const REPLY_NO_PASSWORD: &str = "510 must specify a password\n";
const REPLY_NO_FILENAME: &str = "510 must specify a filename\n";
const REPLY_FILENAME_TOO_LONG: &str = "510 filename is too long\n";
const REPLY_BAD_FILENAME: &str = "510 invalid characters in filename\n";
const REPLY_NO_BLOCK_SIZE: &str = "510 must specify a block size\n";
const REPLY_BAD_BLOCK_SIZE: &str = "510 invalid block size\n";
const REPLY_SAVE_NO_ARGUMENT: &str = "510 save does not take an argument\n";
const REPLY_FILE_EXISTS: &str = "520 file already exists\n";
const REPLY_BAD_PASSWORD: &str = "552 invalid password\n";
pub const REPLY_SYSTEM_ERROR: &str = "599 system error occurred, disconnecting\n";

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Init,
    AwaitPassword,
    Authenticated,
    PutOpen,
    ReceivingBlock,
}

/// What the supervisor does after writing the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep reading command lines.
    Continue,

    /// Switch the framer to block mode for the announced byte count.
    BeginBlock,

    /// Orderly close requested by the peer.
    Quit,

    /// Unrecoverable system error; close after the 599 reply.
    Disconnect,
}

/// Result of dispatching one command line.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub reply: &'static str,
    pub control: Control,
}

impl Step {
    fn reply(reply: &'static str) -> Self {
        Self {
            reply,
            control: Control::Continue,
        }
    }

    fn disconnect() -> Self {
        Self {
            reply: REPLY_SYSTEM_ERROR,
            control: Control::Disconnect,
        }
    }
}

/// Per-connection protocol state.
///
/// Invariants: `user` is set exactly in the authenticated phases, `staging`
/// exactly in `PutOpen`/`ReceivingBlock`, and the staging record's block
/// counter is nonzero exactly in `ReceivingBlock`.
#[derive(Debug, Default)]
pub struct Session {
    phase: Phase,
    pending_username: Option<String>,
    user: Option<Arc<User>>,
    staging: Option<StagedUpload>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn staging_mut(&mut self) -> Option<&mut StagedUpload> {
        self.staging.as_mut()
    }

    /// Called by the supervisor once a block has been fully received.
    pub fn block_complete(&mut self) {
        self.phase = Phase::PutOpen;
    }

    /// Dispatch one command line.
    ///
    /// The line buffer is zeroed after a PASS command so the plaintext
    /// password does not linger in memory.
    pub async fn handle_line(&mut self, ctx: &ServerContext, line: &mut String) -> Step {
        let (verb, args) = split_command(line.as_str());
        debug!(verb = %verb, phase = ?self.phase, "command");

        let step = match (verb.as_str(), self.phase) {
            ("QUIT", _) => Step {
                reply: REPLY_BYE,
                control: Control::Quit,
            },
            ("USER", Phase::Init) => self.cmd_user(args),
            ("PASS", Phase::AwaitPassword) => self.cmd_pass(ctx, args),
            ("PUT", Phase::Authenticated) => self.cmd_put(ctx, args).await,
            ("BLOCK", Phase::PutOpen) => self.cmd_block(args),
            ("SAVE", Phase::PutOpen) => self.cmd_save(ctx, args).await,
            _ => Step::reply(REPLY_UNKNOWN),
        };

        if verb == "PASS" {
            line.zeroize();
        }
        step
    }

    fn cmd_user(&mut self, args: &str) -> Step {
        if args.is_empty() {
            return Step::reply(REPLY_NO_USERNAME);
        }

        self.user = None;
        self.pending_username = Some(args.to_string());
        self.phase = Phase::AwaitPassword;
        Step::reply(REPLY_PASSWORD_PLEASE)
    }

    fn cmd_pass(&mut self, ctx: &ServerContext, args: &str) -> Step {
        if args.is_empty() {
            return Step::reply(REPLY_NO_PASSWORD);
        }

        let user = self
            .pending_username
            .as_deref()
            .and_then(|name| ctx.registry.lookup(name));

        // unknown usernames still burn a verification to equalise timing
        let accepted = match &user {
            Some(user) => auth::verify_password(&user.password_record, args.as_bytes()),
            None => {
                auth::dummy_verify(args.as_bytes());
                false
            }
        };

        if accepted {
            self.user = user;
            self.phase = Phase::Authenticated;
            Step::reply(REPLY_AUTHENTICATED)
        } else {
            self.pending_username = None;
            self.user = None;
            self.phase = Phase::Init;
            Step::reply(REPLY_BAD_PASSWORD)
        }
    }

    async fn cmd_put(&mut self, ctx: &ServerContext, args: &str) -> Step {
        if args.is_empty() {
            return Step::reply(REPLY_NO_FILENAME);
        }
        if args.len() > MAX_FILENAME_LENGTH {
            return Step::reply(REPLY_FILENAME_TOO_LONG);
        }
        if !repository::valid_filename(args) {
            return Step::reply(REPLY_BAD_FILENAME);
        }

        let Some(user) = self.user.clone() else {
            return Step::reply(REPLY_UNKNOWN);
        };

        if !user.versioning_enabled && ctx.layout.current_exists(&user, args).await {
            return Step::reply(REPLY_FILE_EXISTS);
        }

        match ctx.layout.create_staging(args).await {
            Ok(staging) => {
                self.staging = Some(staging);
                self.phase = Phase::PutOpen;
                Step::reply(REPLY_PUT_OK)
            }
            Err(e) => {
                warn!("failed to open staging file: {}", e);
                Step::disconnect()
            }
        }
    }

    fn cmd_block(&mut self, args: &str) -> Step {
        if args.is_empty() {
            return Step::reply(REPLY_NO_BLOCK_SIZE);
        }
        if !args.bytes().all(|b| b.is_ascii_digit()) {
            return Step::reply(REPLY_BAD_BLOCK_SIZE);
        }
        let len = match args.parse::<u64>() {
            Ok(n) if (1..=MAX_BLOCK_SIZE).contains(&n) => n,
            _ => return Step::reply(REPLY_BAD_BLOCK_SIZE),
        };

        let Some(staging) = self.staging.as_mut() else {
            return Step::reply(REPLY_UNKNOWN);
        };
        staging.begin_block(len);
        self.phase = Phase::ReceivingBlock;
        Step {
            reply: REPLY_COMMENCE_UPLOAD,
            control: Control::BeginBlock,
        }
    }

    async fn cmd_save(&mut self, ctx: &ServerContext, args: &str) -> Step {
        if !args.is_empty() {
            return Step::reply(REPLY_SAVE_NO_ARGUMENT);
        }

        let Some(staging) = self.staging.take() else {
            return Step::reply(REPLY_UNKNOWN);
        };
        let Some(user) = self.user.clone() else {
            return Step::reply(REPLY_UNKNOWN);
        };

        // the temp guard is consumed by publish on success; on any error
        // path it is dropped here and the staging file unlinked
        let (temp, mut sink, filename) = staging.finish();
        if let Err(e) = sink.flush().await {
            warn!("failed to flush staging file: {}", e);
            return Step::disconnect();
        }
        drop(sink);

        let versioned = match ctx.layout.publish(temp, &user, &filename).await {
            Ok(path) => path,
            Err(e) => {
                warn!("failed to publish '{}': {}", filename, e);
                return Step::disconnect();
            }
        };

        if let Err(e) = ctx
            .layout
            .update_current_alias(&user, &filename, &versioned)
            .await
        {
            warn!("failed to update current alias for '{}': {}", filename, e);
            return Step::disconnect();
        }

        debug!("published {}", versioned.display());
        self.phase = Phase::Authenticated;
        Step::reply(REPLY_SAVED)
    }
}

/// Split a line into its uppercased verb and the untouched argument string.
fn split_command(line: &str) -> (String, &str) {
    match line.split_once(' ') {
        Some((verb, args)) => (verb.to_ascii_uppercase(), args),
        None => (line.to_ascii_uppercase(), ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::make_password_record;
    use crate::repository::RepositoryLayout;
    use crate::server::registry::UserRegistry;
    use tempfile::TempDir;

    const SALT: &str = "0123456789abcdef";

    fn test_context() -> (TempDir, ServerContext) {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = UserRegistry::new();
        registry.insert(User {
            username: "alice".into(),
            password_record: make_password_record(SALT, "hunter2").unwrap(),
            repository: "alice-files".into(),
            versioning_enabled: true,
        });
        let layout = RepositoryLayout::new(dir.path());
        let ctx = ServerContext { registry, layout };
        (dir, ctx)
    }

    async fn dispatch(session: &mut Session, ctx: &ServerContext, line: &str) -> Step {
        let mut line = line.to_string();
        session.handle_line(ctx, &mut line).await
    }

    async fn authenticate(session: &mut Session, ctx: &ServerContext) {
        let step = dispatch(session, ctx, "USER alice").await;
        assert_eq!(step.reply, REPLY_PASSWORD_PLEASE);
        let step = dispatch(session, ctx, "PASS hunter2").await;
        assert_eq!(step.reply, REPLY_AUTHENTICATED);
    }

    async fn bootstrap(ctx: &ServerContext) {
        ctx.layout.bootstrap(&ctx.registry).await.unwrap();
    }

    #[tokio::test]
    async fn test_verbs_are_case_insensitive() {
        let (_dir, ctx) = test_context();
        let mut session = Session::new();

        let step = dispatch(&mut session, &ctx, "user alice").await;
        assert_eq!(step.reply, REPLY_PASSWORD_PLEASE);
        assert_eq!(session.phase(), Phase::AwaitPassword);

        let step = dispatch(&mut session, &ctx, "quit").await;
        assert_eq!(step.control, Control::Quit);
    }

    #[tokio::test]
    async fn test_arguments_keep_their_case() {
        let (_dir, ctx) = test_context();
        let mut session = Session::new();

        dispatch(&mut session, &ctx, "USER Alice").await;
        assert_eq!(session.pending_username.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_user_requires_a_name() {
        let (_dir, ctx) = test_context();
        let mut session = Session::new();

        let step = dispatch(&mut session, &ctx, "USER").await;
        assert_eq!(step.reply, REPLY_NO_USERNAME);
        assert_eq!(session.phase(), Phase::Init);
    }

    #[tokio::test]
    async fn test_wrong_state_command_replies_500() {
        let (_dir, ctx) = test_context();
        let mut session = Session::new();

        let step = dispatch(&mut session, &ctx, "PUT x").await;
        assert_eq!(step.reply, REPLY_UNKNOWN);
        assert_eq!(step.control, Control::Continue);
        assert_eq!(session.phase(), Phase::Init);
    }

    #[tokio::test]
    async fn test_pass_zeroizes_the_line() {
        let (_dir, ctx) = test_context();
        let mut session = Session::new();

        dispatch(&mut session, &ctx, "USER alice").await;

        let mut line = String::from("PASS hunter2");
        session.handle_line(&ctx, &mut line).await;
        assert!(line.is_empty());
    }

    #[tokio::test]
    async fn test_bad_password_returns_to_init() {
        let (_dir, ctx) = test_context();
        let mut session = Session::new();

        dispatch(&mut session, &ctx, "USER alice").await;
        let step = dispatch(&mut session, &ctx, "PASS wrong").await;
        assert_eq!(step.reply, REPLY_BAD_PASSWORD);
        assert_eq!(session.phase(), Phase::Init);
        assert!(session.pending_username.is_none());
        assert!(session.user.is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let (_dir, ctx) = test_context();
        let mut session = Session::new();

        dispatch(&mut session, &ctx, "USER mallory").await;
        let step = dispatch(&mut session, &ctx, "PASS hunter2").await;
        assert_eq!(step.reply, REPLY_BAD_PASSWORD);
    }

    #[tokio::test]
    async fn test_put_validates_filename() {
        let (_dir, ctx) = test_context();
        bootstrap(&ctx).await;
        let mut session = Session::new();
        authenticate(&mut session, &ctx).await;

        let step = dispatch(&mut session, &ctx, "PUT").await;
        assert_eq!(step.reply, REPLY_NO_FILENAME);

        let step = dispatch(&mut session, &ctx, "PUT ../escape").await;
        assert_eq!(step.reply, REPLY_BAD_FILENAME);

        let long = format!("PUT {}", "a".repeat(MAX_FILENAME_LENGTH + 1));
        let step = dispatch(&mut session, &ctx, &long).await;
        assert_eq!(step.reply, REPLY_FILENAME_TOO_LONG);

        assert_eq!(session.phase(), Phase::Authenticated);
        assert!(session.staging.is_none());
    }

    #[tokio::test]
    async fn test_block_validates_size() {
        let (_dir, ctx) = test_context();
        bootstrap(&ctx).await;
        let mut session = Session::new();
        authenticate(&mut session, &ctx).await;
        dispatch(&mut session, &ctx, "PUT notes.txt").await;

        for line in [
            "BLOCK",
            "BLOCK 0",
            "BLOCK abc",
            "BLOCK 12x",
            "BLOCK -1",
            "BLOCK 99999999999",
            "BLOCK 999999999999999999999999",
        ] {
            let step = dispatch(&mut session, &ctx, line).await;
            assert!(step.reply.starts_with("510"), "{} accepted", line);
            assert_eq!(session.phase(), Phase::PutOpen);
        }

        let step = dispatch(&mut session, &ctx, "BLOCK 5").await;
        assert_eq!(step.reply, REPLY_COMMENCE_UPLOAD);
        assert_eq!(step.control, Control::BeginBlock);
        assert_eq!(session.phase(), Phase::ReceivingBlock);
        assert_eq!(session.staging.as_ref().unwrap().bytes_remaining(), 5);
    }

    #[tokio::test]
    async fn test_save_takes_no_argument() {
        let (_dir, ctx) = test_context();
        bootstrap(&ctx).await;
        let mut session = Session::new();
        authenticate(&mut session, &ctx).await;
        dispatch(&mut session, &ctx, "PUT notes.txt").await;

        let step = dispatch(&mut session, &ctx, "SAVE now").await;
        assert_eq!(step.reply, REPLY_SAVE_NO_ARGUMENT);
        assert_eq!(session.phase(), Phase::PutOpen);
    }

    #[tokio::test]
    async fn test_save_publishes_and_clears_staging() {
        let (dir, ctx) = test_context();
        bootstrap(&ctx).await;
        let mut session = Session::new();
        authenticate(&mut session, &ctx).await;
        dispatch(&mut session, &ctx, "PUT notes.txt").await;

        let step = dispatch(&mut session, &ctx, "SAVE").await;
        assert_eq!(step.reply, REPLY_SAVED);
        assert_eq!(session.phase(), Phase::Authenticated);
        assert!(session.staging.is_none());

        let alias = dir.path().join("alice-files").join("current.notes.txt");
        assert!(tokio::fs::symlink_metadata(&alias).await.is_ok());
    }

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("QUIT"), ("QUIT".into(), ""));
        assert_eq!(split_command("user alice"), ("USER".into(), "alice"));
        assert_eq!(split_command("PASS  secret"), ("PASS".into(), " secret"));
        assert_eq!(split_command("PUT a b"), ("PUT".into(), "a b"));
    }
}
