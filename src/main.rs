// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths)]
#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused,
    unused_lifetimes,
    unused_qualifications,
    unused_results,
    anonymous_parameters,
    deprecated_in_future,
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    missing_doc_code_examples,
    private_doc_tests,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::unseparated_literal_suffix,
    clippy::decimal_literal_representation,
    clippy::single_char_lifetime_names,
    clippy::fallible_impl_from,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::wildcard_enum_match_arm,
    clippy::deref_by_slicing,
    clippy::default_numeric_fallback,
    clippy::shadow_reuse,
    clippy::clone_on_ref_ptr,
    clippy::todo,
    clippy::string_add,
    clippy::use_debug,
    clippy::future_not_send
)]
#![cfg_attr(not(test), warn(clippy::panic_in_result_fn))]

mod cache;
mod callback;
mod command;
mod error;
mod gateway;
mod guard;
mod metadata;
mod model;
mod navigate;
mod poll;
mod repository;
mod session;
mod storage;
mod token;

use std::{process, sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use error::Result;
use log::{debug, error, warn};
use url::Url;

use crate::{
    cache::QueryCache,
    command::Context,
    gateway::Gateway,
    navigate::LogNavigator,
    session::{Delivery, Resolver},
    token::{Credential, TokenStore},
};

#[derive(Debug, Subcommand)]
enum Command {
    Login(command::session::Login),
    Whoami(command::session::Whoami),
    Org(command::session::Org),
    Logout(command::session::Logout),
    #[command(subcommand)]
    Repos(command::repos::Command),
    #[command(subcommand)]
    Github(command::provider::Github),
    #[command(subcommand)]
    Gitlab(command::provider::Gitlab),
    #[command(subcommand)]
    Bitbucket(command::provider::Bitbucket),
}

#[async_trait]
impl command::Command for Command {
    async fn execute(self, ctx: &Context) -> Result<()> {
        match self {
            Self::Login(cmd) => cmd.execute(ctx).await,
            Self::Whoami(cmd) => cmd.execute(ctx).await,
            Self::Org(cmd) => cmd.execute(ctx).await,
            Self::Logout(cmd) => cmd.execute(ctx).await,
            Self::Repos(cmd) => cmd.execute(ctx).await,
            Self::Github(cmd) => cmd.execute(ctx).await,
            Self::Gitlab(cmd) => cmd.execute(ctx).await,
            Self::Bitbucket(cmd) => cmd.execute(ctx).await,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Base URL of the review service API.
    #[arg(long, env = "REVIEWDASH_API_URL", default_value = gateway::DEFAULT_API_URL, value_parser = Url::parse)]
    api_url: Url,

    /// Keep the session credential in memory only, for this invocation.
    #[arg(long)]
    no_persist_session: bool,

    /// How the backend identifies the session: a stored bearer credential,
    /// or the backend's own session cookie.
    #[arg(long, value_enum, default_value_t = Delivery::Token)]
    delivery: Delivery,

    /// Seconds between background refreshes of connected repositories. Zero
    /// turns polling off.
    #[arg(long, env = "REVIEWDASH_POLL_INTERVAL_SECS", default_value_t = 30)]
    poll_interval_secs: u64,

    #[clap(subcommand)]
    command: Command,
}

async fn get_session_storage(args: &Args) -> Box<dyn storage::Storage<Credential>> {
    if args.no_persist_session {
        return Box::new(storage::Memory::<Credential>::new());
    }

    #[cfg(feature = "secret-service")]
    match storage::SecretService::new(&args.api_url).await {
        Ok(secret_service_storage) => return Box::new(secret_service_storage),
        Err(e) => {
            warn!("We need to fall back to unencrypted file storage because we can't connect to the secret service: {}", e);
        }
    }

    #[cfg(feature = "keychain")]
    match storage::Keychain::new(&args.api_url) {
        Ok(keychain_storage) => return Box::new(keychain_storage),
        Err(e) => {
            warn!("We need to fall back to unencrypted file storage because we can't connect to Keychain: {}", e);
        }
    }

    if let Some(file_storage) = storage::File::new("session.json") {
        return Box::new(file_storage);
    }

    warn!("No place to keep the session credential; you will need to log in every time");
    Box::new(storage::Detached::<Credential>::new())
}

async fn run(args: Args) -> Result<()> {
    let tokens = TokenStore::new(get_session_storage(&args).await);
    if !tokens.is_persistent().await {
        debug!("Session credential will not outlive this invocation");
    }

    let gateway = Gateway::new(args.api_url.clone(), tokens)?;
    let resolver = Arc::new(Resolver::new(
        gateway,
        QueryCache::new(),
        args.delivery,
        Arc::new(LogNavigator),
    ));
    let poll_interval = Some(Duration::from_secs(args.poll_interval_secs)).filter(|d| !d.is_zero());
    let ctx = Context::new(resolver, poll_interval);

    command::Command::execute(args.command, &ctx).await
}

#[tokio::main]
async fn main() {
    let logger_env = env_logger::Env::new()
        .filter_or("REVIEWDASH_LOG", "warn")
        .write_style("REVIEWDASH_LOG_STYLE");
    env_logger::Builder::from_env(logger_env).init();

    if let Err(e) = run(Args::parse()).await {
        error!("We encountered an error: {}", e);
        process::exit(1);
    };
}
