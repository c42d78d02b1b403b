// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use log::error;
use url::Url;

use super::{or_dash, Context};
use crate::{
    callback::{Callback, Outcome},
    error::{Error, Result},
};

/// Finish signing in with the URL the identity provider redirected to.
#[derive(Debug, Parser)]
pub(crate) struct Login {
    /// The full callback URL, including its query string.
    #[arg(value_parser = Url::parse)]
    callback_url: Url,
}

#[async_trait]
impl super::Command for Login {
    async fn execute(self, ctx: &Context) -> Result<()> {
        let callback = Callback::new(Arc::clone(ctx.resolver()));
        match callback.process(&self.callback_url).await {
            Outcome::Authenticated { token_delivered } => {
                if !token_delivered {
                    println!("No credential in the callback; relying on the backend session.");
                }
                let verdict = ctx.authenticated().await?;
                println!("Signed in as {}.", or_dash(verdict.login.as_deref()));
                Ok(())
            }
            Outcome::Rejected => {
                error!("The sign-in was not accepted by the backend");
                Err(Error::Command)
            }
        }
    }
}

/// Show who the current session belongs to.
#[derive(Debug, Parser)]
pub(crate) struct Whoami {}

#[async_trait]
impl super::Command for Whoami {
    async fn execute(self, ctx: &Context) -> Result<()> {
        let verdict = ctx.authenticated().await?;
        println!("Login:    {}", or_dash(verdict.login.as_deref()));
        println!("Email:    {}", or_dash(verdict.email.as_deref()));
        println!("User ID:  {}", or_dash(verdict.user_id.as_ref()));
        println!("Provider: {}", or_dash(verdict.vcs()));
        Ok(())
    }
}

/// Show the organization the session acts for.
#[derive(Debug, Parser)]
pub(crate) struct Org {}

#[async_trait]
impl super::Command for Org {
    async fn execute(self, ctx: &Context) -> Result<()> {
        let _ = ctx.authenticated().await?;
        let org = ctx.resolver().organization().await?;
        println!("Organization: {} ({})", org.login, org.org_id);
        println!("Provider:     {}", or_dash(org.vcs_type.as_deref()));
        Ok(())
    }
}

/// End the session here and on the backend.
#[derive(Debug, Parser)]
pub(crate) struct Logout {}

#[async_trait]
impl super::Command for Logout {
    async fn execute(self, ctx: &Context) -> Result<()> {
        ctx.resolver().logout().await?;
        println!("Signed out.");
        Ok(())
    }
}
