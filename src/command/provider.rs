// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use clap::Subcommand;
use log::{debug, info};
use tabled::{settings::Style, Table, Tabled};

use super::{or_dash, Context, ListingArgs, ListingRow};
use crate::{
    error::Result,
    model::Identifier,
    repository::{available_excluding_installed, bitbucket::Workspace, Provider},
};

/// Picking repositories from one provider.
#[derive(Debug, Subcommand)]
pub(crate) enum Selection {
    /// List repositories the provider offers that are not connected yet.
    Available {
        #[command(flatten)]
        listing: ListingArgs,

        /// Ask the backend to refetch from the provider.
        #[arg(long)]
        refresh: bool,
    },
    /// Connect repositories by identifier.
    Select {
        #[arg(required = true)]
        ids: Vec<Identifier>,
    },
}

impl Selection {
    async fn run<P: Provider>(self, provider: &P, ctx: &Context) -> Result<()> {
        match self {
            Self::Available { listing, refresh } => {
                if refresh {
                    let fetched = provider.refresh().await?;
                    debug!("Refetched {} {} repositories", fetched.len(), provider.vcs());
                }
                let repos = available_excluding_installed(provider, ctx.installed()).await?;
                listing.show(&repos, ListingRow::of);
            }
            Self::Select { ids } => {
                let result = provider.select(&ids).await?;
                match result.message {
                    Some(message) => println!("{message}"),
                    None => println!(
                        "Connected {} {} repositories.",
                        or_dash(result.added),
                        provider.vcs()
                    ),
                }
            }
        }
        Ok(())
    }
}

/// GitHub repositories and the GitHub App.
#[derive(Debug, Subcommand)]
pub(crate) enum Github {
    /// Start installing the GitHub App for your organization.
    Install,
    #[command(flatten)]
    Selection(Selection),
}

#[async_trait]
impl super::Command for Github {
    async fn execute(self, ctx: &Context) -> Result<()> {
        let _ = ctx.authenticated().await?;
        let github = ctx.github();
        match self {
            Self::Install => {
                let org = ctx.resolver().organization().await?;
                let url = github.install(&org).await?;
                info!("Finish the installation in a browser");
                println!("{url}");
                Ok(())
            }
            Self::Selection(selection) => selection.run(&github, ctx).await,
        }
    }
}

/// GitLab projects.
#[derive(Debug, Subcommand)]
pub(crate) enum Gitlab {
    #[command(flatten)]
    Selection(Selection),
}

#[async_trait]
impl super::Command for Gitlab {
    async fn execute(self, ctx: &Context) -> Result<()> {
        let _ = ctx.authenticated().await?;
        match self {
            Self::Selection(selection) => selection.run(&ctx.gitlab(), ctx).await,
        }
    }
}

#[derive(Clone, Debug, Tabled)]
struct WorkspaceRow {
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "UUID")]
    uuid: String,
}

impl From<Workspace> for WorkspaceRow {
    fn from(value: Workspace) -> Self {
        Self {
            slug: value.slug,
            name: or_dash(value.name),
            uuid: or_dash(value.uuid),
        }
    }
}

/// Bitbucket repositories and workspaces.
#[derive(Debug, Subcommand)]
pub(crate) enum Bitbucket {
    /// List the workspaces your Bitbucket account can see.
    Workspaces {
        #[arg(long)]
        refresh: bool,
    },
    #[command(flatten)]
    Selection(Selection),
}

#[async_trait]
impl super::Command for Bitbucket {
    async fn execute(self, ctx: &Context) -> Result<()> {
        let _ = ctx.authenticated().await?;
        let bitbucket = ctx.bitbucket();
        match self {
            Self::Workspaces { refresh } => {
                let rows = bitbucket
                    .workspaces(refresh)
                    .await?
                    .into_iter()
                    .map(WorkspaceRow::from);
                println!("{}", Table::new(rows).with(Style::rounded()));
                Ok(())
            }
            Self::Selection(selection) => selection.run(&bitbucket, ctx).await,
        }
    }
}
