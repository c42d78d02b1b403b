// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::Args;
use log::error;
use tabled::{
    settings::{object::Segment, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::{
    error::{Error, Result},
    guard::{DashboardGuard, Gate},
    repository::{
        bitbucket::Bitbucket,
        filter::{self, Listing, RepositoryFilter},
        github::Github,
        gitlab::Gitlab,
        Installed,
    },
    session::{Resolver, SessionVerdict},
};

pub(crate) mod provider;
pub(crate) mod repos;
pub(crate) mod session;

#[async_trait]
pub(crate) trait Command {
    async fn execute(self, ctx: &Context) -> Result<()>;
}

/// Everything a command needs, built once per invocation.
pub(crate) struct Context {
    resolver: Arc<Resolver>,
    installed: Installed,
    poll_interval: Option<Duration>,
}

impl Context {
    pub(crate) fn new(resolver: Arc<Resolver>, poll_interval: Option<Duration>) -> Self {
        let installed = Installed::new(resolver.gateway().clone(), resolver.cache().clone());
        Self {
            resolver,
            installed,
            poll_interval,
        }
    }

    pub(crate) fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub(crate) fn installed(&self) -> &Installed {
        &self.installed
    }

    pub(crate) fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    pub(crate) fn github(&self) -> Github {
        Github::new(self.resolver.gateway().clone(), self.resolver.cache().clone())
    }

    pub(crate) fn gitlab(&self) -> Gitlab {
        Gitlab::new(self.resolver.gateway().clone(), self.resolver.cache().clone())
    }

    pub(crate) fn bitbucket(&self) -> Bitbucket {
        Bitbucket::new(self.resolver.gateway().clone(), self.resolver.cache().clone())
    }

    /// Runs the dashboard guard. Commands that touch the protected area call
    /// this first and stop if the session is not valid.
    pub(crate) async fn authenticated(&self) -> Result<Arc<SessionVerdict>> {
        self.resolver.enable();
        let gate = DashboardGuard::new(Arc::clone(&self.resolver)).check().await;
        if let Some(verdict) = gate.content(Arc::clone) {
            return Ok(verdict);
        }

        if let Gate::Redirecting(_) = gate {
            error!("You are not signed in; run the login command first");
        } else {
            error!("The session could not be resolved");
        }
        Err(Error::Command)
    }
}

#[derive(Clone, Debug, Args)]
pub(crate) struct ListingArgs {
    #[command(flatten)]
    filter: RepositoryFilter,

    /// The page to show, starting at 1.
    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long, default_value_t = filter::DEFAULT_PAGE_SIZE)]
    page_size: usize,
}

impl ListingArgs {
    /// Filters, pages and prints `repos` using `row` for each line.
    pub(crate) fn show<R, T, F>(&self, repos: &[R], row: F)
    where
        R: Listing,
        T: Tabled,
        F: Fn(&R) -> T,
    {
        let page = filter::paginate(self.filter.apply(repos), self.page, self.page_size);
        if page.items.is_empty() {
            println!("No repositories match.");
            return;
        }

        println!(
            "{}",
            Table::new(page.items.into_iter().map(row))
                .with(Style::rounded())
                .with(Modify::new(Segment::new(1.., 1..=2)).with(Alignment::left()))
        );
        println!(
            "Page {} of {} ({} repositories)",
            page.page, page.total_pages, page.total
        );
    }
}

#[derive(Clone, Debug, Tabled)]
pub(crate) struct ListingRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Visibility")]
    visibility: &'static str,
    #[tabled(rename = "Language")]
    language: String,
}

impl ListingRow {
    pub(crate) fn of<R: Listing + ?Sized>(repo: &R) -> Self {
        Self {
            id: repo.id().to_string(),
            name: repo.name().to_owned(),
            path: repo.path().unwrap_or_default().to_owned(),
            visibility: if repo.is_private() {
                "private"
            } else {
                "public"
            },
            language: repo.language().unwrap_or_default().to_owned(),
        }
    }
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_owned(), |v| v.to_string())
}
