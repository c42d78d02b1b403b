// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use clap::Subcommand;
use log::error;
use tabled::Tabled;
use tokio::sync::watch;

use super::{or_dash, Context, ListingArgs, ListingRow};
use crate::{
    error::{Error, Result},
    model::Identifier,
    poll::Poller,
    repository::RepositoryRecord,
};

/// Work with the repositories connected to the review service.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// List connected repositories.
    List(ListingArgs),
    /// Connect repositories by identifier.
    Add {
        #[arg(required = true)]
        ids: Vec<Identifier>,
    },
    /// Disconnect one repository.
    Remove { id: Identifier },
    /// Keep listing connected repositories as they change.
    Watch(ListingArgs),
}

#[derive(Clone, Debug, Tabled)]
struct InstalledRow {
    #[tabled(inline)]
    listing: ListingRow,
    #[tabled(rename = "Monitoring")]
    monitoring: String,
    #[tabled(rename = "Vulnerabilities")]
    vulnerabilities: String,
    #[tabled(rename = "Health")]
    health: String,
}

impl InstalledRow {
    fn of(repo: &RepositoryRecord) -> Self {
        Self {
            listing: ListingRow::of(repo),
            monitoring: or_dash(repo.monitoring_enabled.map(|on| if on { "on" } else { "off" })),
            vulnerabilities: or_dash(repo.vulnerability_count),
            health: or_dash(repo.health_score.map(|score| format!("{score:.1}"))),
        }
    }
}

#[async_trait]
impl super::Command for Command {
    async fn execute(self, ctx: &Context) -> Result<()> {
        let _ = ctx.authenticated().await?;
        let installed = ctx.installed();

        match self {
            Self::List(listing) => {
                let repos = installed.list().await?;
                listing.show(&repos.repositories, InstalledRow::of);
            }
            Self::Add { ids } => {
                installed.add(&ids).await?;
                println!("Connected {} repositories.", ids.len());
            }
            Self::Remove { id } => {
                installed.remove(&id).await?;
                println!("Disconnected {id}.");
            }
            Self::Watch(listing) => {
                let Some(period) = ctx.poll_interval() else {
                    error!("Polling is turned off; set a poll interval to watch");
                    return Err(Error::Command);
                };
                // A terminal in the foreground is always visible.
                let (_visible, visibility) = watch::channel(true);
                let poller = Poller::spawn(installed.clone(), Some(period), visibility);
                let mut updates = poller.updates();

                let mut shown = installed.list().await?;
                listing.show(&shown.repositories, InstalledRow::of);

                while updates.changed().await.is_ok() {
                    let Some(current) = updates.borrow_and_update().clone() else {
                        continue;
                    };
                    if current.repositories != shown.repositories {
                        listing.show(&current.repositories, InstalledRow::of);
                        shown = current;
                    }
                }
            }
        }
        Ok(())
    }
}
