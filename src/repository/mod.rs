// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Repository collections, per provider and installed.
//!
//! Every collection is read through the query cache. Mutations invalidate
//! the affected keys once the backend has accepted them and leave the cache
//! untouched when it has not, so the next read after a successful mutation
//! is always a fresh fetch rather than a locally patched copy.

pub(crate) mod bitbucket;
pub(crate) mod filter;
pub(crate) mod github;
pub(crate) mod gitlab;

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    cache::{keys, QueryCache, QueryOptions},
    error::{Error, Result},
    gateway::{self, Gateway, RequestOptions},
    model::{Identifier, Vcs},
};

use filter::Listing;

const INSTALLED_PATH: &str = "/api/v1/repositories/";
const ADD_PATH: &str = "/api/v1/repositories/add";
const FORCE_REFRESH_PARAM: &str = "force_refresh";

pub(crate) const COLLECTION_QUERY: QueryOptions =
    QueryOptions::new(Duration::from_secs(30), Duration::from_secs(5 * 60));

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct RepositoryRecord {
    #[serde(alias = "uuid")]
    pub(crate) id: Identifier,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) full_name: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default, alias = "is_private")]
    pub(crate) private: bool,
    #[serde(default)]
    pub(crate) language: Option<String>,
    #[serde(default)]
    pub(crate) html_url: Option<String>,
    /// Provider the record belongs to, when the backend says.
    #[serde(default, alias = "vcs_type")]
    pub(crate) provider: Option<String>,
    #[serde(default)]
    pub(crate) vulnerability_count: Option<u64>,
    #[serde(default)]
    pub(crate) monitoring_enabled: Option<bool>,
    #[serde(default)]
    pub(crate) health_score: Option<f64>,
    #[serde(default)]
    pub(crate) last_scan: Option<String>,
}

impl RepositoryRecord {
    fn belongs_to(&self, vcs: Vcs) -> bool {
        self.provider
            .as_deref()
            .map_or(true, |provider| Vcs::parse(provider) == Some(vcs))
    }
}

impl Listing for RepositoryRecord {
    fn id(&self) -> &Identifier {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn path(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    fn is_private(&self) -> bool {
        self.private
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn monitoring_enabled(&self) -> Option<bool> {
        self.monitoring_enabled
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub(crate) struct InstalledRepositories {
    pub(crate) repositories: Vec<RepositoryRecord>,
    #[serde(default)]
    pub(crate) user_login: Option<String>,
}

#[derive(Serialize)]
struct AddRequest<'a> {
    repository_ids: &'a [Identifier],
}

/// The repositories already connected to the review service.
#[derive(Clone)]
pub(crate) struct Installed {
    gateway: Gateway,
    cache: QueryCache,
}

impl Installed {
    pub(crate) fn new(gateway: Gateway, cache: QueryCache) -> Self {
        Self { gateway, cache }
    }

    pub(crate) async fn list(&self) -> Result<Arc<InstalledRepositories>> {
        let gateway = self.gateway.clone();
        self.cache
            .fetch(keys::REPOSITORIES, COLLECTION_QUERY, move || async move {
                gateway
                    .get_json::<InstalledRepositories>(INSTALLED_PATH, RequestOptions::default())
                    .await
            })
            .await
    }

    /// Whatever is cached, without going to the backend.
    pub(crate) async fn cached(&self) -> Result<Option<Arc<InstalledRepositories>>> {
        self.cache.peek(keys::REPOSITORIES).await
    }

    /// Rereads the collection from the backend, joining a read that is
    /// already under way instead of starting a second one.
    pub(crate) async fn refresh(&self) -> Result<Arc<InstalledRepositories>> {
        self.cache.mark_stale(keys::REPOSITORIES).await;
        self.list().await
    }

    /// Identifiers of installed repositories that may belong to `vcs`.
    pub(crate) async fn ids_for(&self, vcs: Vcs) -> Result<HashSet<Identifier>> {
        Ok(self
            .list()
            .await?
            .repositories
            .iter()
            .filter(|repo| repo.belongs_to(vcs))
            .map(|repo| repo.id.clone())
            .collect())
    }

    pub(crate) async fn add(&self, ids: &[Identifier]) -> Result<()> {
        let resp = self
            .gateway
            .request(
                Method::POST,
                ADD_PATH,
                RequestOptions::json(&AddRequest {
                    repository_ids: ids,
                })?,
            )
            .await?;
        gateway::ensure_success(resp).await?;
        info!("Added {} repositories", ids.len());
        self.cache.invalidate(keys::REPOSITORIES).await;
        Ok(())
    }

    pub(crate) async fn remove(&self, id: &Identifier) -> Result<()> {
        let resp = self
            .gateway
            .request(
                Method::DELETE,
                &format!("/api/v1/vcs-app/repositories/{id}"),
                RequestOptions::default(),
            )
            .await?;
        gateway::ensure_success(resp).await?;
        info!("Removed repository {}", id);
        self.cache.invalidate(keys::REPOSITORIES).await;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct SelectResult {
    #[serde(default)]
    pub(crate) added: Option<u64>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

/// A source-control provider the user can pick repositories from.
#[async_trait]
pub(crate) trait Provider: Send + Sync {
    type Repository: Listing + Clone + Send + Sync + 'static;

    fn vcs(&self) -> Vcs;

    /// Everything the provider offers, read through the cache unless
    /// `force_refresh` asks the backend to bypass its own cache too.
    async fn list_available(&self, force_refresh: bool) -> Result<Vec<Self::Repository>>;

    /// Drops the cached catalogue and has the backend refetch it from the
    /// provider.
    async fn refresh(&self) -> Result<Vec<Self::Repository>> {
        self.list_available(true).await
    }

    /// Connects the given repositories. Identifiers the provider does not
    /// offer are skipped with a warning; if none is offered nothing is sent.
    async fn select(&self, ids: &[Identifier]) -> Result<SelectResult>;
}

/// What a provider offers that is not installed yet.
pub(crate) async fn available_excluding_installed<P: Provider>(
    provider: &P,
    installed: &Installed,
) -> Result<Vec<P::Repository>> {
    let (available, taken) = tokio::try_join!(
        provider.list_available(false),
        installed.ids_for(provider.vcs())
    )?;
    let taken = taken.iter().collect::<HashSet<_>>();
    let remaining = filter::exclude_installed(&available, &taken);
    debug!(
        "{} of {} {} repositories are not installed",
        remaining.len(),
        available.len(),
        provider.vcs()
    );
    Ok(remaining)
}

/// Picks the requested identifiers out of what `vcs` offers. Identifiers it
/// does not offer are reported, and a request matching nothing fails.
pub(crate) fn pick<R: Listing + Clone>(
    vcs: Vcs,
    available: &[R],
    ids: &[Identifier],
) -> Result<Vec<R>> {
    let picked = available
        .iter()
        .filter(|repo| ids.contains(repo.id()))
        .cloned()
        .collect::<Vec<_>>();
    if picked.is_empty() {
        return Err(Error::NothingToSelect(vcs));
    }

    let offered = picked.iter().map(Listing::id).collect::<HashSet<_>>();
    for id in ids.iter().filter(|id| !offered.contains(id)) {
        warn!("Skipping {}, which {} does not offer", id, vcs);
    }
    Ok(picked)
}

/// Reads a provider catalogue through the cache. A forced refresh drops the
/// cached copy first and asks the backend to skip its own cache as well.
pub(crate) async fn fetch_catalog<T>(
    gateway: &Gateway,
    cache: &QueryCache,
    key: &'static str,
    path: &'static str,
    force_refresh: bool,
) -> Result<Arc<T>>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    if force_refresh {
        cache.invalidate(key).await;
    }
    let gateway = gateway.clone();
    cache
        .fetch(key, COLLECTION_QUERY, move || async move {
            let mut options = RequestOptions::default();
            if force_refresh {
                options = options.with_query(FORCE_REFRESH_PARAM, "true");
            }
            gateway.get_json::<T>(path, options).await
        })
        .await
}

/// Posts a selection and, only if the backend accepts it, invalidates the
/// installed collection and the provider catalogue.
pub(crate) async fn submit_selection<B: Serialize + Sync>(
    gateway: &Gateway,
    cache: &QueryCache,
    catalog_key: &str,
    path: &str,
    body: &B,
) -> Result<SelectResult> {
    let resp = gateway
        .request(Method::POST, path, RequestOptions::json(body)?)
        .await?;
    let result: SelectResult = gateway::read_json_or_default(resp).await?;
    cache.invalidate(keys::REPOSITORIES).await;
    cache.invalidate(catalog_key).await;
    Ok(result)
}
