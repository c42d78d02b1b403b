// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Search, filtering and paging over an already-fetched collection. None of
//! this touches the network.

use std::collections::HashSet;

use clap::{Args, ValueEnum};

use crate::model::Identifier;

pub(crate) const DEFAULT_PAGE_SIZE: usize = 10;

/// The fields a repository listing exposes to search and filters.
pub(crate) trait Listing {
    fn id(&self) -> &Identifier;
    fn name(&self) -> &str;
    fn description(&self) -> Option<&str>;
    /// Namespaced path, e.g. `group/project`.
    fn path(&self) -> Option<&str>;
    fn is_private(&self) -> bool;
    fn language(&self) -> Option<&str>;

    fn monitoring_enabled(&self) -> Option<bool> {
        None
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Visibility {
    Public,
    Private,
}

#[derive(Clone, Debug, Default, Args)]
pub(crate) struct RepositoryFilter {
    /// Case-insensitive text to look for in the name, description or path.
    #[arg(long, short)]
    pub(crate) search: Option<String>,

    #[arg(long, value_enum)]
    pub(crate) visibility: Option<Visibility>,

    /// Exact primary language.
    #[arg(long)]
    pub(crate) language: Option<String>,

    /// Only repositories whose monitoring is switched on (or off).
    #[arg(long)]
    pub(crate) monitoring: Option<bool>,
}

impl RepositoryFilter {
    pub(crate) fn matches<R: Listing + ?Sized>(&self, repo: &R) -> bool {
        if let Some(needle) = self.search.as_deref().map(str::to_lowercase) {
            let hit = [Some(repo.name()), repo.description(), repo.path()]
                .into_iter()
                .flatten()
                .any(|haystack| haystack.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        if let Some(visibility) = self.visibility {
            if repo.is_private() != (visibility == Visibility::Private) {
                return false;
            }
        }

        if let Some(language) = self.language.as_deref() {
            if repo.language() != Some(language) {
                return false;
            }
        }

        if let Some(monitoring) = self.monitoring {
            if repo.monitoring_enabled().unwrap_or(false) != monitoring {
                return false;
            }
        }

        true
    }

    pub(crate) fn apply<'r, R: Listing>(&self, repos: &'r [R]) -> Vec<&'r R> {
        repos.iter().filter(|repo| self.matches(*repo)).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Page<T> {
    pub(crate) items: Vec<T>,
    /// One-based, after clamping.
    pub(crate) page: usize,
    pub(crate) total_pages: usize,
    pub(crate) total: usize,
}

/// Cuts one window out of `items`. Out-of-range pages are clamped to the
/// nearest existing page, and an empty collection is a single empty page.
pub(crate) fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let total = items.len();
    let total_pages = total.div_ceil(page_size);
    let page = page.clamp(1, total_pages.max(1));

    let items = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    Page {
        items,
        page,
        total_pages,
        total,
    }
}

/// Everything in `available` whose identifier is not in `installed`.
pub(crate) fn exclude_installed<R: Listing + Clone>(
    available: &[R],
    installed: &HashSet<&Identifier>,
) -> Vec<R> {
    available
        .iter()
        .filter(|repo| !installed.contains(repo.id()))
        .cloned()
        .collect()
}
