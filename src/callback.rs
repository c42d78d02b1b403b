// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Completion of an external sign-in.
//!
//! The identity provider sends the user back either with a credential in the
//! callback URL or with nothing but a backend session cookie. A URL credential
//! is verified on its own before it is stored, and the session resolver is
//! only enabled once it has been stored; otherwise validation could run
//! against an empty token store and bounce the user to the login page.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::OnceCell;
use url::Url;

use crate::{
    cache::keys,
    model::Vcs,
    navigate,
    session::{Resolver, SESSION_QUERY},
    token::Credential,
};

pub(crate) const SESSION_TOKEN_PARAM: &str = "session_token";
pub(crate) const LEGACY_TOKEN_PARAM: &str = "token";
pub(crate) const CONNECT_PARAM: &str = "connect";

const CREDENTIAL_PARAMS: [&str; 2] = [SESSION_TOKEN_PARAM, LEGACY_TOKEN_PARAM];

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Authenticated { token_delivered: bool },
    Rejected,
}

/// Runs at most once; later calls report the first outcome.
pub(crate) struct Callback {
    resolver: Arc<Resolver>,
    outcome: OnceCell<Outcome>,
}

fn delivered_credential(url: &Url) -> Option<Credential> {
    CREDENTIAL_PARAMS.iter().find_map(|name| {
        url.query_pairs()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| Credential::new(value.into_owned()))
    })
}

fn requested_connection(url: &Url) -> Option<Vcs> {
    let (_, value) = url.query_pairs().find(|(key, _)| key == CONNECT_PARAM)?;
    let vcs = Vcs::parse(&value);
    if vcs.is_none() {
        warn!("Ignoring unknown provider {:?} in callback", value);
    }
    vcs
}

/// The callback URL with every credential parameter removed.
pub(crate) fn strip_credentials(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !CREDENTIAL_PARAMS.iter().any(|name| key == name))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        let _ = stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

pub(crate) fn landing_route(connect: Option<Vcs>) -> String {
    match connect {
        Some(Vcs::Github) => format!("{}/repositories/install", navigate::DASHBOARD_ROUTE),
        Some(vcs) => format!("{}/repositories/select/{vcs}", navigate::DASHBOARD_ROUTE),
        None => navigate::DASHBOARD_ROUTE.to_owned(),
    }
}

impl Callback {
    pub(crate) fn new(resolver: Arc<Resolver>) -> Self {
        Self {
            resolver,
            outcome: OnceCell::new(),
        }
    }

    pub(crate) async fn process(&self, url: &Url) -> Outcome {
        self.outcome.get_or_init(|| self.run(url)).await.clone()
    }

    async fn run(&self, url: &Url) -> Outcome {
        let connect = requested_connection(url);

        let Some(credential) = delivered_credential(url) else {
            debug!("No credential in callback; relying on the session cookie");
            self.resolver.enable();
            self.resolver.navigator().navigate(&landing_route(connect));
            return Outcome::Authenticated {
                token_delivered: false,
            };
        };

        let verdict = match self.resolver.verify_credential(credential.clone()).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Delivered credential was not accepted: {}", e);
                let _ = self.resolver.redirect_to_login().await;
                return Outcome::Rejected;
            }
        };

        if let Err(e) = self.resolver.gateway().tokens().set(&credential).await {
            warn!("Could not store the delivered credential: {}", e);
            let _ = self.resolver.redirect_to_login().await;
            return Outcome::Rejected;
        }
        self.resolver
            .cache()
            .set(keys::SESSION, verdict, SESSION_QUERY)
            .await;
        self.resolver.navigator().replace_url(&strip_credentials(url));

        info!("Signed in from callback");
        self.resolver.enable();
        self.resolver.navigator().navigate(&landing_route(connect));
        Outcome::Authenticated {
            token_delivered: true,
        }
    }
}
