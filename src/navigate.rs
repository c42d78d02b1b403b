// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use log::info;
use url::Url;

pub(crate) const LOGIN_ROUTE: &str = "/login";
pub(crate) const DASHBOARD_ROUTE: &str = "/dashboard";

/// Where the session layer sends the user. Whatever presents the dashboard
/// implements this.
pub(crate) trait Navigator: Send + Sync {
    /// Moves to a new route, adding a history entry.
    fn navigate(&self, route: &str);

    /// Rewrites the current location in place, without a history entry.
    fn replace_url(&self, url: &Url);
}

/// Navigator for the command line, which has no location to move; the
/// target is reported instead.
pub(crate) struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, route: &str) {
        info!("Continue at {}", route);
    }

    fn replace_url(&self, url: &Url) {
        info!("Location is now {}", url);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use url::Url;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Move {
        Navigate(String),
        Replace(String),
    }

    #[derive(Default)]
    pub(crate) struct Recorder {
        moves: Mutex<Vec<Move>>,
    }

    impl Recorder {
        pub(crate) fn moves(&self) -> Vec<Move> {
            self.moves.lock().unwrap().clone()
        }

        pub(crate) fn navigations_to(&self, route: &str) -> usize {
            self.moves()
                .iter()
                .filter(|m| matches!(m, Move::Navigate(r) if r == route))
                .count()
        }
    }

    impl super::Navigator for Recorder {
        fn navigate(&self, route: &str) {
            self.moves.lock().unwrap().push(Move::Navigate(route.to_owned()));
        }

        fn replace_url(&self, url: &Url) {
            self.moves.lock().unwrap().push(Move::Replace(url.to_string()));
        }
    }
}
