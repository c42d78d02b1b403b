// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::repository::{Installed, InstalledRepositories};

type Published = Option<Arc<InstalledRepositories>>;

/// Periodically refreshes the installed repositories while they are visible.
///
/// Whatever is already cached is published to [`Poller::updates`] first,
/// then each refresh that changes the collection. The task is aborted when the
/// handle is dropped.
pub(crate) struct Poller {
    task: Option<JoinHandle<()>>,
    updates: watch::Receiver<Published>,
}

impl Poller {
    /// With no `interval` nothing is spawned.
    pub(crate) fn spawn(
        installed: Installed,
        interval: Option<Duration>,
        visibility: watch::Receiver<bool>,
    ) -> Self {
        let (publish, updates) = watch::channel(None);
        let task = interval
            .filter(|interval| !interval.is_zero())
            .map(|interval| tokio::spawn(run(installed, interval, visibility, publish)));
        Self { task, updates }
    }

    /// Collections as the refreshes land. The channel closes when polling
    /// stops.
    pub(crate) fn updates(&self) -> watch::Receiver<Published> {
        self.updates.clone()
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Stopping repository polling");
            task.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    installed: Installed,
    period: Duration,
    visibility: watch::Receiver<bool>,
    publish: watch::Sender<Published>,
) {
    match installed.cached().await {
        Ok(Some(repos)) => {
            let _ = publish.send_replace(Some(repos));
        }
        Ok(None) => {}
        Err(e) => warn!("Could not read the cached repositories: {}", e),
    }

    let mut ticks = time::interval_at(time::Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let _ = ticks.tick().await;
        if !*visibility.borrow() {
            debug!("Skipping repository refresh while hidden");
            continue;
        }
        match installed.refresh().await {
            Ok(repos) => {
                debug!("Polled {} installed repositories", repos.repositories.len());
                let _ = publish.send_if_modified(|current| {
                    if current.as_deref() == Some(&*repos) {
                        return false;
                    }
                    *current = Some(repos);
                    true
                });
            }
            Err(e) => warn!("Repository refresh failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::repository::testing::gateway;

    async fn server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repositories/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"repositories": []})))
            .mount(&server)
            .await;
        server
    }

    /// Moves the paused clock forward, then lets real time pass so a
    /// refresh started by the tick can reach the server.
    async fn advance_and_count(server: &MockServer, by: Duration, expected: usize) -> usize {
        time::sleep(by).await;
        time::resume();
        let mut seen = 0;
        for _ in 0..20 {
            seen = server.received_requests().await.map_or(0, |r| r.len());
            if seen >= expected {
                break;
            }
            time::sleep(Duration::from_millis(50)).await;
        }
        time::pause();
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_views_are_not_refreshed() {
        let server = server().await;
        let (gw, cache) = gateway(&server);
        let (visible, visibility) = watch::channel(false);

        let poller = Poller::spawn(
            Installed::new(gw, cache),
            Some(Duration::from_secs(30)),
            visibility,
        );
        assert_eq!(
            advance_and_count(&server, Duration::from_secs(31), 0).await,
            0
        );

        let _ = visible.send(true);
        assert_eq!(
            advance_and_count(&server, Duration::from_secs(30), 1).await,
            1
        );
        assert!(poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_pollers_stay_quiet() {
        let server = server().await;
        let (gw, cache) = gateway(&server);
        let (_visible, visibility) = watch::channel(true);

        let mut poller = Poller::spawn(
            Installed::new(gw, cache),
            Some(Duration::from_secs(10)),
            visibility,
        );
        poller.stop();
        assert!(!poller.is_running());

        assert_eq!(
            advance_and_count(&server, Duration::from_secs(60), 0).await,
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_are_published() {
        let server = server().await;
        let (gw, cache) = gateway(&server);
        let (_visible, visibility) = watch::channel(true);

        let poller = Poller::spawn(
            Installed::new(gw, cache),
            Some(Duration::from_secs(10)),
            visibility,
        );
        let mut updates = poller.updates();
        assert!(updates.borrow().is_none());

        assert_eq!(
            advance_and_count(&server, Duration::from_secs(11), 1).await,
            1
        );
        time::resume();
        updates.changed().await.unwrap();
        assert_eq!(
            updates.borrow().as_ref().map(|repos| repos.repositories.len()),
            Some(0)
        );
    }

    #[tokio::test]
    async fn cached_collections_are_published_first() {
        let server = server().await;
        let (gw, cache) = gateway(&server);
        let installed = Installed::new(gw, cache);
        let _ = installed.list().await.unwrap();
        let (_visible, visibility) = watch::channel(true);

        let poller = Poller::spawn(installed, Some(Duration::from_secs(600)), visibility);
        let mut updates = poller.updates();
        updates.changed().await.unwrap();
        assert!(updates.borrow().is_some());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_interval_means_no_task() {
        let server = server().await;
        let (gw, cache) = gateway(&server);
        let (_visible, visibility) = watch::channel(true);

        let poller = Poller::spawn(Installed::new(gw, cache), None, visibility);
        assert!(!poller.is_running());
        assert!(poller.updates().changed().await.is_err());
    }
}
