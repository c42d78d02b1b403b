// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

use super::{IsPersistent, Storage};

/// Process-local storage. Clones share the same cell.
#[derive(Clone)]
pub(crate) struct Memory<T> {
    data: Arc<RwLock<Option<T>>>,
}

impl<T> Memory<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl<T> IsPersistent for Memory<T> {
    fn is_persistent(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: Send + Sync + Clone> Storage<T> for Memory<T> {
    async fn get(&mut self) -> Result<Option<T>> {
        let guard = self.data.read().await;
        Ok(guard.clone())
    }

    async fn update(&mut self, data: &T) -> Result<()> {
        let mut guard = self.data.write().await;
        *guard = Some(data.clone());
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        let mut guard = self.data.write().await;
        *guard = None;
        Ok(())
    }
}

impl<T> Default for Memory<T> {
    fn default() -> Self {
        Self {
            data: Arc::new(RwLock::new(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_observe_each_other() {
        let mut a = Memory::<String>::new();
        let mut b = a.clone();

        a.update(&"value".to_owned()).await.unwrap();
        assert_eq!(b.get().await.unwrap().as_deref(), Some("value"));

        b.clear().await.unwrap();
        assert_eq!(a.get().await.unwrap(), None);
    }
}
