// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::Result;

use super::{IsPersistent, Storage};

/// Storage for contexts that have nowhere to keep a session. Reads are always
/// empty and writes are dropped.
pub(crate) struct Detached<T> {
    _data: PhantomData<fn() -> T>,
}

impl<T> Detached<T> {
    pub(crate) fn new() -> Self {
        Self { _data: PhantomData }
    }
}

impl<T> IsPersistent for Detached<T> {
    fn is_persistent(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: Send + Sync> Storage<T> for Detached<T> {
    async fn get(&mut self) -> Result<Option<T>> {
        Ok(None)
    }

    async fn update(&mut self, _data: &T) -> Result<()> {
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}
