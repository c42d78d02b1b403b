// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, str::FromStr};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Identifier as the backend sends it: numeric for most records, a string
/// (UUID or slug) for some providers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum Identifier {
    Number(u64),
    Text(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for Identifier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<u64>()
            .map_or_else(|_| Self::Text(s.to_owned()), Self::Number))
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Vcs {
    Github,
    Gitlab,
    Bitbucket,
}

impl Vcs {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(value, true).ok()
    }
}

impl fmt::Display for Vcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.to_possible_value().ok_or(fmt::Error)?;
        f.write_str(value.get_name())
    }
}
