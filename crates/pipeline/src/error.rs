use std::time::Duration;

use tally_core::{AccountId, MappingError};
use tally_import::FormatError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Could not determine the currency for account {account_id}; set it on the account or pass one explicitly")]
pub struct CurrencyResolutionError {
    pub account_id: AccountId,
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Currency(#[from] CurrencyResolutionError),
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}
