use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Number;
use std::fmt;
use thiserror::Error;

use crate::routes::webhook::CustomData;

pub mod rest;
pub mod sqlite;

pub const DONATION_MESSAGE: &str = "PortOne webhook auto-save";

/// Identifier the datastore assigned to a donation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationId(pub String);

impl fmt::Display for DonationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewDonation {
    pub payment_id: String,
    pub amount: Option<Number>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl NewDonation {
    pub fn new(payment_id: String, amount: Option<Number>, custom: CustomData) -> Self {
        Self {
            payment_id,
            amount,
            user_id: custom.user_id,
            project_id: custom.project_id,
            message: DONATION_MESSAGE.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Option<DonationId>),
    /// The datastore already holds a row for this payment id.
    Duplicate,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("datastore rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("invalid datastore url: {0}")]
    Url(#[from] url::ParseError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("could not open database: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("database connection lock poisoned")]
    Poisoned,
}

#[async_trait]
pub trait DonationStore: Send + Sync {
    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<DonationId>, StoreError>;

    async fn insert(&self, donation: &NewDonation) -> Result<InsertOutcome, StoreError>;
}
