use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

use crate::store::{DonationId, DonationStore, InsertOutcome, NewDonation, StoreError};

diesel::table! {
    donations (id) {
        id -> Integer,
        payment_id -> Text,
        amount -> Nullable<Double>,
        user_id -> Nullable<Text>,
        project_id -> Nullable<Text>,
        message -> Text,
        created_at -> Timestamp,
    }
}

const CREATE_DONATIONS: &str = "CREATE TABLE IF NOT EXISTS donations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payment_id TEXT NOT NULL UNIQUE,
    amount DOUBLE,
    user_id TEXT,
    project_id TEXT,
    message TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL
)";

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = donations)]
struct DonationRow {
    payment_id: String,
    amount: Option<f64>,
    user_id: Option<String>,
    project_id: Option<String>,
    message: String,
    created_at: NaiveDateTime,
}

impl From<&NewDonation> for DonationRow {
    fn from(donation: &NewDonation) -> Self {
        Self {
            payment_id: donation.payment_id.clone(),
            amount: donation.amount.as_ref().and_then(|n| n.as_f64()),
            user_id: donation.user_id.clone(),
            project_id: donation.project_id.clone(),
            message: donation.message.clone(),
            created_at: donation.created_at.naive_utc(),
        }
    }
}

/// Embedded store for local runs. Unlike the REST table, `payment_id` is
/// declared unique here, so concurrent deliveries cannot both insert.
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<SqliteConnection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let mut connection = SqliteConnection::establish(path)?;
        diesel::sql_query(CREATE_DONATIONS).execute(&mut connection)?;
        info!("opened sqlite donation store at {path}");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    async fn run<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = connection.lock().map_err(|_| StoreError::Poisoned)?;
            query(&mut connection)
        })
        .await?
    }
}

#[async_trait]
impl DonationStore for SqliteStore {
    #[instrument(skip(self))]
    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<DonationId>, StoreError> {
        let payment_id = payment_id.to_owned();
        self.run(move |conn| {
            let id = donations::table
                .filter(donations::payment_id.eq(&payment_id))
                .select(donations::id)
                .first::<i32>(conn)
                .optional()?;
            Ok(id.map(|id| DonationId(id.to_string())))
        })
        .await
    }

    #[instrument(skip(self, donation), fields(payment_id = %donation.payment_id))]
    async fn insert(&self, donation: &NewDonation) -> Result<InsertOutcome, StoreError> {
        let row = DonationRow::from(donation);
        self.run(move |conn| {
            match diesel::insert_into(donations::table)
                .values(&row)
                .returning(donations::id)
                .get_result::<i32>(conn)
            {
                Ok(id) => Ok(InsertOutcome::Inserted(Some(DonationId(id.to_string())))),
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    debug!("insert hit unique constraint on payment_id");
                    Ok(InsertOutcome::Duplicate)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}

#[cfg(test)]
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = donations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredDonation {
    pub id: i32,
    pub payment_id: String,
    pub amount: Option<f64>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub message: String,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
impl SqliteStore {
    pub fn in_memory() -> Self {
        Self::open(":memory:").unwrap()
    }

    pub async fn donations_for(&self, payment_id: &str) -> Vec<StoredDonation> {
        let payment_id = payment_id.to_owned();
        self.run(move |conn| {
            Ok(donations::table
                .filter(donations::payment_id.eq(&payment_id))
                .select(StoredDonation::as_select())
                .load::<StoredDonation>(conn)?)
        })
        .await
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::webhook::CustomData;
    use crate::store::DONATION_MESSAGE;

    fn donation(payment_id: &str) -> NewDonation {
        NewDonation::new(
            payment_id.to_string(),
            Some(5000.into()),
            CustomData {
                user_id: Some("u1".to_string()),
                project_id: None,
            },
        )
    }

    #[tokio::test]
    async fn insert_then_find() {
        let store = SqliteStore::in_memory();
        assert_eq!(store.find_by_payment_id("p1").await.unwrap(), None);

        let id = match store.insert(&donation("p1")).await.unwrap() {
            InsertOutcome::Inserted(Some(id)) => id,
            other => panic!("expected an inserted row, got {other:?}"),
        };

        assert_eq!(store.find_by_payment_id("p1").await.unwrap(), Some(id));
        assert_eq!(store.find_by_payment_id("p2").await.unwrap(), None);

        let rows = store.donations_for("p1").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, Some(5000.0));
        assert_eq!(rows[0].user_id.as_deref(), Some("u1"));
        assert_eq!(rows[0].project_id, None);
        assert_eq!(rows[0].message, DONATION_MESSAGE);
    }

    #[tokio::test]
    async fn second_insert_is_duplicate() {
        let store = SqliteStore::in_memory();
        store.insert(&donation("p1")).await.unwrap();

        let outcome = store.insert(&donation("p1")).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate);
        assert_eq!(store.donations_for("p1").await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_keep_one_row() {
        let store = SqliteStore::in_memory();
        let first = donation("p1");
        let second = donation("p1");
        let (a, b) = tokio::join!(store.insert(&first), store.insert(&second));

        let mut outcomes = [a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, InsertOutcome::Duplicate));
        assert!(matches!(outcomes[0], InsertOutcome::Inserted(_)));
        assert_eq!(outcomes[1], InsertOutcome::Duplicate);
        assert_eq!(store.donations_for("p1").await.len(), 1);
    }

    #[test]
    fn open_rejects_unwritable_path() {
        let result = SqliteStore::open("/nonexistent-dir/donations.db");
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }
}
