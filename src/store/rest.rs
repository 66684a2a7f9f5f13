use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::config::DatastoreConfig;
use crate::store::{DonationId, DonationStore, InsertOutcome, NewDonation, StoreError};

/// Postgres `unique_violation`, passed through by PostgREST on a 409.
const UNIQUE_VIOLATION: &str = "23505";

/// Donation store backed by a Supabase/PostgREST table, authorised with the
/// service credential so row level security does not apply.
pub struct RestStore {
    client: Client,
    endpoint: Url,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Value,
}

impl From<IdRow> for DonationId {
    fn from(row: IdRow) -> Self {
        match row.id {
            Value::String(id) => DonationId(id),
            other => DonationId(other.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RestStore {
    pub fn new(config: &DatastoreConfig) -> Result<Self, StoreError> {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &DatastoreConfig) -> Result<Self, StoreError> {
        let mut base = config.url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)?.join(&format!("rest/v1/{}", config.table))?;
        Ok(Self {
            client,
            endpoint,
            service_key: config.service_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body: PostgrestError = response.json().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            code: body.code,
            message: body
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string()),
        })
    }
}

#[async_trait]
impl DonationStore for RestStore {
    #[instrument(skip(self))]
    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<DonationId>, StoreError> {
        let filter = format!("eq.{payment_id}");
        let response = self
            .authorized(self.client.get(self.endpoint.clone()))
            .query(&[("select", "id"), ("payment_id", filter.as_str()), ("limit", "1")])
            .send()
            .await?;
        let rows: Vec<IdRow> = Self::read(response).await?;
        Ok(rows.into_iter().next().map(DonationId::from))
    }

    #[instrument(skip(self, donation), fields(payment_id = %donation.payment_id))]
    async fn insert(&self, donation: &NewDonation) -> Result<InsertOutcome, StoreError> {
        let response = self
            .authorized(self.client.post(self.endpoint.clone()))
            .query(&[("select", "id")])
            .header("Prefer", "return=representation")
            .json(donation)
            .send()
            .await?;
        match Self::read::<Vec<IdRow>>(response).await {
            Ok(rows) => Ok(InsertOutcome::Inserted(
                rows.into_iter().next().map(DonationId::from),
            )),
            Err(StoreError::Api {
                code: Some(code), ..
            }) if code == UNIQUE_VIOLATION => {
                debug!("insert hit unique constraint on payment_id");
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::webhook::CustomData;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> RestStore {
        RestStore::new(&DatastoreConfig {
            url: server.uri(),
            service_key: "service-key".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn donation(payment_id: &str) -> NewDonation {
        NewDonation::new(
            payment_id.to_string(),
            Some(5000.into()),
            CustomData {
                user_id: Some("u1".to_string()),
                project_id: Some("proj1".to_string()),
            },
        )
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let store = RestStore::new(&DatastoreConfig {
            url: "https://abc.supabase.co/base".to_string(),
            table: "gifts".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            store.endpoint().as_str(),
            "https://abc.supabase.co/base/rest/v1/gifts"
        );
    }

    #[test]
    fn rejects_invalid_url() {
        let result = RestStore::new(&DatastoreConfig {
            url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(StoreError::Url(_))));
    }

    #[tokio::test]
    async fn lookup_sends_credential_and_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/donations"))
            .and(query_param("select", "id"))
            .and(query_param("payment_id", "eq.p1"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 42 }])))
            .expect(1)
            .mount(&server)
            .await;

        let found = store_for(&server).find_by_payment_id("p1").await.unwrap();
        assert_eq!(found, Some(DonationId("42".to_string())));
    }

    #[tokio::test]
    async fn lookup_without_rows_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/donations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let found = store_for(&server).find_by_payment_id("p1").await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn insert_posts_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/donations"))
            .and(header("prefer", "return=representation"))
            .and(body_partial_json(json!({
                "payment_id": "p1",
                "amount": 5000,
                "user_id": "u1",
                "project_id": "proj1",
                "message": "PortOne webhook auto-save",
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!([{ "id": "3f7c1c1e-0000-4000-8000-000000000001" }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = store_for(&server).insert(&donation("p1")).await.unwrap();
        assert_eq!(
            outcome,
            InsertOutcome::Inserted(Some(DonationId(
                "3f7c1c1e-0000-4000-8000-000000000001".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn unique_violation_is_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/donations"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"donations_payment_id_key\"",
            })))
            .mount(&server)
            .await;

        let outcome = store_for(&server).insert(&donation("p1")).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate);
    }

    #[tokio::test]
    async fn rejection_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/donations"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "PGRST301",
                "message": "JWT expired",
            })))
            .mount(&server)
            .await;

        let err = store_for(&server).insert(&donation("p1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Api { status: 401, .. }));
        assert!(err.to_string().contains("JWT expired"));
    }

    #[tokio::test]
    async fn rejection_without_body_uses_status_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/donations"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = store_for(&server).find_by_payment_id("p1").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "datastore rejected request (503): Service Unavailable"
        );
    }
}
