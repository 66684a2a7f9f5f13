use crate::SharedAppState;
use crate::routes::portone::PaymentStatus;
use crate::routes::webhook::{CustomData, PortOneWebhookRequest};
use crate::store::{InsertOutcome, NewDonation, StoreError};
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{FromRequest, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::WithRejection;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

#[tracing::instrument(skip_all, fields(method = %request.method()))]
pub async fn handler(
    State(state): State<SharedAppState>,
    request: Request,
) -> Result<Response, WebhookError> {
    if request.method() != Method::POST {
        return Ok((StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response());
    }

    // The body is only read once the method is known to be POST.
    let WithRejection(body, _) =
        WithRejection::<Bytes, WebhookError>::from_request(request, &state).await?;
    let request: PortOneWebhookRequest = serde_json::from_slice(&body)?;
    info!(
        payment_id = ?request.payment_id,
        status = ?request.status,
        amount = ?request.total_amount,
        "PortOne webhook received"
    );

    if PaymentStatus::from(request.status.as_deref()) != PaymentStatus::Paid {
        return Ok(acknowledge("Ignored (Not PAID)"));
    }

    let payment_id = request
        .payment_id
        .clone()
        .ok_or(WebhookError::MissingPaymentId)?;

    if let Some(existing) = state.store.find_by_payment_id(&payment_id).await? {
        info!(%payment_id, donation_id = %existing, "payment already processed");
        return Ok(acknowledge("Already processed"));
    }

    let custom = request.custom_data().unwrap_or_else(|e| {
        warn!(%payment_id, "failed to parse customData: {e}");
        CustomData::default()
    });

    let donation = NewDonation::new(payment_id, request.total_amount, custom);
    match state.store.insert(&donation).await? {
        InsertOutcome::Inserted(id) => {
            info!(payment_id = %donation.payment_id, donation_id = ?id, "donation saved");
            Ok(acknowledge("Success"))
        }
        InsertOutcome::Duplicate => {
            info!(payment_id = %donation.payment_id, "payment recorded by a concurrent delivery");
            Ok(acknowledge("Already processed"))
        }
    }
}

fn acknowledge(message: &str) -> Response {
    (StatusCode::OK, Json(json!({ "message": message }))).into_response()
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    BodyRejection(#[from] BytesRejection),
    #[error("invalid webhook body: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("paymentId is missing")]
    MissingPaymentId,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let message = error_message(&self);
        error!(error = %message, "PortOne webhook failed");
        (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
    }
}

fn error_message(error: &impl std::fmt::Display) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        message
    }
}
