//! Signing and sending a single delivery, and classifying the outcome.

use crate::{
    delivery::DeliveryRecord,
    protocol::public_key::main_key_id,
    signatures::sign_request,
    FEDERATION_CONTENT_TYPE,
};
use chrono::{DateTime, Utc};
use http::{header::HeaderName, HeaderValue, Method, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use std::time::Duration;
use tracing::debug;

/// How one delivery attempt ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    /// 2xx: the remote accepted the activity
    Delivered,
    /// Transient failure: retry under backoff
    Retry {
        /// Description recorded as `last_error`
        error: String,
        /// Remote-requested delay, from `Retry-After`
        retry_after: Option<Duration>,
    },
    /// Non-retryable rejection: the record dies
    Permanent {
        /// Description recorded as `last_error`
        error: String,
    },
}

/// Sign the activity with the sender's key and POST it to the target inbox.
/// Never returns an error; every failure mode is a classified outcome.
pub(crate) async fn sign_and_send(
    record: &DeliveryRecord,
    client: &ClientWithMiddleware,
    private_key_pem: &str,
    timeout: Duration,
    now: DateTime<Utc>,
) -> SendOutcome {
    debug!(
        activity = %record.activity_id,
        inbox = %record.target_inbox,
        attempt = record.attempt_count,
        "delivering activity"
    );

    let key_id = main_key_id(&record.sender_actor);
    let mut headers = match sign_request(
        &Method::POST,
        &record.target_inbox,
        Some(&record.activity),
        &key_id,
        private_key_pem,
        now,
    ) {
        Ok(headers) => headers,
        Err(err) => {
            // a key that cannot sign will not sign tomorrow either
            return SendOutcome::Permanent {
                error: format!("signing failed: {err}"),
            };
        }
    };
    headers.insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static(FEDERATION_CONTENT_TYPE),
    );

    let response = client
        .post(record.target_inbox.as_str())
        .headers(headers)
        .body(record.activity.clone())
        .timeout(timeout)
        .send()
        .await;

    match response {
        Ok(response) => classify_status(response.status(), response.headers().get("retry-after")),
        Err(err) => SendOutcome::Retry {
            error: format!("connection failed: {err}"),
            retry_after: None,
        },
    }
}

/// 2xx is delivered, 408/429/5xx are retried, any other 4xx is dead.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<&HeaderValue>,
) -> SendOutcome {
    if status.is_success() {
        return SendOutcome::Delivered;
    }
    let retryable = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();
    if retryable {
        SendOutcome::Retry {
            error: format!("remote returned {status}"),
            retry_after: retry_after.and_then(parse_retry_after),
        }
    } else {
        SendOutcome::Permanent {
            error: format!("remote returned {status}"),
        }
    }
}

/// `Retry-After` is either delay-seconds or an HTTP date.
fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    let value = value.to_str().ok()?;
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = httpdate::parse_http_date(value).ok()?;
    date.duration_since(std::time::SystemTime::now()).ok()
}
