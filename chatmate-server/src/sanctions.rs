//! Resumes renewal of persisted sanctions at start-up.

use chatmate_core::config::ModerationConfig;
use chatmate_core::entities::sanction::{GetActiveSanctions, SanctionRecord};
use chatmate_core::framework::DatabaseProcessor;
use chatmate_core::processors::{SanctionId, SanctionScheduler};
use chatmate_core::timer::CallbackError;
use chatmate_sdk::client::ModerationClient;
use kanau::processor::Processor;
use sqlx::PgPool;
use time::OffsetDateTime;

/// Load every active sanction and track it, renewing immediately.
///
/// A sanction whose first renewal fails is logged and left untracked; the
/// rest are still restored. Returns the number now tracked.
pub async fn restore_sanctions(
    pool: &PgPool,
    scheduler: &SanctionScheduler,
    moderation: &ModerationConfig,
    http: &reqwest::Client,
) -> Result<usize, sqlx::Error> {
    let processor = DatabaseProcessor { pool: pool.clone() };
    let records = processor
        .process(GetActiveSanctions {
            now: OffsetDateTime::now_utc(),
        })
        .await?;
    tracing::info!("Restoring {} active sanctions", records.len());

    let client = moderation.access_token.as_ref().map(|token| {
        ModerationClient::new(moderation.api_base_url.clone(), token.clone())
            .with_http_client(http.clone())
    });
    if client.is_none() && !records.is_empty() {
        tracing::warn!("No moderation access token configured, renewals will only be logged");
    }

    let mut restored = 0;
    for record in records {
        let id = SanctionId(record.id);
        let expiration = record.expires_at;
        let refresh = renewal(record, client.clone(), moderation.sanction_duration);
        match scheduler.start_tracking(id, expiration, true, refresh).await {
            Ok(decision) => {
                tracing::debug!(sanction_id = %id, ?decision, "Sanction restored");
                restored += 1;
            }
            Err(e) => {
                tracing::error!(sanction_id = %id, error = %e, "Failed to restore sanction");
            }
        }
    }
    Ok(restored)
}

/// One grant of `duration` for the sanctioned channel.
fn renewal(
    record: SanctionRecord,
    client: Option<ModerationClient>,
    duration: std::time::Duration,
) -> impl Fn() -> futures_util::future::BoxFuture<'static, Result<(), CallbackError>>
+ Send
+ Sync
+ 'static {
    use futures_util::FutureExt;

    move || {
        let client = client.clone();
        let live_chat_id = record.live_chat_id.clone();
        let channel_id = record.channel_id.clone();
        async move {
            match client {
                Some(client) => client
                    .apply_timeout(&live_chat_id, &channel_id, duration)
                    .await
                    .map_err(CallbackError::from),
                None => {
                    tracing::info!(
                        live_chat_id = %live_chat_id,
                        channel_id = %channel_id,
                        duration_secs = duration.as_secs(),
                        "Would renew timeout"
                    );
                    Ok(())
                }
            }
        }
        .boxed()
    }
}
