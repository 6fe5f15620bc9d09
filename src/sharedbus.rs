use error_stack::{Report, ResultExt};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::DispatchError;
use crate::model::{PriceTick, TriggeredAlert};

pub const TOPIC_PRICES: &str = "prices";
pub const TOPIC_ALERTS: &str = "alerts";
pub const TOPIC_ALERT_UPDATES: &str = "alert-updates";

const PRICE_KEY_TTL_SECS: u64 = 60;

/// Cross-process mirror of the in-process `Bus`, backed by Redis pub/sub.
/// Every successful `Cache::put` is mirrored here in addition to the
/// in-process `prices` topic; the sync bridge subscribes to `alert-updates`
/// through the same connection family.
pub struct SharedBus {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
}

impl SharedBus {
    pub async fn connect(redis_url: &str) -> Result<Self, Report<DispatchError>> {
        let client = redis::Client::open(redis_url).change_context(DispatchError::Publish {
            topic: "connect".into(),
        })?;
        let conn = client
            .get_connection_manager()
            .await
            .change_context(DispatchError::Publish {
                topic: "connect".into(),
            })?;
        Ok(Self { client, conn })
    }

    pub async fn publish_price(&mut self, tick: &PriceTick) -> Result<(), Report<DispatchError>> {
        let payload = serde_json::to_string(tick).change_context(DispatchError::Publish {
            topic: TOPIC_PRICES.into(),
        })?;
        self.conn
            .publish::<_, _, ()>(TOPIC_PRICES, &payload)
            .await
            .change_context(DispatchError::Publish {
                topic: TOPIC_PRICES.into(),
            })?;

        let key = format!("price:{}", tick.symbol);
        self.conn
            .set_ex::<_, _, ()>(&key, &payload, PRICE_KEY_TTL_SECS)
            .await
            .change_context(DispatchError::Publish {
                topic: TOPIC_PRICES.into(),
            })?;
        Ok(())
    }

    pub async fn publish_alert(
        &mut self,
        alert: &TriggeredAlert,
    ) -> Result<(), Report<DispatchError>> {
        let payload = serde_json::to_string(alert).change_context(DispatchError::Publish {
            topic: TOPIC_ALERTS.into(),
        })?;
        self.conn
            .publish::<_, _, ()>(TOPIC_ALERTS, &payload)
            .await
            .change_context(DispatchError::Publish {
                topic: TOPIC_ALERTS.into(),
            })?;
        Ok(())
    }

    pub async fn rewrite_alert_index(
        &mut self,
        symbol: &str,
        alerts_json: &str,
    ) -> Result<(), Report<DispatchError>> {
        let key = format!("alerts:index:{symbol}");
        self.conn
            .set::<_, _, ()>(&key, alerts_json)
            .await
            .change_context(DispatchError::Publish { topic: key })?;
        Ok(())
    }

    /// Subscribe to `alert-updates`, forwarding raw JSON payloads into `tx`
    /// until the connection is dropped. Runs on its own dedicated
    /// connection since pub/sub connections cannot issue other commands.
    pub async fn subscribe_alert_updates(
        &self,
        tx: mpsc::Sender<AlertUpdateEvent>,
    ) -> Result<(), Report<DispatchError>> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .change_context(DispatchError::Subscribe {
                topic: TOPIC_ALERT_UPDATES.into(),
            })?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(TOPIC_ALERT_UPDATES)
            .await
            .change_context(DispatchError::Subscribe {
                topic: TOPIC_ALERT_UPDATES.into(),
            })?;

        let mut stream = pubsub.into_on_message();
        while let Some(msg) = futures::StreamExt::next(&mut stream).await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(error = %err, "alert-updates payload was not a string");
                    continue;
                }
            };
            match serde_json::from_str::<AlertUpdateEvent>(&payload) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "malformed alert-updates payload");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AlertUpdateEvent {
    Upsert {
        symbol: String,
        #[serde(rename = "alertId")]
        alert_id: uuid::Uuid,
        alert: crate::model::Alert,
    },
    Remove {
        symbol: String,
        #[serde(rename = "alertId")]
        alert_id: uuid::Uuid,
    },
}
