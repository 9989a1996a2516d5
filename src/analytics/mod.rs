//! Usage/revenue aggregation.
//!
//! Batch rollup of the transaction log into one row per
//! (day, service, resource type): volumes, revenue, unique payers, success
//! rate, average response time. Rerunning a day overwrites its rows, so the
//! job is safe to repeat. Not on the request path; main runs it on an
//! interval.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::db::PaymentStore;
use crate::models::DailyUsageSummary;
use crate::types::{PaymentResult, TransactionStatus};
use crate::utils::round_usd;

pub struct UsageAggregator {
    store: Arc<dyn PaymentStore>,
}

#[derive(Default)]
struct Group {
    total: i64,
    confirmed: i64,
    revenue_usd: f64,
    payers: HashSet<String>,
    response_times: Vec<i32>,
}

impl UsageAggregator {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Roll up one UTC day and upsert the summaries. Returns the rows
    /// written.
    pub async fn aggregate_day(&self, day: NaiveDate) -> PaymentResult<Vec<DailyUsageSummary>> {
        let transactions = self.store.transactions_on(day).await?;

        let mut groups: HashMap<(String, String), Group> = HashMap::new();
        for tx in &transactions {
            let key = (
                tx.service_id.clone().unwrap_or_else(|| "-".to_string()),
                tx.resource_type.clone().unwrap_or_else(|| "other".to_string()),
            );
            let group = groups.entry(key).or_default();
            group.total += 1;
            if tx.status == TransactionStatus::Confirmed {
                group.confirmed += 1;
                group.revenue_usd = round_usd(group.revenue_usd + tx.reference_amount);
            }
            group.payers.insert(tx.payer_address.clone());
            if let Some(rt) = tx.response_time_ms {
                group.response_times.push(rt);
            }
        }

        let mut summaries: Vec<DailyUsageSummary> = groups
            .into_iter()
            .map(|((service_id, resource_type), group)| {
                let avg_response_time_ms = if group.response_times.is_empty() {
                    None
                } else {
                    Some(
                        group.response_times.iter().map(|&rt| rt as f64).sum::<f64>()
                            / group.response_times.len() as f64,
                    )
                };
                DailyUsageSummary {
                    day,
                    service_id,
                    resource_type,
                    total_transactions: group.total,
                    confirmed_transactions: group.confirmed,
                    total_revenue_usd: group.revenue_usd,
                    unique_payers: group.payers.len() as i64,
                    success_rate: group.confirmed as f64 / group.total as f64,
                    avg_response_time_ms,
                }
            })
            .collect();
        summaries.sort_by(|a, b| {
            (&a.service_id, &a.resource_type).cmp(&(&b.service_id, &b.resource_type))
        });

        for summary in &summaries {
            self.store.upsert_daily_summary(summary).await?;
        }

        info!(
            "aggregated {} transactions into {} summaries for {day}",
            transactions.len(),
            summaries.len()
        );
        Ok(summaries)
    }

    /// Re-aggregate the current day on a fixed interval.
    pub fn spawn_interval(self: Arc<Self>, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let day = Utc::now().date_naive();
                if let Err(e) = self.aggregate_day(day).await {
                    warn!("daily aggregation for {day} failed: {e}");
                }
            }
        })
    }
}
