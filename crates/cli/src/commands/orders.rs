//! Order reports.
//!
//! Orders stay `PENDING` when the customer abandons the hosted payment page.
//! Nothing cancels them automatically; this report lists them for follow-up.

use chrono::{DateTime, Duration, Utc};

use just_one_dollar_storefront::db::Repositories;
use just_one_dollar_storefront::models::Order;

use super::{CommandError, connect};

/// List pending orders created more than `older_than_hours` ago.
///
/// # Errors
///
/// Returns an error for a negative age or if the database query fails.
pub async fn stale(older_than_hours: i64) -> Result<(), CommandError> {
    let cutoff = cutoff(Utc::now(), older_than_hours)?;

    let pool = connect().await?;
    let repos = Repositories::postgres(&pool);

    let orders = repos.orders.list_stale_pending(cutoff).await?;
    tracing::info!(count = orders.len(), %cutoff, "Stale pending orders");

    #[allow(clippy::print_stdout)]
    for order in &orders {
        println!("{}", format_row(order));
    }

    Ok(())
}

fn cutoff(now: DateTime<Utc>, older_than_hours: i64) -> Result<DateTime<Utc>, CommandError> {
    if older_than_hours < 0 {
        return Err(CommandError::InvalidArgument(format!(
            "--older-than-hours must not be negative (got {older_than_hours})"
        )));
    }
    Duration::try_hours(older_than_hours)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| {
            CommandError::InvalidArgument(format!(
                "--older-than-hours is out of range (got {older_than_hours})"
            ))
        })
}

fn format_row(order: &Order) -> String {
    let session = order
        .payment
        .as_ref()
        .and_then(|p| p.gateway_session_id.as_deref())
        .unwrap_or("-");
    format!(
        "{}\t{}\tuser={}\ttotal={}\tsession={}",
        order.order_number,
        order.created_at.format("%Y-%m-%d %H:%M"),
        order.user_id,
        order.total,
        session
    )
}
