//! Order fulfillment - turns an order-completed event into delivered keys.
//!
//! # Process
//!
//! 1. Walk the line items; every unit of quantity gets its own slot
//! 2. Allocate one key per slot through the allocation service
//! 3. Record shortages when a variant's pool runs dry and keep going
//! 4. Send one consolidated notification to the customer
//!
//! # Redelivery
//!
//! Events arrive at least once. Slot numbers are derived from the event
//! itself, so a redelivered event asks for the same `(order, variant, slot)`
//! triples and gets the same keys back as replays. Transient failures abort
//! the whole event and let the sender retry; nothing is marked as failed.

use std::collections::HashMap;

use crate::{
    error::AppError,
    models::{
        notification::{KeyNotification, NotifiedKey},
        order::{AssignedKey, FulfillmentReport, OrderCompletedEvent, Shortage},
    },
    notify::Notifier,
    services::allocation_service::{self, AllocationError, RetryPolicy},
    store::KeyStore,
};

/// Largest quantity accepted on one line item.
pub const MAX_UNITS_PER_LINE: u32 = 1000;

/// Process one order-completed event.
///
/// # Returns
///
/// A report with every key the order holds (new and replayed), the line
/// items that were short, and whether the notification went out.
///
/// # Errors
///
/// - `InvalidRequest`: missing order id or absurd quantity
/// - `AllocationContention` / `Database`: transient, the event should be redelivered
/// - `Notification`: keys are allocated but the customer wasn't told; redeliver
pub async fn fulfill_order<S, N>(
    store: &S,
    notifier: &N,
    policy: &RetryPolicy,
    event: &OrderCompletedEvent,
) -> Result<FulfillmentReport, AppError>
where
    S: KeyStore + ?Sized,
    N: Notifier + ?Sized,
{
    let order_id = event.order_id.trim();
    if order_id.is_empty() {
        return Err(AppError::InvalidRequest("order_id is required".to_string()));
    }

    if let Some(item) = event.items.iter().find(|i| i.quantity > MAX_UNITS_PER_LINE) {
        return Err(AppError::InvalidRequest(format!(
            "Line item quantity {} exceeds the limit of {MAX_UNITS_PER_LINE}",
            item.quantity
        )));
    }

    tracing::info!(order_id, items = event.items.len(), "Fulfilling order");

    // Next free slot per variant, so repeated lines for one variant don't collide
    let mut next_slot: HashMap<&str, i32> = HashMap::new();
    let mut keys = Vec::new();
    let mut shortages = Vec::new();

    for item in &event.items {
        let Some(variant_id) = item.variant_id.as_deref().map(str::trim).filter(|v| !v.is_empty())
        else {
            tracing::debug!(order_id, "Skipping line item without variant");
            continue;
        };

        if item.quantity == 0 {
            continue;
        }

        // Bounded by MAX_UNITS_PER_LINE, and by the event size overall
        let quantity = i32::try_from(item.quantity).map_err(|_| {
            AppError::InvalidRequest(format!("Invalid quantity {}", item.quantity))
        })?;
        let base = next_slot.entry(variant_id).or_insert(0);
        let first_slot = *base;
        *base = first_slot.saturating_add(quantity);

        let product_label = item.product_label();
        let mut allocated = 0u32;

        for unit in 0..quantity {
            let slot = first_slot.saturating_add(unit);

            match allocation_service::allocate_unit(store, policy, variant_id, order_id, slot).await
            {
                Ok(allocation) => {
                    let replayed = allocation.is_replay();
                    let key = allocation.into_key();
                    keys.push(AssignedKey {
                        key_id: key.id,
                        key_value: key.key_value,
                        variant_id: variant_id.to_string(),
                        order_slot: slot,
                        product_label: product_label.clone(),
                        replayed,
                    });
                    allocated += 1;
                }
                Err(AllocationError::NoKeyAvailable { .. }) => break,
                Err(e) => {
                    tracing::warn!(
                        order_id,
                        variant_id,
                        slot,
                        transient = e.is_transient(),
                        "Allocation failed, aborting fulfillment for redelivery: {}",
                        e
                    );
                    return Err(e.into());
                }
            }
        }

        if allocated < item.quantity {
            // Operational alert: the order is only partially fulfilled
            tracing::warn!(
                order_id,
                variant_id,
                requested = item.quantity,
                allocated,
                "Activation key pool exhausted, variant needs restock"
            );
            shortages.push(Shortage {
                variant_id: variant_id.to_string(),
                requested: item.quantity,
                allocated,
            });
        }
    }

    let notified = notify_customer(notifier, event, order_id, &keys).await?;

    Ok(FulfillmentReport {
        order_id: order_id.to_string(),
        keys,
        shortages,
        notified,
    })
}

/// Send the consolidated notification, or explain in the log why not.
async fn notify_customer<N>(
    notifier: &N,
    event: &OrderCompletedEvent,
    order_id: &str,
    keys: &[AssignedKey],
) -> Result<bool, AppError>
where
    N: Notifier + ?Sized,
{
    if keys.is_empty() {
        tracing::info!(order_id, "No activation keys to send for order");
        return Ok(false);
    }

    let Some(recipient) = event.recipient() else {
        tracing::warn!(
            order_id,
            keys = keys.len(),
            "Order has activation keys but no customer email"
        );
        return Ok(false);
    };

    let notification = KeyNotification {
        order_id: order_id.to_string(),
        recipient: recipient.to_string(),
        customer_name: event.customer_name().to_string(),
        keys: keys
            .iter()
            .map(|k| NotifiedKey {
                key_value: k.key_value.clone(),
                product_label: k.product_label.clone(),
            })
            .collect(),
    };

    notifier.send(&notification).await?;

    Ok(true)
}
