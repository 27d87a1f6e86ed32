//! Attribution resolver: decides which referrer a customer belongs to.
//!
//! A customer has at most one link. A locked link is final: later codes are
//! ignored. When policy allows code changes before the first order, new
//! links start unlocked and may be overwritten until the first commissioned
//! order locks them; otherwise links are locked on creation.

use crate::{
    config::PolicyConfig,
    error::{LedgerError, LedgerResult},
    order::CustomerIdentity,
    referrer::{normalize_email, Referrer, ReferrerStatus},
    store::LedgerStore,
    types::{CustomerId, ReferrerId},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionLink {
    pub customer_id: CustomerId,
    pub email: String,
    pub referrer_id: ReferrerId,
    pub referral_code: String,
    pub attributed_at: DateTime<Utc>,
    pub locked: bool,
}

impl AttributionLink {
    /// Orders finalized more than `validity_days` after attribution earn nothing.
    pub fn is_within_validity(&self, at: DateTime<Utc>, validity_days: Option<u32>) -> bool {
        match validity_days {
            None => true,
            Some(days) => at <= self.attributed_at + Duration::days(days as i64),
        }
    }
}

/// How `resolve` changed the link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkChange {
    Created,
    Reassigned,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub referrer: Referrer,
    pub link: AttributionLink,
    pub change: LinkChange,
}

/// `resolve(code, customerIdentity) -> referrer`.
///
/// Runs inside the caller's transaction. Self-referral and invalid codes are
/// rejected before anything is written.
pub fn resolve(
    store: &LedgerStore,
    policy: &PolicyConfig,
    code: &str,
    customer: &CustomerIdentity,
    now: DateTime<Utc>,
) -> LedgerResult<Attribution> {
    let existing = store.attribution_for_customer(&customer.customer_id)?;

    if let Some(link) = &existing {
        if link.locked || !policy.allow_code_change_before_first_order {
            let referrer = store.require_referrer(&link.referrer_id)?;
            log::debug!(
                "Customer {} already attributed to {}; ignoring code {code}",
                customer.customer_id,
                link.referrer_id
            );
            return Ok(Attribution {
                referrer,
                link: link.clone(),
                change: LinkChange::Unchanged,
            });
        }
    }

    let code = code.trim().to_ascii_uppercase();
    let referrer = store
        .referrer_by_code(&code)?
        .filter(|r| r.status == ReferrerStatus::Active)
        .ok_or_else(|| LedgerError::InvalidCode { code: code.clone() })?;

    if policy.block_self_referral && referrer.owns_email(&customer.email) {
        return Err(LedgerError::SelfReferral {
            customer_id: customer.customer_id.clone(),
        });
    }

    let link = AttributionLink {
        customer_id: customer.customer_id.clone(),
        email: normalize_email(&customer.email),
        referrer_id: referrer.referrer_id.clone(),
        referral_code: code,
        attributed_at: now,
        locked: !policy.allow_code_change_before_first_order,
    };

    match existing {
        Some(previous) if previous.referrer_id == referrer.referrer_id => Ok(Attribution {
            referrer,
            link: previous,
            change: LinkChange::Unchanged,
        }),
        Some(previous) => {
            store.reassign_attribution(&link)?;
            store.adjust_referred_customers(&previous.referrer_id, -1)?;
            store.adjust_referred_customers(&link.referrer_id, 1)?;
            log::info!(
                "Customer {} reassigned from {} to {} before first order",
                link.customer_id,
                previous.referrer_id,
                link.referrer_id
            );
            let referrer = store.require_referrer(&link.referrer_id)?;
            Ok(Attribution {
                referrer,
                link,
                change: LinkChange::Reassigned,
            })
        }
        None => {
            store.insert_attribution(&link)?;
            store.adjust_referred_customers(&link.referrer_id, 1)?;
            log::info!(
                "Customer {} attributed to {} via code {}",
                link.customer_id,
                link.referrer_id,
                link.referral_code
            );
            let referrer = store.require_referrer(&link.referrer_id)?;
            Ok(Attribution {
                referrer,
                link,
                change: LinkChange::Created,
            })
        }
    }
}
