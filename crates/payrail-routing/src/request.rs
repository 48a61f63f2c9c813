//! Routing requests and condition field resolution.

use chrono::{DateTime, Utc};
use payrail_domain::{
    AccountNumber, Currency, PaymentId, PaymentPriority, PaymentRequest, PaymentType,
    TenantContext,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a routing rule may condition on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingRequest {
    pub payment_id: PaymentId,
    pub tenant: TenantContext,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_type: PaymentType,
    pub source_account: AccountNumber,
    pub destination_account: AccountNumber,
    pub priority: PaymentPriority,
    pub created_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl RoutingRequest {
    pub fn from_payment(payment_id: PaymentId, request: &PaymentRequest) -> Self {
        Self {
            payment_id,
            tenant: request.tenant.clone(),
            amount: request.amount.amount(),
            currency: request.amount.currency().clone(),
            payment_type: request.payment_type,
            source_account: request.source_account.clone(),
            destination_account: request.destination_account.clone(),
            priority: request.priority,
            created_at: Utc::now(),
            metadata: request.metadata.clone(),
        }
    }

    /// Resolve a condition field by name. Canonical fields first, then the
    /// free-form metadata map (with or without the `metadata.` prefix).
    /// Unknown fields are null.
    pub fn field_value(&self, field_name: &str) -> Option<String> {
        match field_name {
            "amount" => Some(self.amount.to_string()),
            "currency" => Some(self.currency.to_string()),
            "paymentType" => Some(self.payment_type.as_str().to_string()),
            "sourceAccount" => Some(self.source_account.to_string()),
            "destinationAccount" => Some(self.destination_account.to_string()),
            "priority" => Some(self.priority.as_str().to_string()),
            "tenantId" => Some(self.tenant.tenant_id().to_string()),
            "businessUnit" => self.tenant.business_unit().map(str::to_string),
            other => {
                let key = other.strip_prefix("metadata.").unwrap_or(other);
                self.metadata.get(key).cloned()
            }
        }
    }
}
