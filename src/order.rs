//! Order domain types shared across intake, eligibility, backends, and the
//! workflow state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::IntakeError;

/// How an order is fulfilled — decides which backend adapter drives the
/// modification. Snapshotted onto the workflow at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentMethod {
    /// A human warehouse team coordinated over email.
    WarehouseEmail,
    /// A third-party logistics provider with a synchronous API.
    ThirdPartyLogisticsApi,
    /// The merchant ships orders themselves via the store platform.
    SelfFulfillment,
}

impl FulfillmentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WarehouseEmail => "warehouse_email",
            Self::ThirdPartyLogisticsApi => "third_party_logistics_api",
            Self::SelfFulfillment => "self_fulfillment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warehouse_email" => Some(Self::WarehouseEmail),
            "third_party_logistics_api" => Some(Self::ThirdPartyLogisticsApi),
            "self_fulfillment" => Some(Self::SelfFulfillment),
            _ => None,
        }
    }
}

impl std::fmt::Display for FulfillmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of order modification a customer is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Cancellation,
    AddressChange,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancellation => "cancellation",
            Self::AddressChange => "address_change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cancellation" => Some(Self::Cancellation),
            "address_change" => Some(Self::AddressChange),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shipping address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    /// Single-line rendering for emails and logs.
    pub fn one_line(&self) -> String {
        let mut parts = vec![self.line1.clone()];
        if let Some(ref line2) = self.line2 {
            parts.push(line2.clone());
        }
        parts.push(self.city.clone());
        if let Some(ref region) = self.region {
            parts.push(region.clone());
        }
        parts.push(self.postal_code.clone());
        parts.push(self.country.clone());
        parts.join(", ")
    }
}

/// Snapshot of the order a modification request targets.
///
/// Captured once at workflow creation so in-flight workflows are immune to
/// later changes in the order record or the merchant's settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_number: String,
    pub user_id: String,
    pub customer_email: String,
    pub placed_at: DateTime<Utc>,
    pub item_summary: String,
    pub total: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Address>,
}

/// The concrete change a backend is asked to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeRequest {
    Cancel,
    Readdress { new_address: Address },
}

impl ChangeRequest {
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Cancel => RequestType::Cancellation,
            Self::Readdress { .. } => RequestType::AddressChange,
        }
    }
}

/// Boundary for resolving an order number into an order snapshot.
///
/// Implemented by the store-platform client in production and by stubs in
/// tests and the operator test-workflow trigger.
#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn lookup(&self, order_number: &str) -> Result<Option<Order>, IntakeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfillment_method_roundtrip() {
        for method in [
            FulfillmentMethod::WarehouseEmail,
            FulfillmentMethod::ThirdPartyLogisticsApi,
            FulfillmentMethod::SelfFulfillment,
        ] {
            assert_eq!(FulfillmentMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(FulfillmentMethod::parse("carrier_pigeon"), None);
    }

    #[test]
    fn request_type_roundtrip() {
        assert_eq!(
            RequestType::parse("cancellation"),
            Some(RequestType::Cancellation)
        );
        assert_eq!(
            RequestType::parse("address_change"),
            Some(RequestType::AddressChange)
        );
        assert_eq!(RequestType::parse("refund"), None);
    }

    #[test]
    fn address_one_line_skips_missing_parts() {
        let addr = Address {
            line1: "1 Main St".into(),
            line2: None,
            city: "Springfield".into(),
            region: None,
            postal_code: "12345".into(),
            country: "US".into(),
        };
        assert_eq!(addr.one_line(), "1 Main St, Springfield, 12345, US");
    }

    #[test]
    fn change_request_maps_to_request_type() {
        assert_eq!(
            ChangeRequest::Cancel.request_type(),
            RequestType::Cancellation
        );
        let addr = Address {
            line1: "2 Oak Ave".into(),
            line2: None,
            city: "Portland".into(),
            region: Some("OR".into()),
            postal_code: "97201".into(),
            country: "US".into(),
        };
        assert_eq!(
            ChangeRequest::Readdress { new_address: addr }.request_type(),
            RequestType::AddressChange
        );
    }

    #[test]
    fn request_type_serde_snake_case() {
        let json = serde_json::to_string(&RequestType::AddressChange).unwrap();
        assert_eq!(json, "\"address_change\"");
    }
}
