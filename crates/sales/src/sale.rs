use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use watchstore_core::{DomainError, DomainResult, EmployeeId, Entity, ProductId, SaleId};

/// One product line of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleLineItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A recorded sale. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: SaleId,
    pub employee_id: EmployeeId,
    pub items: Vec<SaleLineItem>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Sale {
    type Id = SaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for recording a sale (as received from the request layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSale {
    pub items: Vec<SaleLineItem>,
}

impl NewSale {
    /// Validate and build the sale record.
    ///
    /// Requires at least one line item and a quantity of at least 1 per line.
    pub fn into_sale(
        self,
        id: SaleId,
        employee_id: EmployeeId,
        now: DateTime<Utc>,
    ) -> DomainResult<Sale> {
        validate_lines(&self.items)?;

        Ok(Sale {
            id,
            employee_id,
            items: self.items,
            created_at: now,
        })
    }
}

fn validate_lines(items: &[SaleLineItem]) -> DomainResult<()> {
    if items.is_empty() {
        return Err(DomainError::validation("a sale needs at least one line item"));
    }
    if let Some(line_no) = items.iter().position(|i| i.quantity == 0) {
        return Err(DomainError::validation(format!(
            "line {line_no}: quantity must be at least 1"
        )));
    }
    Ok(())
}

/// Payload of the `sale.created` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleCreatedPayload {
    pub sale_id: SaleId,
    pub employee_id: EmployeeId,
    pub products: Vec<SaleLineItem>,
}

impl SaleCreatedPayload {
    /// Same line rules as [`NewSale::into_sale`], for payloads read off a queue.
    pub fn validate(&self) -> DomainResult<()> {
        validate_lines(&self.products)
    }
}

impl From<&Sale> for SaleCreatedPayload {
    fn from(sale: &Sale) -> Self {
        Self {
            sale_id: sale.id,
            employee_id: sale.employee_id,
            products: sale.items.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-14T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn line(quantity: u32) -> SaleLineItem {
        SaleLineItem {
            product_id: ProductId::new(),
            quantity,
        }
    }

    #[test]
    fn builds_sale_preserving_line_order() {
        let items = vec![line(2), line(1)];
        let sale = NewSale {
            items: items.clone(),
        }
        .into_sale(SaleId::new(), EmployeeId::new(), test_time())
        .unwrap();
        assert_eq!(sale.items, items);
    }

    #[test]
    fn rejects_empty_sale() {
        let err = NewSale { items: vec![] }
            .into_sale(SaleId::new(), EmployeeId::new(), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_zero_quantity_line() {
        let err = NewSale {
            items: vec![line(1), line(0)],
        }
        .into_sale(SaleId::new(), EmployeeId::new(), test_time())
        .unwrap_err();
        assert_eq!(
            err,
            DomainError::validation("line 1: quantity must be at least 1")
        );
    }

    #[test]
    fn payload_with_zero_quantity_is_invalid() {
        let payload = SaleCreatedPayload {
            sale_id: SaleId::new(),
            employee_id: EmployeeId::new(),
            products: vec![line(2), line(0)],
        };
        assert_eq!(
            payload.validate().unwrap_err(),
            DomainError::validation("line 1: quantity must be at least 1")
        );

        let empty = SaleCreatedPayload {
            products: Vec::new(),
            ..payload
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn payload_wire_shape() {
        let sale_id = SaleId::new();
        let employee_id = EmployeeId::new();
        let item = line(2);
        let sale = Sale {
            id: sale_id,
            employee_id,
            items: vec![item],
            created_at: test_time(),
        };

        let json = serde_json::to_value(SaleCreatedPayload::from(&sale)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "saleId": sale_id.to_string(),
                "employeeId": employee_id.to_string(),
                "products": [{ "productId": item.product_id.to_string(), "quantity": 2 }]
            })
        );
    }

    #[test]
    fn payload_rejects_negative_quantity() {
        let body = serde_json::json!({
            "saleId": SaleId::new().to_string(),
            "employeeId": EmployeeId::new().to_string(),
            "products": [{ "productId": ProductId::new().to_string(), "quantity": -1 }]
        });
        assert!(serde_json::from_value::<SaleCreatedPayload>(body).is_err());
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: any non-empty list of positive quantities is accepted unchanged.
            #[test]
            fn positive_lines_are_accepted(
                quantities in prop::collection::vec(1u32..1_000, 1..20)
            ) {
                let items: Vec<_> = quantities.iter().map(|q| line(*q)).collect();
                let sale = NewSale { items: items.clone() }
                    .into_sale(SaleId::new(), EmployeeId::new(), test_time())
                    .unwrap();
                prop_assert_eq!(sale.items, items);
            }
        }
    }
}
