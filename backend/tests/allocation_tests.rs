//! Inventory allocation tests
//!
//! Tests for materializing deliveries including:
//! - Allocation ratio against the order total
//! - Movements only for stock-moving modes
//! - Stock derivation from the movement log

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    allocation_ratio, derive_stock, plan_allocation, round_currency, AllocationMethod,
    DeliveryMode, ItemQuantity, MovementType, PurchaseOrderItem,
};
use std::str::FromStr;
use uuid::Uuid;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn item(quantity: &str, unit_price: &str) -> PurchaseOrderItem {
    let quantity = dec(quantity);
    let unit_price = dec(unit_price);
    PurchaseOrderItem {
        id: Uuid::new_v4(),
        order_id: Uuid::nil(),
        product_id: Uuid::new_v4(),
        quantity,
        unit_price,
        total_amount: quantity * unit_price,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// A 40% delivery allocates 40% of every line
    #[test]
    fn test_ratio_allocation() {
        let items = vec![item("10", "600"), item("8", "500")];
        let plan = plan_allocation(dec("10000"), &items, dec("4000"), DeliveryMode::AmountOnly, &[]);

        assert_eq!(plan.ratio, dec("0.4"));
        assert_eq!(plan.allocations.len(), 2);
        assert_eq!(plan.allocations[0].allocated_amount, dec("2400"));
        assert_eq!(plan.allocations[1].allocated_amount, dec("1600"));
        assert!(plan
            .allocations
            .iter()
            .all(|a| a.method == AllocationMethod::Ratio));
        assert!(plan.movements.is_empty());
    }

    /// Quantities become `in` movements priced at the item's unit price
    #[test]
    fn test_quantity_delivery_moves_stock() {
        let items = vec![item("10", "600"), item("8", "500")];
        let quantities = vec![ItemQuantity {
            item_id: items[1].id,
            quantity: dec("3"),
        }];
        let plan = plan_allocation(
            dec("10000"),
            &items,
            dec("1500"),
            DeliveryMode::AmountAndQuantity,
            &quantities,
        );

        assert_eq!(plan.movements.len(), 1);
        let movement = &plan.movements[0];
        assert_eq!(movement.order_item_id, items[1].id);
        assert_eq!(movement.movement_type, MovementType::In);
        assert_eq!(movement.total_amount, dec("1500"));
        assert_eq!(plan.stock_deltas().get(&items[1].product_id), Some(&dec("3")));
    }

    /// Zero or non-positive order totals give a zero ratio
    #[test]
    fn test_ratio_with_zero_total() {
        assert_eq!(allocation_ratio(dec("100"), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(allocation_ratio(dec("100"), dec("-5")), Decimal::ZERO);
    }

    /// Stock is the signed sum of movements
    #[test]
    fn test_stock_from_movements() {
        let movements = vec![
            (MovementType::In, dec("10")),
            (MovementType::In, dec("5")),
            (MovementType::In, dec("2")),
            (MovementType::Out, dec("4")),
        ];
        assert_eq!(derive_stock(movements), dec("13"));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn line_strategy() -> impl Strategy<Value = (u32, u32)> {
        (1u32..100, 1u32..10_000)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Allocated amounts add up to the delivery within half a unit per line
        #[test]
        fn prop_allocations_sum_to_delivery(
            lines in prop::collection::vec(line_strategy(), 1..8),
            percent in 1u32..=100
        ) {
            let items: Vec<PurchaseOrderItem> = lines
                .iter()
                .map(|(q, p)| item(&q.to_string(), &p.to_string()))
                .collect();
            let total: Decimal = items.iter().map(|i| i.total_amount).sum();
            let delivery = round_currency(total * Decimal::from(percent) / Decimal::from(100));

            let plan = plan_allocation(total, &items, delivery, DeliveryMode::AmountOnly, &[]);
            let allocated: Decimal = plan.allocations.iter().map(|a| a.allocated_amount).sum();
            let tolerance = Decimal::new(5, 1) * Decimal::from(items.len() as u32);

            prop_assert!((allocated - delivery).abs() <= tolerance);
            prop_assert_eq!(plan.allocations.len(), items.len());
        }

        /// Amount-only deliveries never touch stock
        #[test]
        fn prop_amount_only_has_no_movements(
            lines in prop::collection::vec(line_strategy(), 1..8),
            amount in 1i64..1_000_000
        ) {
            let items: Vec<PurchaseOrderItem> = lines
                .iter()
                .map(|(q, p)| item(&q.to_string(), &p.to_string()))
                .collect();
            let quantities: Vec<ItemQuantity> = items
                .iter()
                .map(|i| ItemQuantity { item_id: i.id, quantity: Decimal::ONE })
                .collect();
            let total: Decimal = items.iter().map(|i| i.total_amount).sum();

            let plan = plan_allocation(
                total,
                &items,
                Decimal::from(amount),
                DeliveryMode::AmountOnly,
                &quantities,
            );
            prop_assert!(plan.movements.is_empty());
            prop_assert!(plan.stock_deltas().is_empty());
        }

        /// Stock deltas equal the requested quantities per product
        #[test]
        fn prop_stock_deltas_match_quantities(
            lines in prop::collection::vec(line_strategy(), 1..8)
        ) {
            let items: Vec<PurchaseOrderItem> = lines
                .iter()
                .map(|(q, p)| item(&q.to_string(), &p.to_string()))
                .collect();
            let quantities: Vec<ItemQuantity> = items
                .iter()
                .map(|i| ItemQuantity { item_id: i.id, quantity: i.quantity })
                .collect();
            let total: Decimal = items.iter().map(|i| i.total_amount).sum();

            let plan = plan_allocation(total, &items, total, DeliveryMode::Full, &quantities);
            let deltas = plan.stock_deltas();
            for i in &items {
                prop_assert_eq!(deltas.get(&i.product_id), Some(&i.quantity));
            }
            prop_assert_eq!(plan.ratio, Decimal::ONE);
        }

        /// Stock derivation is order-independent
        #[test]
        fn prop_stock_derivation_order_independent(
            movements in prop::collection::vec((any::<bool>(), 1u32..1000), 0..20)
        ) {
            let log: Vec<(MovementType, Decimal)> = movements
                .iter()
                .map(|(is_in, q)| {
                    let dir = if *is_in { MovementType::In } else { MovementType::Out };
                    (dir, Decimal::from(*q))
                })
                .collect();
            let mut reversed = log.clone();
            reversed.reverse();

            prop_assert_eq!(derive_stock(log), derive_stock(reversed));
        }
    }
}
