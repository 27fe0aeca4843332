//! Common types used across the platform

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl Pagination {
    /// Clamp to sane bounds (page >= 1, 1 <= per_page <= 200)
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, 200),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.normalized().per_page)
    }

    pub fn offset(&self) -> i64 {
        let p = self.normalized();
        i64::from(p.page - 1) * i64::from(p.per_page)
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn new(pagination: &Pagination, total_items: u64) -> Self {
        let p = pagination.normalized();
        let total_pages = total_items.div_ceil(u64::from(p.per_page)) as u32;
        Self {
            page: p.page,
            per_page: p.per_page,
            total_items,
            total_pages,
        }
    }
}

/// Round a currency amount to whole units, half away from zero
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// True when `a` and `b` differ by at most `tolerance`
pub fn within_tolerance(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_currency_half_away_from_zero() {
        assert_eq!(round_currency(Decimal::new(25, 1)), Decimal::from(3));
        assert_eq!(round_currency(Decimal::new(24, 1)), Decimal::from(2));
        assert_eq!(round_currency(Decimal::new(-25, 1)), Decimal::from(-3));
    }

    #[test]
    fn test_pagination_offset() {
        let p = Pagination { page: 3, per_page: 10 };
        assert_eq!(p.offset(), 20);
        assert_eq!(p.limit(), 10);

        let zero = Pagination { page: 0, per_page: 0 };
        assert_eq!(zero.offset(), 0);
        assert_eq!(zero.limit(), 1);
    }

    #[test]
    fn test_pagination_meta_total_pages() {
        let meta = PaginationMeta::new(&Pagination::default(), 41);
        assert_eq!(meta.total_pages, 3);
        let empty = PaginationMeta::new(&Pagination::default(), 0);
        assert_eq!(empty.total_pages, 0);
    }
}
