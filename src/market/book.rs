use crate::market::types::{DepthDelta, PriceLevel};
use serde::Serialize;

pub const BOOK_DEPTH_CAP: usize = 20;
pub const IMBALANCE_DEPTH: usize = 10;
/// Levels farther than this fraction from the opposite side's best price are
/// treated as leftovers from missed deletion deltas and evicted.
pub const STALE_LEVEL_MAX_DISTANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookSide {
    Bids,
    Asks,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    imbalance: f64,
}

impl OrderBook {
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|level| level.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|level| level.price)
    }

    pub fn imbalance(&self) -> f64 {
        self.imbalance
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.imbalance = 0.0;
    }

    /// Replaces both sides from a REST depth snapshot.
    pub fn seed(&mut self, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) {
        self.bids = bids;
        self.asks = asks;
        normalize_side(&mut self.bids, BookSide::Bids, None);
        normalize_side(&mut self.asks, BookSide::Asks, None);
        self.imbalance = compute_imbalance(&self.bids, &self.asks);
    }

    /// Applies one incremental delta. Quantities are absolute per price level;
    /// zero quantity deletes the level. A side with no entries in the payload
    /// is left untouched.
    pub fn apply_delta(&mut self, delta: &DepthDelta) {
        if !delta.bids.is_empty() {
            let reference = self.best_ask();
            apply_side(&mut self.bids, &delta.bids);
            normalize_side(&mut self.bids, BookSide::Bids, reference);
        }

        if !delta.asks.is_empty() {
            let reference = self.best_bid();
            apply_side(&mut self.asks, &delta.asks);
            normalize_side(&mut self.asks, BookSide::Asks, reference);
        }

        self.imbalance = compute_imbalance(&self.bids, &self.asks);
    }
}

fn apply_side(levels: &mut Vec<PriceLevel>, updates: &[(f64, f64)]) {
    for &(price, quantity) in updates {
        if quantity == 0.0 {
            levels.retain(|level| level.price != price);
        } else if let Some(level) = levels.iter_mut().find(|level| level.price == price) {
            level.quantity = quantity;
        } else {
            levels.push(PriceLevel { price, quantity });
        }
    }
}

fn normalize_side(levels: &mut Vec<PriceLevel>, side: BookSide, reference_price: Option<f64>) {
    if let Some(reference) = reference_price.filter(|price| *price > 0.0) {
        levels.retain(|level| {
            let distance = match side {
                BookSide::Bids => (reference - level.price) / reference,
                BookSide::Asks => (level.price - reference) / reference,
            };
            distance <= STALE_LEVEL_MAX_DISTANCE
        });
    }

    match side {
        BookSide::Bids => levels.sort_unstable_by(|a, b| b.price.total_cmp(&a.price)),
        BookSide::Asks => levels.sort_unstable_by(|a, b| a.price.total_cmp(&b.price)),
    }
    levels.truncate(BOOK_DEPTH_CAP);
}

fn compute_imbalance(bids: &[PriceLevel], asks: &[PriceLevel]) -> f64 {
    let total_bid: f64 = bids
        .iter()
        .take(IMBALANCE_DEPTH)
        .map(|level| level.quantity)
        .sum();
    let total_ask: f64 = asks
        .iter()
        .take(IMBALANCE_DEPTH)
        .map(|level| level.quantity)
        .sum();

    let total = total_bid + total_ask;
    if total > 0.0 {
        (total_bid - total_ask) / total * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) -> DepthDelta {
        DepthDelta { bids, asks }
    }

    fn level(price: f64, quantity: f64) -> PriceLevel {
        PriceLevel { price, quantity }
    }

    #[test]
    fn applies_absolute_quantities_and_deletions() {
        let mut book = OrderBook::default();
        book.apply_delta(&delta(vec![(99.5, 2.0), (99.4, 1.0)], vec![(100.5, 1.5)]));
        book.apply_delta(&delta(vec![(99.5, 3.0), (99.4, 0.0)], vec![]));

        assert_eq!(book.bids().len(), 1);
        assert_eq!(book.bids()[0].quantity, 3.0);
        assert_eq!(book.asks().len(), 1);
    }

    #[test]
    fn zero_quantity_for_absent_price_is_noop() {
        let mut book = OrderBook::default();
        book.apply_delta(&delta(vec![(99.5, 2.0)], vec![]));
        book.apply_delta(&delta(vec![(42.0, 0.0)], vec![]));

        assert_eq!(book.bids().len(), 1);
        assert_eq!(book.bids()[0].price, 99.5);
    }

    #[test]
    fn empty_side_in_payload_leaves_side_untouched() {
        let mut book = OrderBook::default();
        book.apply_delta(&delta(vec![(99.5, 2.0)], vec![(100.5, 1.5)]));
        book.apply_delta(&delta(vec![(99.6, 1.0)], vec![]));

        assert_eq!(book.asks().len(), 1);
        assert_eq!(book.best_bid(), Some(99.6));
    }

    #[test]
    fn sides_stay_sorted_and_capped_after_any_sequence() {
        let mut book = OrderBook::default();
        for step in 0..40 {
            let price = 100.0 - step as f64 * 0.01;
            book.apply_delta(&delta(vec![(price, 1.0)], vec![(101.0 + step as f64 * 0.01, 1.0)]));
        }

        assert_eq!(book.bids().len(), BOOK_DEPTH_CAP);
        assert_eq!(book.asks().len(), BOOK_DEPTH_CAP);
        assert!(book
            .bids()
            .windows(2)
            .all(|pair| pair[0].price > pair[1].price));
        assert!(book
            .asks()
            .windows(2)
            .all(|pair| pair[0].price < pair[1].price));
        assert!(book.bids().iter().all(|level| level.quantity > 0.0));
    }

    #[test]
    fn stale_levels_far_from_opposite_best_are_evicted() {
        let mut book = OrderBook::default();
        book.seed(
            vec![level(100.0, 1.0), level(95.0, 1.0)],
            vec![level(100.5, 1.0)],
        );

        // 95.0 is more than 1% below the 100.5 best ask; the next bid update
        // sweeps it out even though its deletion delta never arrived.
        book.apply_delta(&delta(vec![(100.1, 2.0)], vec![]));

        assert!(book.bids().iter().all(|level| level.price > 99.0));
        assert_eq!(book.best_bid(), Some(100.1));
    }

    #[test]
    fn imbalance_is_zero_on_empty_book() {
        let book = OrderBook::default();
        assert_eq!(book.imbalance(), 0.0);
    }

    #[test]
    fn imbalance_is_zero_on_balanced_top_levels() {
        let mut book = OrderBook::default();
        book.apply_delta(&delta(vec![(99.5, 5.0)], vec![(100.5, 5.0)]));
        assert_eq!(book.imbalance(), 0.0);
    }

    #[test]
    fn imbalance_is_full_scale_with_only_bids() {
        let mut book = OrderBook::default();
        book.apply_delta(&delta(vec![(99.5, 5.0), (99.4, 2.0)], vec![]));
        assert_eq!(book.imbalance(), 100.0);
    }

    #[test]
    fn imbalance_uses_only_top_ten_levels() {
        let mut book = OrderBook::default();
        let bids: Vec<(f64, f64)> = (0..15).map(|i| (100.0 - i as f64 * 0.01, 1.0)).collect();
        let asks: Vec<(f64, f64)> = (0..10).map(|i| (100.5 + i as f64 * 0.01, 1.0)).collect();
        book.apply_delta(&delta(bids, asks));

        // 10 bid units vs 10 ask units once depth is clipped.
        assert_eq!(book.imbalance(), 0.0);
    }

    #[test]
    fn seed_replaces_existing_sides() {
        let mut book = OrderBook::default();
        book.apply_delta(&delta(vec![(99.5, 2.0)], vec![(100.5, 1.5)]));
        book.seed(vec![level(50.0, 1.0)], vec![level(50.5, 1.0)]);

        assert_eq!(book.best_bid(), Some(50.0));
        assert_eq!(book.best_ask(), Some(50.5));
    }
}
