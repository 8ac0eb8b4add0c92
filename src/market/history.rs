use crate::market::types::{Kline, Trade};
use std::collections::VecDeque;

/// Closed-kline history keyed by open time. Commits replace an existing entry
/// with the same time, otherwise insert at sorted position so a late close
/// delivered out of order still lands where it belongs.
#[derive(Debug)]
pub struct KlineHistory {
    klines: VecDeque<Kline>,
    capacity: usize,
}

impl KlineHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            klines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.klines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.klines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kline> {
        self.klines.iter()
    }

    pub fn latest(&self) -> Option<&Kline> {
        self.klines.back()
    }

    pub fn clear(&mut self) {
        self.klines.clear();
    }

    /// Replaces the whole history from a bootstrap fetch. Input is re-sorted
    /// and clipped to capacity, keeping the newest entries.
    pub fn seed(&mut self, mut klines: Vec<Kline>) {
        klines.sort_unstable_by_key(|kline| kline.time);
        klines.dedup_by_key(|kline| kline.time);
        if klines.len() > self.capacity {
            let overflow = klines.len() - self.capacity;
            klines.drain(0..overflow);
        }
        self.klines = klines.into();
    }

    pub fn commit(&mut self, kline: Kline) {
        if let Some(existing) = self
            .klines
            .iter_mut()
            .find(|existing| existing.time == kline.time)
        {
            *existing = kline;
            return;
        }

        let position = self
            .klines
            .partition_point(|existing| existing.time < kline.time);
        if position == self.klines.len() {
            self.klines.push_back(kline);
        } else {
            self.klines.insert(position, kline);
        }

        if self.klines.len() > self.capacity {
            self.klines.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<Kline> {
        self.klines.iter().cloned().collect()
    }
}

/// Append-only recent-trade ring with FIFO eviction.
#[derive(Debug)]
pub struct TradeHistory {
    trades: VecDeque<Trade>,
    capacity: usize,
}

impl TradeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            trades: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter()
    }

    pub fn clear(&mut self) {
        self.trades.clear();
    }

    pub fn seed(&mut self, trades: Vec<Trade>) {
        self.trades = trades.into();
        while self.trades.len() > self.capacity {
            self.trades.pop_front();
        }
    }

    pub fn push(&mut self, trade: Trade) {
        self.trades.push_back(trade);
        if self.trades.len() > self.capacity {
            self.trades.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<Trade> {
        self.trades.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::TradeSide;

    fn closed_kline(time: i64, close: f64) -> Kline {
        Kline {
            time,
            close_time: time + 59_999,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            quote_volume: close,
            trade_count: 1,
            taker_buy_volume: 0.5,
            taker_buy_quote_volume: close / 2.0,
            is_closed: true,
        }
    }

    fn trade(id: u64) -> Trade {
        Trade {
            id,
            time: id as i64,
            price: 100.0,
            quantity: 1.0,
            quote_volume: 100.0,
            side: TradeSide::Buy,
        }
    }

    #[test]
    fn commit_is_idempotent_for_same_open_time() {
        let mut history = KlineHistory::new(500);
        history.commit(closed_kline(60_000, 100.0));
        history.commit(closed_kline(60_000, 100.0));

        assert_eq!(history.len(), 1);
    }

    #[test]
    fn commit_replaces_entry_with_matching_time() {
        let mut history = KlineHistory::new(500);
        history.commit(closed_kline(60_000, 100.0));
        history.commit(closed_kline(60_000, 105.0));

        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().map(|kline| kline.close), Some(105.0));
    }

    #[test]
    fn commit_evicts_oldest_past_capacity() {
        let mut history = KlineHistory::new(500);
        for step in 0..501 {
            history.commit(closed_kline(step * 60_000, 100.0));
        }

        assert_eq!(history.len(), 500);
        assert_eq!(history.iter().next().map(|kline| kline.time), Some(60_000));
    }

    #[test]
    fn out_of_order_commit_lands_at_sorted_position() {
        let mut history = KlineHistory::new(500);
        history.commit(closed_kline(60_000, 1.0));
        history.commit(closed_kline(180_000, 3.0));
        history.commit(closed_kline(120_000, 2.0));

        let times: Vec<i64> = history.iter().map(|kline| kline.time).collect();
        assert_eq!(times, vec![60_000, 120_000, 180_000]);
    }

    #[test]
    fn seed_sorts_dedups_and_clips_to_capacity() {
        let mut history = KlineHistory::new(3);
        history.seed(vec![
            closed_kline(240_000, 4.0),
            closed_kline(60_000, 1.0),
            closed_kline(120_000, 2.0),
            closed_kline(120_000, 2.5),
            closed_kline(180_000, 3.0),
        ]);

        let times: Vec<i64> = history.iter().map(|kline| kline.time).collect();
        assert_eq!(times, vec![120_000, 180_000, 240_000]);
    }

    #[test]
    fn trade_ring_evicts_exactly_the_oldest() {
        let mut history = TradeHistory::new(100);
        for id in 0..101 {
            history.push(trade(id));
        }

        assert_eq!(history.len(), 100);
        assert_eq!(history.iter().next().map(|trade| trade.id), Some(1));
        assert_eq!(history.iter().last().map(|trade| trade.id), Some(100));
    }
}
