//! 포지션 장부.
//!
//! 정본 포지션 레코드를 소유합니다. 체결마다 평균단가/실현 손익을
//! 갱신하고, 시세마다 미실현 손익을 재계산하며, 변경 시마다
//! `position_updated`를 발행하고 캐시에 기록합니다. 수량 0 포지션은
//! 이력 보존을 위해 유예 기간 동안 유지한 뒤 정리할 수 있습니다.

use chrono::{Duration, Utc};
use kquant_bus::{Envelope, EventBus, Payload, Topic};
use kquant_cache::MarketStore;
use kquant_core::{Fill, KquantResult, Position, Price, Side, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 포지션 장부.
pub struct PositionBook {
    bus: Arc<EventBus>,
    store: Arc<dyn MarketStore>,
    positions: HashMap<Symbol, Position>,
}

impl PositionBook {
    /// 새 장부를 생성합니다.
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn MarketStore>) -> Self {
        Self {
            bus,
            store,
            positions: HashMap::new(),
        }
    }

    /// 체결을 반영하고 실현 손익(매도 시)을 반환합니다.
    pub async fn apply_fill(&mut self, fill: &Fill) -> KquantResult<Decimal> {
        let position = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::empty(fill.symbol.clone()));

        let realized = match fill.side {
            Side::Buy => {
                position.apply_buy(fill.qty, fill.price, fill.commission);
                Decimal::ZERO
            }
            Side::Sell => position.apply_sell(fill.qty, fill.price, fill.commission),
        };

        let snapshot = position.clone();
        self.store.set_position(&snapshot).await?;
        self.store.push_trade(fill).await?;
        self.publish(snapshot)?;
        Ok(realized)
    }

    /// 최신 시세로 보유 포지션의 미실현 손익을 재계산합니다.
    pub async fn mark(&mut self, symbol: &Symbol, price: Price) -> KquantResult<()> {
        let Some(position) = self.positions.get_mut(symbol) else {
            return Ok(());
        };
        if !position.is_open() {
            return Ok(());
        }

        position.mark(price);
        let snapshot = position.clone();
        self.store.set_position(&snapshot).await?;
        self.publish(snapshot)?;
        Ok(())
    }

    /// 포지션을 조회합니다.
    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// 보유 수량을 조회합니다.
    pub fn held_qty(&self, symbol: &Symbol) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.qty)
            .unwrap_or(Decimal::ZERO)
    }

    /// 모든 포지션의 읽기 전용 뷰.
    pub fn all(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// 유예 기간이 지난 수량 0 포지션을 정리합니다.
    pub fn sweep_closed(&mut self, grace: Duration) {
        let cutoff = Utc::now() - grace;
        self.positions
            .retain(|_, p| p.is_open() || p.last_updated > cutoff);
    }

    fn publish(&self, position: Position) -> KquantResult<()> {
        debug!(
            symbol = %position.symbol,
            qty = %position.qty,
            avg_cost = %position.avg_cost,
            realized = %position.realized_pnl,
            "Position updated"
        );
        self.bus.publish(Envelope::new(
            Topic::PositionUpdated,
            "order_engine",
            Payload::Position(position),
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_bus::Delivery;
    use kquant_cache::MemoryStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn symbol() -> Symbol {
        Symbol::canonicalize("005930").unwrap()
    }

    fn fill(side: Side, qty: Decimal, price: Decimal, commission: Decimal) -> Fill {
        Fill {
            fill_id: Uuid::new_v4().to_string(),
            order_id: Uuid::new_v4(),
            symbol: symbol(),
            side,
            qty,
            price,
            commission,
            ts: Utc::now(),
        }
    }

    fn book() -> (Arc<EventBus>, PositionBook) {
        let bus = Arc::new(EventBus::new(64));
        let store = Arc::new(MemoryStore::new());
        let book = PositionBook::new(Arc::clone(&bus), store);
        (bus, book)
    }

    #[tokio::test]
    async fn test_buy_then_sell_round_trip() {
        let (bus, mut book) = book();
        let mut subscription = bus.subscribe(Topic::PositionUpdated);

        book.apply_fill(&fill(Side::Buy, dec!(13), dec!(75100), dec!(169)))
            .await
            .unwrap();

        // avg_cost = 75,100 + 169/13
        let position = book.position(&symbol()).unwrap();
        assert_eq!(position.qty, dec!(13));
        assert_eq!(
            position.avg_cost,
            (dec!(75100) * dec!(13) + dec!(169)) / dec!(13)
        );

        let avg = position.avg_cost;
        let realized = book
            .apply_fill(&fill(Side::Sell, dec!(13), dec!(75500), dec!(2900)))
            .await
            .unwrap();
        assert_eq!(realized, (dec!(75500) - avg) * dec!(13) - dec!(2900));

        // 수량 0으로 복귀, 평균단가 초기화
        let position = book.position(&symbol()).unwrap();
        assert_eq!(position.qty, Decimal::ZERO);
        assert_eq!(position.avg_cost, Decimal::ZERO);
        assert_eq!(position.realized_pnl, realized);

        // 변경마다 position_updated 발행 (매수 1 + 매도 1)
        for _ in 0..2 {
            assert!(matches!(subscription.recv().await, Some(Delivery::Event(_))));
        }
    }

    #[tokio::test]
    async fn test_mark_updates_unrealized_and_publishes() {
        let (bus, mut book) = book();
        let mut subscription = bus.subscribe(Topic::PositionUpdated);

        book.apply_fill(&fill(Side::Buy, dec!(10), dec!(75000), dec!(0)))
            .await
            .unwrap();
        book.mark(&symbol(), dec!(75800)).await.unwrap();

        assert_eq!(book.position(&symbol()).unwrap().unrealized_pnl, dec!(8000));

        // 매수 + 마크 = 2회 발행
        for _ in 0..2 {
            assert!(matches!(subscription.recv().await, Some(Delivery::Event(_))));
        }

        // 미보유 종목 마크는 무시
        book.mark(&Symbol::canonicalize("000660").unwrap(), dec!(100000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_keeps_open_positions() {
        let (_bus, mut book) = book();

        book.apply_fill(&fill(Side::Buy, dec!(10), dec!(75000), dec!(0)))
            .await
            .unwrap();
        book.apply_fill(&fill(Side::Sell, dec!(10), dec!(75000), dec!(0)))
            .await
            .unwrap();

        // 유예 기간 내에는 닫힌 포지션도 유지
        book.sweep_closed(Duration::hours(1));
        assert!(book.position(&symbol()).is_some());

        // 유예 0이면 제거
        book.sweep_closed(Duration::zero());
        assert!(book.position(&symbol()).is_none());
    }
}
