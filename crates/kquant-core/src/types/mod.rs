//! 공용 기본 타입.

pub mod symbol;
pub mod timeframe;

pub use symbol::{Market, Symbol};
pub use timeframe::Timeframe;

use rust_decimal::Decimal;

/// 가격 타입 (KRW, 고정소수점).
pub type Price = Decimal;

/// 수량 타입 (주 단위, 고정소수점).
pub type Quantity = Decimal;
