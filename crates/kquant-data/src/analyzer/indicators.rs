//! 기술적 지표 계산 함수.
//!
//! 모든 함수는 오래된 값이 앞에 오는 슬라이스를 입력으로 받습니다.
//! 윈도우보다 데이터가 적으면 `None`을 반환합니다 (0이 아님).
//! RSI와 ATR은 Wilder 평활, EMA는 `α = 2/(period+1)`을 사용합니다.

use kquant_core::Candle;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// SMA (단순 이동평균) 계산.
pub fn sma(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let sum: Decimal = prices[prices.len() - period..].iter().sum();
    Some(sum / Decimal::from(period))
}

/// EMA (지수 이동평균) 계산. 초기값은 첫 period 구간의 SMA입니다.
pub fn ema(prices: &[Decimal], period: usize) -> Option<Decimal> {
    ema_series(prices, period).and_then(|series| series.last().copied())
}

/// EMA 시계열 계산 (MACD 시그널 라인용).
fn ema_series(prices: &[Decimal], period: usize) -> Option<Vec<Decimal>> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let multiplier = dec!(2) / Decimal::from(period + 1);
    let mut value = sma(&prices[..period], period)?;
    let mut series = vec![value];

    for &price in &prices[period..] {
        value = (price - value) * multiplier + value;
        series.push(value);
    }
    Some(series)
}

/// RSI (Wilder 평활) 계산. 결과는 0~100 범위입니다.
pub fn rsi(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let mut gains = Decimal::ZERO;
    let mut losses = Decimal::ZERO;

    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > Decimal::ZERO {
            gains += change;
        } else {
            losses += change.abs();
        }
    }

    let mut avg_gain = gains / Decimal::from(period);
    let mut avg_loss = losses / Decimal::from(period);

    // Wilder 평활로 나머지 구간 반영
    for i in (period + 1)..prices.len() {
        let change = prices[i] - prices[i - 1];
        let (gain, loss) = if change > Decimal::ZERO {
            (change, Decimal::ZERO)
        } else {
            (Decimal::ZERO, change.abs())
        };
        avg_gain = (avg_gain * Decimal::from(period - 1) + gain) / Decimal::from(period);
        avg_loss = (avg_loss * Decimal::from(period - 1) + loss) / Decimal::from(period);
    }

    if avg_loss.is_zero() {
        return Some(dec!(100));
    }

    let rs = avg_gain / avg_loss;
    Some(dec!(100) - (dec!(100) / (dec!(1) + rs)))
}

/// MACD 계산 결과.
#[derive(Debug, Clone)]
pub struct Macd {
    /// MACD 라인 (단기 EMA − 장기 EMA)
    pub macd: Decimal,
    /// 시그널 라인 (MACD의 EMA)
    pub signal: Decimal,
    /// 히스토그램 (MACD − 시그널)
    pub histogram: Decimal,
}

/// MACD (12/26/9 표준) 계산.
pub fn macd(prices: &[Decimal], short: usize, long: usize, signal_period: usize) -> Option<Macd> {
    if prices.len() < long + signal_period - 1 {
        return None;
    }

    let short_series = ema_series(prices, short)?;
    let long_series = ema_series(prices, long)?;

    // 두 시계열의 꼬리를 정렬해 MACD 라인 시계열 구성
    let offset = short_series.len() - long_series.len();
    let macd_line: Vec<Decimal> = long_series
        .iter()
        .enumerate()
        .map(|(i, &l)| short_series[i + offset] - l)
        .collect();

    let signal_series = ema_series(&macd_line, signal_period)?;
    let macd_value = *macd_line.last()?;
    let signal_value = *signal_series.last()?;

    Some(Macd {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
    })
}

/// 볼린저 밴드 계산 결과.
#[derive(Debug, Clone)]
pub struct Bollinger {
    /// 상단 밴드
    pub upper: Decimal,
    /// 중간선 (SMA)
    pub middle: Decimal,
    /// 하단 밴드
    pub lower: Decimal,
}

/// 볼린저 밴드 (기본 20/2) 계산.
pub fn bollinger(prices: &[Decimal], period: usize, std_mult: Decimal) -> Option<Bollinger> {
    if prices.len() < period {
        return None;
    }

    let middle = sma(prices, period)?;
    let window = &prices[prices.len() - period..];

    let variance: Decimal = window
        .iter()
        .map(|&p| {
            let diff = p - middle;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period);

    // rust_decimal에는 sqrt가 없어 f64 경유
    let std = variance
        .to_f64()
        .and_then(|v| Decimal::try_from(v.sqrt()).ok())?;
    let band = std * std_mult;

    Some(Bollinger {
        upper: middle + band,
        middle,
        lower: middle - band,
    })
}

/// 스토캐스틱 계산 결과.
#[derive(Debug, Clone)]
pub struct Stochastic {
    /// %K
    pub k: Decimal,
    /// %D (%K의 SMA)
    pub d: Decimal,
}

/// 스토캐스틱 (기본 14/3) 계산.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> Option<Stochastic> {
    if k_period == 0 || d_period == 0 || candles.len() < k_period + d_period - 1 {
        return None;
    }

    let k_at = |end: usize| -> Option<Decimal> {
        let window = &candles[end + 1 - k_period..=end];
        let highest = window.iter().map(|c| c.high).max()?;
        let lowest = window.iter().map(|c| c.low).min()?;
        let close = window.last()?.close;
        if highest == lowest {
            return Some(dec!(50));
        }
        Some((close - lowest) / (highest - lowest) * dec!(100))
    };

    let last = candles.len() - 1;
    let mut k_values = Vec::with_capacity(d_period);
    for i in (last + 1 - d_period)..=last {
        k_values.push(k_at(i)?);
    }

    let k = *k_values.last()?;
    let d = k_values.iter().sum::<Decimal>() / Decimal::from(d_period);
    Some(Stochastic { k, d })
}

/// ATR (Wilder 평활, 기본 14) 계산.
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_range = |i: usize| -> Decimal {
        let high_low = candles[i].high - candles[i].low;
        let prev_close = candles[i - 1].close;
        let high_close = (candles[i].high - prev_close).abs();
        let low_close = (candles[i].low - prev_close).abs();
        high_low.max(high_close).max(low_close)
    };

    // 첫 ATR은 첫 period개 TR의 평균
    let mut value = (1..=period).map(true_range).sum::<Decimal>() / Decimal::from(period);

    // Wilder 평활
    for i in (period + 1)..candles.len() {
        value = (value * Decimal::from(period - 1) + true_range(i)) / Decimal::from(period);
    }

    Some(value)
}
