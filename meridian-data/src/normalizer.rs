use crate::event::MarketEvent;

/// Maximum acceptable skew between an exchange's own timestamp and local arrival time
/// before it is treated as untrustworthy - spec `4.3 Normalizer/TimeFuser`.
const MAX_SKEW_MS: i64 = 5_000;

/// Fuses `exchange_timestamp` and `local_timestamp` into a single `unified_timestamp`.
///
/// `unified_timestamp = round((exchange_timestamp + local_timestamp) / 2)` when the
/// exchange timestamp looks sane (non-negative, within [`MAX_SKEW_MS`] of local time);
/// otherwise falls back to `local_timestamp` alone. An event is never dropped purely for
/// timestamp reasons - spec `4.3`, invariant `I2`.
pub fn fuse(mut event: MarketEvent) -> MarketEvent {
    event.unified_timestamp = unified_timestamp(event.exchange_timestamp, event.local_timestamp);
    event
}

fn unified_timestamp(exchange_timestamp: i64, local_timestamp: i64) -> i64 {
    if exchange_timestamp <= 0 || (exchange_timestamp - local_timestamp).abs() > MAX_SKEW_MS {
        return local_timestamp;
    }
    // Integer division rounds toward zero; adjust by half the divisor for round-half-up
    // on the (always non-negative, post-skew-check) sum.
    (exchange_timestamp + local_timestamp + 1) / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{MarketEventKind, Ticker};
    use meridian_instrument::{ExchangeId, Symbol};
    use rust_decimal::Decimal;

    fn ticker_event(exchange_timestamp: i64, local_timestamp: i64) -> MarketEvent {
        MarketEvent {
            exchange: ExchangeId::BinanceSpot,
            symbol: Symbol::new("BTC", "USDT"),
            exchange_timestamp,
            local_timestamp,
            unified_timestamp: 0,
            kind: MarketEventKind::Ticker(Ticker {
                last: Decimal::ZERO,
                bid: Decimal::ZERO,
                bid_size: Decimal::ZERO,
                ask: Decimal::ZERO,
                ask_size: Decimal::ZERO,
                open: Decimal::ZERO,
                high: Decimal::ZERO,
                low: Decimal::ZERO,
                volume: Decimal::ZERO,
                quote_volume: Decimal::ZERO,
                change: Decimal::ZERO,
                change_percent: Decimal::ZERO,
                funding_rate: None,
            }),
        }
    }

    #[test]
    fn averages_when_timestamps_agree() {
        let fused = fuse(ticker_event(1_000, 1_100));
        assert_eq!(fused.unified_timestamp, 1_050);
    }

    #[test]
    fn falls_back_to_local_on_excessive_skew() {
        let fused = fuse(ticker_event(1_000, 1_000 + MAX_SKEW_MS + 1));
        assert_eq!(fused.unified_timestamp, 1_000 + MAX_SKEW_MS + 1);
    }

    #[test]
    fn falls_back_to_local_on_non_positive_exchange_timestamp() {
        let fused = fuse(ticker_event(0, 5_000));
        assert_eq!(fused.unified_timestamp, 5_000);

        let fused_negative = fuse(ticker_event(-1, 5_000));
        assert_eq!(fused_negative.unified_timestamp, 5_000);
    }

    #[test]
    fn never_changes_anything_but_unified_timestamp() {
        let original = ticker_event(1_000, 1_000);
        let fused = fuse(original.clone());
        assert_eq!(fused.exchange, original.exchange);
        assert_eq!(fused.symbol, original.symbol);
        assert_eq!(fused.kind, original.kind);
    }
}
