use crate::models::{Bar, BucketSize};
use chrono::{DateTime, TimeZone, Utc};

pub const PRICE_EPSILON: f64 = 1e-6;

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Floors `timestamp` to the start of its bucket, counted from the Unix epoch.
pub fn bucket_floor(timestamp: DateTime<Utc>, bucket: BucketSize) -> DateTime<Utc> {
    let width = bucket.duration().num_seconds().max(1);
    let secs = timestamp.timestamp();
    let floored = secs - secs.rem_euclid(width);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(timestamp)
}

/// Merges time-sorted bars into coarser buckets.
///
/// Each output bar opens with the first input, closes with the last, and
/// carries the extreme high/low and summed volume of its bucket.
pub fn aggregate_bars(bars: &[Bar], bucket: BucketSize) -> Vec<Bar> {
    let mut result: Vec<Bar> = Vec::new();
    for bar in bars {
        let slot = bucket_floor(bar.timestamp, bucket);
        match result.last_mut() {
            Some(current) if current.timestamp == slot && current.symbol == bar.symbol => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
                current.volume += bar.volume;
            }
            _ => result.push(Bar {
                timestamp: slot,
                ..bar.clone()
            }),
        }
    }
    result
}

/// Pads a sparse series so every bucket in `[start, stop)` has a bar.
///
/// Gaps become flat, tradeless bars at the previous close; gaps before the
/// first real bar are zero bars. Input bars outside the range are dropped.
pub fn fill_sparse_bars(
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    bucket: BucketSize,
    bars: &[Bar],
) -> Vec<Bar> {
    let Some(first) = bars.first() else {
        return Vec::new();
    };
    let symbol = first.symbol.clone();
    let step = bucket.duration();

    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let mut pending = sorted.into_iter().peekable();

    let mut result = Vec::new();
    let mut previous_close = 0.0;
    let mut slot = bucket_floor(start, bucket);
    while slot < stop {
        let next_slot = slot + step;
        while pending.peek().map_or(false, |bar| bar.timestamp < slot) {
            pending.next();
        }
        match pending.peek() {
            Some(bar) if bar.timestamp < next_slot => {
                previous_close = bar.close;
                result.push(Bar {
                    timestamp: slot,
                    ..(*bar).clone()
                });
                pending.next();
                while pending.peek().map_or(false, |bar| bar.timestamp < next_slot) {
                    pending.next();
                }
            }
            _ => result.push(Bar {
                symbol: symbol.clone(),
                timestamp: slot,
                open: previous_close,
                high: previous_close,
                low: previous_close,
                close: previous_close,
                volume: 0,
            }),
        }
        slot = next_slot;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bar(minute: i64, close: f64, volume: u64) -> Bar {
        Bar {
            symbol: "AAA".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap()
                + Duration::minutes(minute),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
        }
    }

    #[test]
    fn aggregate_merges_into_aligned_buckets() {
        let bars = vec![bar(0, 10.0, 5), bar(1, 11.0, 5), bar(4, 9.0, 5), bar(5, 12.0, 1)];
        let merged = aggregate_bars(&bars, BucketSize::FiveMinutes);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].timestamp, bars[0].timestamp);
        assert_eq!(merged[0].open, 9.5);
        assert_eq!(merged[0].close, 9.0);
        assert_eq!(merged[0].high, 12.0);
        assert_eq!(merged[0].low, 8.0);
        assert_eq!(merged[0].volume, 15);
        assert_eq!(merged[1].timestamp, bars[3].timestamp);
    }

    #[test]
    fn fill_sparse_pads_with_previous_close() {
        let bars = vec![bar(1, 10.0, 5), bar(3, 11.0, 5)];
        let start = bars[0].timestamp - Duration::minutes(1);
        let stop = start + Duration::minutes(6);
        let filled = fill_sparse_bars(start, stop, BucketSize::Minute, &bars);

        assert_eq!(filled.len(), 6);
        assert!(filled[0].is_zero());
        assert_eq!(filled[1].close, 10.0);
        assert_eq!(filled[2].close, 10.0);
        assert!(filled[2].is_tradeless());
        assert_eq!(filled[3].close, 11.0);
        assert_eq!(filled[5].open, 11.0);
        assert_eq!(filled[5].volume, 0);
    }

    #[test]
    fn fill_sparse_of_nothing_is_nothing() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
        assert!(fill_sparse_bars(start, start + Duration::hours(1), BucketSize::Minute, &[])
            .is_empty());
    }
}
