//! Pure sliding-window operations over a point's reading buffer.
//!
//! Buffers are ordered by timestamp ascending and bounded; a reading with an
//! already-present timestamp replaces the existing entry in place, which
//! makes buffer mutation idempotent under transport redelivery.

use crate::models::{DataSource, SensorReading};

/// Inserts or replaces `reading` in `buffer` by timestamp, then trims the
/// buffer to the most recent `max_size` entries.
pub fn upsert(buffer: &mut Vec<SensorReading>, reading: SensorReading, max_size: usize) {
    match buffer.binary_search_by(|existing| existing.timestamp.cmp(&reading.timestamp)) {
        Ok(index) => buffer[index] = reading,
        Err(index) => buffer.insert(index, reading),
    }
    trim(buffer, max_size);
}

/// Replaces the whole buffer with an authoritative batch, keeping only the
/// last `max_size` entries of the incoming data.
pub fn replace_window(
    buffer: &mut Vec<SensorReading>,
    mut batch: Vec<SensorReading>,
    max_size: usize,
) {
    batch.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    batch.dedup_by(|next, prev| next.timestamp == prev.timestamp);
    buffer.clear();
    buffer.extend(batch);
    trim(buffer, max_size);
}

/// Window size for a point given its current data-source classification.
/// Genuine live telemetry updates far more often than playback, so it gets
/// a 5x window.
pub fn window_limit(source: DataSource, base_window: usize, max_real_points: usize) -> usize {
    match source {
        DataSource::Realtime => max_real_points * 5,
        DataSource::Simulated | DataSource::Historical => base_window,
    }
}

fn trim(buffer: &mut Vec<SensorReading>, max_size: usize) {
    if buffer.len() > max_size {
        let excess = buffer.len() - max_size;
        buffer.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn reading(seconds: i64, temperature: f64) -> SensorReading {
        SensorReading {
            temperature,
            ..SensorReading::new("Punto 1", at(seconds))
        }
    }

    #[test]
    fn upsert_appends_in_timestamp_order() {
        let mut buffer = Vec::new();
        upsert(&mut buffer, reading(10, 20.0), 50);
        upsert(&mut buffer, reading(30, 21.0), 50);
        upsert(&mut buffer, reading(20, 22.0), 50);

        let stamps: Vec<_> = buffer.iter().map(|entry| entry.timestamp).collect();
        assert_eq!(stamps, vec![at(10), at(20), at(30)]);
    }

    #[test]
    fn upsert_is_idempotent_by_timestamp() {
        let mut once = Vec::new();
        upsert(&mut once, reading(10, 20.0), 50);

        let mut twice = Vec::new();
        upsert(&mut twice, reading(10, 20.0), 50);
        upsert(&mut twice, reading(10, 20.0), 50);

        assert_eq!(once, twice);
    }

    #[test]
    fn duplicate_timestamp_replaces_in_place() {
        let mut buffer = Vec::new();
        upsert(&mut buffer, reading(10, 20.0), 50);
        upsert(&mut buffer, reading(10, 35.0), 50);

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].temperature, 35.0);
    }

    #[test]
    fn window_bound_holds_and_keeps_most_recent() {
        let mut buffer = Vec::new();
        for second in 0..120 {
            upsert(&mut buffer, reading(second, 0.0), 50);
            assert!(buffer.len() <= 50);
        }
        assert_eq!(buffer.len(), 50);
        assert_eq!(buffer.first().unwrap().timestamp, at(70));
        assert_eq!(buffer.last().unwrap().timestamp, at(119));
    }

    #[test]
    fn replace_window_discards_prior_content() {
        let mut buffer = Vec::new();
        upsert(&mut buffer, reading(1, 1.0), 50);

        let batch: Vec<_> = (100..180).map(|second| reading(second, 2.0)).collect();
        replace_window(&mut buffer, batch, 50);

        assert_eq!(buffer.len(), 50);
        assert_eq!(buffer.first().unwrap().timestamp, at(130));
        assert_eq!(buffer.last().unwrap().timestamp, at(179));
    }

    #[test]
    fn replace_window_sorts_unordered_batches() {
        let mut buffer = Vec::new();
        replace_window(
            &mut buffer,
            vec![reading(30, 3.0), reading(10, 1.0), reading(20, 2.0)],
            50,
        );
        let stamps: Vec<_> = buffer.iter().map(|entry| entry.timestamp).collect();
        assert_eq!(stamps, vec![at(10), at(20), at(30)]);
    }

    #[test]
    fn live_tracks_get_the_larger_window() {
        assert_eq!(window_limit(DataSource::Realtime, 50, 50), 250);
        assert_eq!(window_limit(DataSource::Simulated, 50, 50), 50);
        assert_eq!(window_limit(DataSource::Historical, 50, 50), 50);
    }
}
