use chrono::Duration;

use super::mock_data::{gapped_series, linear_series, observation, start};
use crate::data::ObservationSeries;
use crate::features::time::cyclical;
use crate::features::{FeatureConfig, FeatureDeriver, FeatureVector};

fn deriver() -> FeatureDeriver {
    FeatureDeriver::new(FeatureConfig::default()).unwrap()
}

fn field(deriver: &FeatureDeriver, vector: &FeatureVector, name: &str) -> f64 {
    let position = deriver.schema().position(name).unwrap();
    vector.values()[position]
}

#[test]
fn rederiving_is_bit_identical() {
    let deriver = deriver();
    let series = linear_series(72);

    let first: Vec<FeatureVector> = deriver.derive(&series).collect();
    let second: Vec<FeatureVector> = deriver.derive(&series).collect();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.timestamp(), b.timestamp());
        assert_eq!(a.missing(), b.missing());
        let a_bits: Vec<u64> = a.values().iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u64> = b.values().iter().map(|v| v.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }
}

#[test]
fn future_observations_do_not_change_past_vectors() {
    let deriver = deriver();
    let base: Vec<_> = (0..60).map(|h| observation(h, 50.0 + h as f64)).collect();
    let cutoff = 40;

    let mut altered = base.clone();
    for obs in altered.iter_mut().skip(cutoff + 1) {
        obs.index_value = 999.0;
        obs.temperature = -40.0;
    }
    let mut truncated = base.clone();
    truncated.truncate(cutoff + 1);

    let original = ObservationSeries::from_observations(base).unwrap();
    let altered = ObservationSeries::from_observations(altered).unwrap();
    let truncated = ObservationSeries::from_observations(truncated).unwrap();

    let reference: Vec<FeatureVector> = deriver.derive(&original).take(cutoff + 1).collect();
    for other in [&altered, &truncated] {
        let vectors: Vec<FeatureVector> = deriver.derive(other).take(cutoff + 1).collect();
        for (a, b) in reference.iter().zip(vectors.iter()) {
            let a_bits: Vec<u64> = a.values().iter().map(|v| v.to_bits()).collect();
            let b_bits: Vec<u64> = b.values().iter().map(|v| v.to_bits()).collect();
            assert_eq!(a_bits, b_bits, "vector at {} changed", a.timestamp());
        }
    }
}

#[test]
fn lags_and_rolling_mean_match_the_linear_series() {
    let deriver = deriver();
    let series = linear_series(120);
    let vectors: Vec<FeatureVector> = deriver.derive(&series).collect();

    for t in 1..120usize {
        let lag = field(&deriver, &vectors[t], "index_lag_1h");
        assert_eq!(lag, 50.0 + (t - 1) as f64);
    }
    for t in 24..120usize {
        let expected: f64 = ((t - 23)..=t).map(|i| 50.0 + i as f64).sum::<f64>() / 24.0;
        let mean = field(&deriver, &vectors[t], "index_rolling_mean_24h");
        assert!((mean - expected).abs() < 1e-9);
        assert!(vectors[t].is_complete());
    }
}

#[test]
fn hour_encoding_wraps_between_23_and_0() {
    let deriver = deriver();
    let series = linear_series(26);
    let vectors: Vec<FeatureVector> = deriver.derive(&series).collect();

    let encode = |vector: &FeatureVector| {
        (
            field(&deriver, vector, "hour_sin"),
            field(&deriver, vector, "hour_cos"),
        )
    };
    let h23 = encode(&vectors[23]);
    let h0 = encode(&vectors[24]);
    let step = {
        let a = cyclical(11.0, 24.0);
        let b = cyclical(12.0, 24.0);
        ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
    };
    let distance = ((h23.0 - h0.0).powi(2) + (h23.1 - h0.1).powi(2)).sqrt();
    assert!((distance - step).abs() < 1e-12);
    assert_eq!(field(&deriver, &vectors[23], "hour"), 23.0);
    assert_eq!(field(&deriver, &vectors[24], "hour"), 0.0);
}

#[test]
fn collection_gap_marks_spanning_rows_incomplete() {
    let deriver = deriver();
    let gap_start = 60;
    let gap_len = 5;
    let series = gapped_series(160, gap_start, gap_len);
    let vectors: Vec<FeatureVector> = deriver.derive(&series).collect();
    let resume = start() + Duration::hours(gap_start + gap_len);

    // first record after the gap sees one sample in its 6h window
    let first_after = vectors.iter().find(|v| v.timestamp() == resume).unwrap();
    assert!(!first_after.is_complete());
    let missing = first_after.missing_fields(deriver.schema());
    assert!(missing.contains(&"index_rolling_mean_6h"));
    assert!(missing.contains(&"index_lag_1h"));

    // a full day past the gap every window and lag is populated again
    let recovered = resume + Duration::hours(24);
    for vector in vectors.iter().filter(|v| v.timestamp() >= recovered) {
        assert!(vector.is_complete(), "{} should be complete", vector.timestamp());
    }

    // before the gap, once a day of history exists, nothing is missing
    let warm = start() + Duration::hours(24);
    let gap = start() + Duration::hours(gap_start);
    for vector in vectors
        .iter()
        .filter(|v| v.timestamp() >= warm && v.timestamp() < gap)
    {
        assert!(vector.is_complete());
    }
}

#[test]
fn gap_rows_are_kept_out_of_the_dataset() {
    use crate::dataset::{DatasetBuilder, DatasetConfig, SplitPolicy};
    use crate::features::window::required_samples;

    let deriver = deriver();
    let gap_start = 60;
    let gap_len = 5;
    let series = gapped_series(200, gap_start, gap_len);
    let vectors: Vec<FeatureVector> = deriver.derive(&series).collect();
    let builder = DatasetBuilder::new(DatasetConfig {
        horizon_hours: 1,
        split: SplitPolicy {
            test_fraction: 0.2,
            purge_target_overlap: false,
        },
        ..DatasetConfig::default()
    })
    .unwrap();
    let dataset = builder.build(&vectors, deriver.schema()).unwrap();
    let kept: Vec<_> = dataset
        .train()
        .timestamps()
        .iter()
        .chain(dataset.test().timestamps())
        .copied()
        .collect();

    let present = |t: i64, window: i64| {
        ((t - window + 1)..=t)
            .filter(|h| *h >= 0 && (*h < gap_start || *h >= gap_start + gap_len))
            .count()
    };
    for t in 24..200 {
        let thin_window = [6, 12, 24]
            .iter()
            .any(|&w| present(t, w) < required_samples(w as u32, 0.75));
        let timestamp = start() + Duration::hours(t);
        if thin_window {
            assert!(!kept.contains(&timestamp), "{t} should be excluded");
        }
    }

    let recovered = gap_start + gap_len + 24;
    for t in recovered..199 {
        let timestamp = start() + Duration::hours(t);
        assert!(kept.contains(&timestamp), "{t} should be kept");
    }
}
