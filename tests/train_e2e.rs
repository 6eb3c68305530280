use chrono::{DateTime, Duration, TimeZone, Utc};

use lifeverse::{
    learn_influence_edges, learned_matrix_key, train_learned_matrix, CheckinRecord, EdgeLearnOptions, EdgeMethod,
    InfluenceMatrix, MetricId, MetricVector, Mulberry32, MultiverseConfig, NoHooks, ReferenceScoring,
    TrainerOptions, TrainingWindow, ValidationError, WeightsSource,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap()
}

fn options() -> TrainerOptions {
    TrainerOptions::new(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap())
}

/// `days` daily checkins where yesterday's energy drives today's focus.
fn energy_drives_focus(days: i64, seed: u32) -> Vec<CheckinRecord> {
    let mut rng = Mulberry32::new(seed);
    let mut prev_energy = 5.0;
    (0..days)
        .map(|i| {
            let energy = 5.0 + 3.0 * (2.0 * rng.next_unit() - 1.0);
            let focus = 5.0 + 0.8 * (prev_energy - 5.0) + 0.2 * (2.0 * rng.next_unit() - 1.0);
            prev_energy = energy;
            let values = MetricVector::default()
                .with(MetricId::Energy, energy)
                .with(MetricId::Focus, focus);
            CheckinRecord::new(start() + Duration::days(i), values)
        })
        .collect()
}

#[test]
fn lagged_energy_learns_positive_focus_edge() {
    let history = energy_drives_focus(90, 7);
    let learned = train_learned_matrix(&history, &MetricId::ALL, &options().lags(1)).unwrap();

    assert!(!learned.meta.insufficient_data);
    assert_eq!(learned.meta.trained_on_days, 90);
    assert_eq!(learned.meta.lags, 1);
    // Mean of the per-target picks from the alpha grid.
    assert!((0.1..=10.0).contains(&learned.meta.alpha));

    let edge = learned.weights.get(MetricId::Energy, MetricId::Focus);
    assert!(edge > 0.0, "energy -> focus should be positive, got {edge}");
    assert!(edge <= 1.0);
    for from in MetricId::ALL {
        if from != MetricId::Energy {
            assert!(learned.weights.get(from, MetricId::Focus).abs() < edge);
        }
    }
    assert!(learned.weights.max_abs() <= 1.0);
}

#[test]
fn training_is_deterministic() {
    let history = energy_drives_focus(75, 11);
    let a = train_learned_matrix(&history, &MetricId::ALL, &options()).unwrap();
    let b = train_learned_matrix(&history, &MetricId::ALL, &options()).unwrap();
    assert_eq!(a, b);

    // Input order does not matter: records are sorted by timestamp.
    let mut shuffled = history.clone();
    shuffled.reverse();
    let c = train_learned_matrix(&shuffled, &MetricId::ALL, &options()).unwrap();
    assert_eq!(a, c);
}

#[test]
fn short_history_returns_zero_matrix_with_note() {
    let history = energy_drives_focus(14, 3);
    let learned = train_learned_matrix(&history, &MetricId::ALL, &options().lags(2)).unwrap();
    assert!(learned.meta.insufficient_data);
    assert!(learned.weights.is_zero());
    assert_eq!(learned.stability.mean(), 0.0);
    assert!(learned.meta.note.contains("15"));

    let empty = train_learned_matrix(&[], &MetricId::ALL, &options()).unwrap();
    assert!(empty.meta.insufficient_data);
    assert_eq!(empty.meta.trained_on_days, 0);
}

#[test]
fn window_limits_trained_days() {
    let history = energy_drives_focus(90, 5);
    let learned = train_learned_matrix(&history, &MetricId::ALL, &options().window(TrainingWindow::Days(45))).unwrap();
    assert_eq!(learned.meta.trained_on_days, 45);

    let err = train_learned_matrix(&history, &MetricId::ALL, &options().window(TrainingWindow::Days(0))).unwrap_err();
    assert_eq!(err, ValidationError::EmptyTrainingWindow);
    let err = train_learned_matrix(&history, &MetricId::ALL, &options().lags(4)).unwrap_err();
    assert!(matches!(err, ValidationError::InvalidLagOrder { lags: 4 }));
}

#[test]
fn gaps_are_forward_filled() {
    // Every other day over 60 calendar days.
    let sparse: Vec<CheckinRecord> = energy_drives_focus(60, 9).into_iter().step_by(2).collect();
    let learned = train_learned_matrix(&sparse, &MetricId::ALL, &options()).unwrap();
    assert_eq!(learned.meta.trained_on_days, 59);
    assert!(!learned.meta.insufficient_data);
}

#[test]
fn stability_scores_are_bounded() {
    let history = energy_drives_focus(90, 21);
    let learned = train_learned_matrix(&history, &MetricId::ALL, &options().lags(1)).unwrap();
    for from in MetricId::ALL {
        for to in MetricId::ALL {
            let score = learned.stability.get(from, to);
            assert!((0.0..=1.0).contains(&score), "{from}->{to} = {score}");
        }
    }
    // Untouched metrics are constant: stable at zero.
    assert_eq!(learned.stability.get(MetricId::Health, MetricId::Mood), 1.0);
}

#[test]
fn subset_training_leaves_other_edges_unscored() {
    let metrics = [MetricId::Energy, MetricId::Focus];
    let learned = train_learned_matrix(&energy_drives_focus(90, 21), &metrics, &options().lags(1)).unwrap();
    for from in MetricId::ALL {
        for to in MetricId::ALL {
            if !(metrics.contains(&from) && metrics.contains(&to)) {
                assert_eq!(learned.stability.get(from, to), 0.0, "{from}->{to}");
                assert_eq!(learned.weights.get(from, to), 0.0, "{from}->{to}");
            }
        }
    }
    assert!(learned.stability.get(MetricId::Energy, MetricId::Focus) > 0.0);
}

#[test]
fn learned_matrix_feeds_a_simulation() {
    let learned = train_learned_matrix(&energy_drives_focus(90, 13), &MetricId::ALL, &options().lags(1)).unwrap();
    let manual = InfluenceMatrix::zeros().with_edge(MetricId::SleepHours, MetricId::Energy, 0.5);
    let config = MultiverseConfig::from_weights(
        MetricVector::default(),
        WeightsSource::Mixed,
        &manual,
        &learned.weights,
        0.5,
    )
    .unwrap()
    .stability(learned.stability.clone())
    .runs(200);

    let result = lifeverse::run_multiverse(&config, &ReferenceScoring, &NoHooks).unwrap();
    assert_eq!(result.audit.weights_source, WeightsSource::Mixed);
    assert_eq!(result.audit.mix, 0.5);
    assert_eq!(result.audit.runs_completed, 200);
}

#[test]
fn cache_key_tracks_inputs() {
    let key = learned_matrix_key(&MetricId::ALL, 90, 1);
    assert!(key.ends_with(":90:1"));
    assert_ne!(key, learned_matrix_key(&MetricId::ALL, 90, 2));
    assert_ne!(key, learned_matrix_key(&[MetricId::Energy, MetricId::Focus], 90, 1));
}

#[test]
fn edge_learners_pick_up_the_same_link() {
    let history = energy_drives_focus(60, 17);
    let metrics = [MetricId::Energy, MetricId::Focus];

    let baseline = learn_influence_edges(&history, &metrics, &EdgeLearnOptions::default()).unwrap();
    assert!(baseline.iter().all(|e| e.from != e.to));
    assert!(baseline.iter().all(|e| (-1.0..=1.0).contains(&e.weight)));

    let ridge = EdgeLearnOptions {
        method: EdgeMethod::AdvancedRidge,
        ..EdgeLearnOptions::default()
    };
    let advanced = learn_influence_edges(&history, &metrics, &ridge).unwrap();
    assert!(advanced.iter().all(|e| e.method == EdgeMethod::AdvancedRidge));

    let matrix = InfluenceMatrix::from_learned_edges(&baseline);
    assert_eq!(matrix.get(MetricId::Energy, MetricId::Energy), 0.0);

    let bad = EdgeLearnOptions {
        lags: vec![5],
        ..EdgeLearnOptions::default()
    };
    assert!(learn_influence_edges(&history, &metrics, &bad).is_err());
}
