//! End-to-end tests: training protocol, artifact round trip and inference parity

use anyhow::Result;
use roadrisk_core::{
    load_incidents_csv, train_from_csv, train_pipeline, BinaryClassifier, IncidentRecord, LcgRng,
    ModelBundle, PipelineConfig, PipelineStage, RiskPredictor, RiskTier, NUMERIC_COLUMNS,
};

const DAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];
const ROADS: [&str; 4] = [
    "Single carriageway",
    "Dual carriageway",
    "Roundabout",
    "One way street",
];
const JUNCTIONS: [&str; 4] = [
    "Not at junction",
    "T or staggered junction",
    "Crossroads",
    "Roundabout",
];
const WEATHER: [&str; 6] = ["1", "2", "3", "5", "7", "8"];
const SURFACE: [&str; 4] = ["1", "2", "3", "4"];
const SPEEDS: [f64; 6] = [20.0, 30.0, 40.0, 50.0, 60.0, 70.0];

/// Incidents where night + high speed + bad conditions drive the fatal class ("1")
fn synthetic_incidents(n: usize, seed: u64) -> Vec<IncidentRecord> {
    let mut rng = LcgRng::new(seed);
    (0..n)
        .map(|i| {
            let hour = rng.next_index(24) as u32;
            let minute = rng.next_index(60);
            let speed = SPEEDS[rng.next_index(SPEEDS.len())];
            let weather = WEATHER[rng.next_index(WEATHER.len())];
            let surface = SURFACE[rng.next_index(SURFACE.len())];
            let night = hour >= 22 || hour <= 5;
            let light = if night {
                "Darkness - lights lit"
            } else {
                "Daylight"
            };

            let score = 2 * u32::from(night)
                + 2 * u32::from(speed >= 60.0)
                + u32::from(matches!(weather, "3" | "5" | "7"))
                + u32::from(matches!(surface, "3" | "4"));
            let fatal = score >= 4 || rng.next_unit() < 0.03;
            let label = if fatal {
                "1"
            } else if rng.next_unit() < 0.3 {
                "2"
            } else {
                "3"
            };

            IncidentRecord {
                date: format!("{:02}/{:02}/2022", 1 + i % 28, 1 + i % 12),
                time: format!("{hour:02}:{minute:02}"),
                day_of_week: Some(DAYS[i % 7].to_string()),
                road_type: Some(ROADS[rng.next_index(ROADS.len())].to_string()),
                weather_conditions: Some(weather.to_string()),
                light_conditions: Some(light.to_string()),
                road_surface_conditions: Some(surface.to_string()),
                junction_detail: Some(JUNCTIONS[rng.next_index(JUNCTIONS.len())].to_string()),
                speed_limit: Some(speed),
                number_of_vehicles: Some(1.0 + rng.next_index(3) as f64),
                number_of_casualties: Some(1.0 + rng.next_index(3) as f64),
                risk_level: Some(label.to_string()),
            }
        })
        .collect()
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.classifier.n_estimators = 30;
    config.classifier.max_depth = 4;
    config
}

#[test]
fn training_protocol_end_to_end() -> Result<()> {
    let records = synthetic_incidents(600, 11);
    let outcome = train_pipeline(&records, &fast_config())?;

    assert_eq!(outcome.train_rows + outcome.holdout_rows, records.len());
    assert_eq!(outcome.report.rows, outcome.holdout_rows);
    assert_eq!(outcome.bundle.positive_label(), "1");

    // Balancing only adds positives, up to floor(0.5 * negatives)
    assert_eq!(outcome.after_balance.other, outcome.before_balance.other);
    let target = outcome.before_balance.other / 2;
    assert_eq!(
        outcome.after_balance.high_risk,
        target.max(outcome.before_balance.high_risk)
    );

    let auc = outcome.report.roc_auc.expect("holdout has both classes");
    assert!(auc > 0.8, "auc = {auc}");
    assert!(outcome.report.accuracy > 0.7);
    assert_eq!(
        outcome.report.high_risk_recall,
        outcome.report.confusion.normalized[1][1]
    );
    assert_eq!(outcome.report.top_features.len(), 10);

    // Night and speed drive the fatal class, so the strongest correlations are positive
    assert_eq!(outcome.risk_correlations.len(), 5);
    assert!(outcome.risk_correlations[0].correlation > 0.3);
    assert!(outcome
        .risk_correlations
        .windows(2)
        .all(|w| w[0].correlation >= w[1].correlation));
    assert!(outcome
        .report
        .hourly_high_risk_rate
        .iter()
        .all(|h| h.hour < 24 && (0.0..=1.0).contains(&h.high_risk_rate)));
    Ok(())
}

#[test]
fn training_is_reproducible() -> Result<()> {
    let records = synthetic_incidents(400, 5);
    let a = train_pipeline(&records, &fast_config())?;
    let b = train_pipeline(&records, &fast_config())?;
    assert_eq!(a.bundle.classifier(), b.bundle.classifier());
    assert_eq!(a.bundle.pipeline(), b.bundle.pipeline());
    assert_eq!(a.report, b.report);
    Ok(())
}

#[test]
fn saved_bundle_scores_identically() -> Result<()> {
    let records = synthetic_incidents(400, 3);
    let outcome = train_pipeline(&records, &fast_config())?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bundle.json");
    outcome.bundle.save(&path)?;

    let batch = synthetic_incidents(50, 99);
    let in_memory = RiskPredictor::new(outcome.bundle.clone()).assess(&batch)?;
    let reloaded = RiskPredictor::from_path(&path)?.assess(&batch)?;
    assert_eq!(in_memory, reloaded);
    Ok(())
}

#[test]
fn holdout_matrix_matches_training_layout() -> Result<()> {
    let records = synthetic_incidents(400, 21);
    let outcome = train_pipeline(&records, &fast_config())?;
    let bundle = &outcome.bundle;
    let scaler_before = bundle.pipeline().scaler().clone();

    // A tiny batch with extreme values must not move any statistic
    let mut odd = synthetic_incidents(2, 1);
    odd[0].speed_limit = Some(500.0);
    odd[1].speed_limit = None;
    let scored = bundle.score(&odd, PipelineStage::Predict)?;

    assert_eq!(scored.matrix.feature_names, bundle.feature_names());
    assert_eq!(scored.matrix.n_features(), bundle.classifier().feature_count());
    assert_eq!(bundle.pipeline().scaler(), &scaler_before);

    // Missing speed takes the fit-time median, not the batch's
    let speed_col = bundle.feature_names().len() - NUMERIC_COLUMNS.len();
    let stats = bundle.pipeline().scaler();
    let expected = (stats.medians()[0] - stats.means()[0]) / stats.scale(0);
    assert!((scored.matrix.rows[1][speed_col] - expected).abs() < 1e-12);
    Ok(())
}

#[test]
fn unseen_and_missing_categories_are_tolerated() -> Result<()> {
    let records = synthetic_incidents(400, 8);
    let outcome = train_pipeline(&records, &fast_config())?;

    let mut batch = synthetic_incidents(1, 77);
    batch[0].junction_detail = Some("Spaceport".to_string());
    batch[0].weather_conditions = None;
    batch[0].speed_limit = Some(70.0);
    batch[0].time = "23:40".to_string();

    let predictor = RiskPredictor::new(outcome.bundle);
    let assessed = predictor.assess(&batch)?;
    assert_eq!(assessed.len(), 1);
    assert_eq!(assessed[0].warnings.len(), 1);
    assert_eq!(assessed[0].warnings[0].column, "junction_detail");
    assert_eq!(assessed[0].warnings[0].value, "Spaceport");
    assert!((0.0..=1.0).contains(&assessed[0].probability));
    if assessed[0].tier == RiskTier::High {
        assert!(assessed[0]
            .interventions
            .contains(&"Increase police patrols in the area".to_string()));
    }
    Ok(())
}

#[test]
fn csv_training_and_stage_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("incidents.csv");
    let mut writer = csv::Writer::from_path(&path)?;
    for record in synthetic_incidents(300, 13) {
        writer.serialize(record)?;
    }
    writer.flush()?;

    assert_eq!(load_incidents_csv(&path)?.len(), 300);
    let outcome = train_from_csv(&path, &fast_config())?;
    assert_eq!(outcome.train_rows + outcome.holdout_rows, 300);

    let missing = dir.path().join("missing.csv");
    let err = train_from_csv(&missing, &fast_config()).unwrap_err();
    assert_eq!(err.stage, PipelineStage::Load);

    let mut unlabeled = synthetic_incidents(100, 2);
    unlabeled[10].risk_level = None;
    let err = train_pipeline(&unlabeled, &fast_config()).unwrap_err();
    assert_eq!(err.stage, PipelineStage::Split);
    Ok(())
}

#[test]
fn too_few_high_risk_rows_fail_in_balance_stage() {
    let mut records = synthetic_incidents(300, 4);
    let mut kept = 0;
    for record in &mut records {
        if record.risk_level.as_deref() == Some("1") {
            kept += 1;
            if kept > 4 {
                record.risk_level = Some("3".to_string());
            }
        }
    }
    let mut config = fast_config();
    config.labels.positive_label = Some("1".to_string());

    let err = train_pipeline(&records, &config).unwrap_err();
    assert_eq!(err.stage, PipelineStage::Balance);
}

#[test]
fn tampered_bundle_is_rejected_on_load() -> Result<()> {
    let records = synthetic_incidents(300, 6);
    let outcome = train_pipeline(&records, &fast_config())?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bundle.json");
    outcome.bundle.save(&path)?;

    let content = std::fs::read_to_string(&path)?;
    std::fs::write(&path, content.replacen("\"hash\":\"", "\"hash\":\"00", 1))?;
    assert!(ModelBundle::load(&path).is_err());
    assert_eq!(
        RiskPredictor::from_path(&path).unwrap_err().stage,
        PipelineStage::Bundle
    );
    Ok(())
}
