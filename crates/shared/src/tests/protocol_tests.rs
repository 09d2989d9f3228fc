use super::*;
use crate::domain::{SetupStep, Settings};

#[test]
fn settings_decode_integer_flags() {
    let settings: Settings = serde_json::from_value(serde_json::json!({
        "threshold_low": 12,
        "threshold_high": 140,
        "threshold_last_low": 20,
        "threshold_last_high": 160,
        "islanding_padding": 3,
        "segments": 7,
        "extended_last_digit": 1,
        "shrink_last_3": 0,
        "rotated_180": 1,
        "max_flow_rate": 2.5
    }))
    .expect("decode settings");

    assert!(settings.extended_last_digit);
    assert!(!settings.shrink_last_3);
    assert!(settings.rotated_180);
    assert_eq!(settings.conf_threshold, None);
}

#[test]
fn only_one_counts_as_a_true_flag() {
    let entry: HistoryEntry = serde_json::from_value(serde_json::json!({
        "value": 1234,
        "timestamp": "2024-05-01T10:00:00",
        "manual": 2
    }))
    .expect("decode history entry");
    assert!(!entry.manual);
}

#[test]
fn settings_encode_flags_as_booleans() {
    let settings = Settings {
        extended_last_digit: true,
        ..Settings::default()
    };
    let body = serde_json::to_value(&settings).expect("encode");
    assert_eq!(body["extended_last_digit"], serde_json::json!(true));
    assert_eq!(body["rotated_180"], serde_json::json!(false));
    assert!(body.get("conf_threshold").is_none());
}

#[test]
fn reading_picks_highest_confidence_candidate() {
    let sample = DigitSample {
        processed_images: vec![],
        predictions: vec![
            vec![DigitCandidate("3".into(), 0.2), DigitCandidate("8".into(), 0.7)],
            vec![],
            vec![DigitCandidate("1".into(), 0.99)],
        ],
    };
    assert_eq!(sample.reading(), "8?1");
}

#[test]
fn sample_error_body_becomes_err() {
    let response: SampleResponse =
        serde_json::from_str(r#"{"error": "no picture stored"}"#).expect("decode");
    assert_eq!(response.into_sample(), Err("no picture stored".to_string()));
}

#[test]
fn null_reevaluate_result_means_no_bounding_box() {
    let response: ReevaluateResponse = serde_json::from_str(r#"{"result": null}"#).expect("decode");
    assert!(!response.bounding_box_found());
    let response: ReevaluateResponse = serde_json::from_str(r#"{"result": true}"#).expect("decode");
    assert!(response.bounding_box_found());
}

#[test]
fn evaluations_query_omits_missing_cursor() {
    let query = EvaluationsQuery {
        amount: 5,
        from_id: None,
    };
    let encoded = serde_json::to_value(&query).expect("encode");
    assert_eq!(encoded, serde_json::json!({ "amount": 5 }));
}

#[test]
fn setup_steps_only_advance_from_first_two() {
    assert_eq!(SetupStep::following(1), Some(SetupStep::Thresholds));
    assert_eq!(SetupStep::following(2), Some(SetupStep::Segmentation));
    assert_eq!(SetupStep::following(3), None);
    assert_eq!(SetupStep::following(0), None);
    assert_eq!(SetupStep::Segmentation.ordinal(), 3);
}
