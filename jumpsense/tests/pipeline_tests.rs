//! End-to-end processing: recordings in, jump records and labels out

mod helpers;

use helpers::{jump_sequence, single_jump_session, success_corpus, write_movella_csv, JumpShape, StreamBuilder};
use jumpsense::annotation::{apply_labels, AnnotationBatch, LabelAssignment, SegmentCorpus};
use jumpsense::export::{JsonLinesSink, JumpSink, MemorySink};
use jumpsense::pipeline::ReviewReason;
use jumpsense::recording::{RecordingOptions, RecordingReader};
use jumpsense::types::{SensorId, SessionId};
use jumpsense::{
    train, ArtifactStore, JumpPipeline, JumpRecord, JumpType, LandingOutcome, ModelType, Session, SuccessClassifier,
    TrainingConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[test]
fn test_unclassified_records_carry_timing_and_features() {
    let session = single_jump_session(&JumpShape::rotating(2.0, 0.5));
    let output = JumpPipeline::default().process_session(&session).unwrap();

    assert_eq!(output.session_id, session.id());
    assert_eq!(output.records.len(), 1);
    let record = &output.records[0];

    assert!((record.start_s - 2.0).abs() <= 0.01);
    assert!((record.air_time_s - 0.5).abs() <= 0.01);
    assert_eq!(record.video_time, "00:02");
    assert!(record.jump_type.is_none() && record.success.is_none());
    assert!(record.declared_revolutions.is_none());
    let revs = record.measured_revolutions.unwrap();
    assert!((revs - 2.0).abs() < 0.1, "measured {revs}");
    assert!(!record.review.needs_review());
}

#[test]
fn test_sessions_processed_in_parallel_keep_order() {
    let sessions: Vec<Session> = (1..=4)
        .map(|n| {
            let shapes = vec![JumpShape::default(); n];
            Session::from_samples(SessionId::new(), jump_sequence(0, &shapes, 2.0))
        })
        .collect();

    let results = JumpPipeline::default().process_sessions(&sessions);
    assert_eq!(results.len(), 4);
    for (n, (session, result)) in sessions.iter().zip(results).enumerate() {
        let output = result.unwrap();
        assert_eq!(output.session_id, session.id());
        assert_eq!(output.records.len(), n + 1);
        assert!(output.records.iter().all(|r| r.session_id == session.id()));
    }
}

#[test]
fn test_truncated_jump_goes_to_review() {
    let samples = StreamBuilder::new(0)
        .ground(1.0)
        .jump(&JumpShape {
            air_time_s: 0.4,
            impact_samples: 0,
            ..Default::default()
        })
        .build();
    let session = Session::from_samples(SessionId::new(), samples);
    let output = JumpPipeline::default().process_session(&session).unwrap();

    assert_eq!(output.records.len(), 1);
    match &output.records[0].review {
        jumpsense::ReviewOutcome::NeedsReview(reasons) => {
            assert!(reasons.contains(&ReviewReason::TruncatedSegment))
        }
        other => panic!("expected review, got {other:?}"),
    }
}

#[test]
fn test_trained_success_model_classifies_new_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    let artifact = train(
        &success_corpus(10),
        ModelType::Success,
        &TrainingConfig::default(),
        &CancellationToken::new(),
    )
    .unwrap();
    store.save(artifact).unwrap();

    let classifier = SuccessClassifier::new(Arc::new(store.load_latest(ModelType::Success).unwrap())).unwrap();
    let pipeline = JumpPipeline::default().with_success_classifier(classifier);

    let shapes = [JumpShape::rotating(2.0, 0.44), JumpShape::rotating(2.0, 0.44).fall()];
    let session = Session::from_samples(SessionId::new(), jump_sequence(0, &shapes, 2.0));
    let output = pipeline.process_session(&session).unwrap();

    let outcomes: Vec<LandingOutcome> = output.records.iter().map(|r| r.success.unwrap().label).collect();
    assert_eq!(outcomes, vec![LandingOutcome::Landed, LandingOutcome::Fall]);
    assert!(output
        .records
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.success.unwrap().confidence)));

    let mut sink = MemorySink::new();
    sink.write_all(&output.records).unwrap();
    assert_eq!(sink.records().len(), 2);
}

#[test]
fn test_csv_recording_with_counter_rollover() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollover.csv");
    let samples = StreamBuilder::new(0).ground(2.0).jump(&JumpShape::default()).ground(2.0).build();
    // Counter wraps one second into the recording
    write_movella_csv(&path, &samples, u32::MAX - 999_999).unwrap();

    let (session, report) = RecordingReader::default().read_path(&path).unwrap();
    assert_eq!(report.counter_wraps, 1);
    assert_eq!(report.rows_malformed, 0);
    assert_eq!(session.total_samples(), samples.len());

    let output = JumpPipeline::default().process_session(&session).unwrap();
    assert_eq!(output.records.len(), 1);
    assert!((output.records[0].start_s - 2.0).abs() <= 0.01);
    assert!((output.records[0].air_time_s - 0.5).abs() <= 0.01);
}

#[test]
fn test_csv_recording_trimmed_at_sync_point() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("synced.csv");
    let samples = StreamBuilder::new(0).ground(2.0).jump(&JumpShape::default()).ground(2.0).build();
    write_movella_csv(&path, &samples, 0).unwrap();

    let reader = RecordingReader::new(RecordingOptions {
        sensor_id: SensorId(7),
        sync_timestamp: Some(1_000_000),
        ..Default::default()
    });
    let (session, report) = reader.read_path(&path).unwrap();
    assert_eq!(report.rows_before_sync, 100);
    assert_eq!(session.stream(SensorId(7)).unwrap().len(), samples.len() - 100);

    // Session time starts at the sync point
    let output = JumpPipeline::default().process_session(&session).unwrap();
    assert_eq!(output.records.len(), 1);
    assert_eq!(output.records[0].sensor_id, SensorId(7));
    assert!((output.records[0].start_s - 1.0).abs() <= 0.01);
}

#[test]
fn test_annotation_round_trip_builds_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let batch_path = dir.path().join("batch.json");
    let corpus_path = dir.path().join("corpus.json");

    let shapes = [JumpShape::rotating(1.0, 0.35), JumpShape::rotating(2.0, 0.45)];
    let session = Session::from_samples(SessionId::new(), jump_sequence(0, &shapes, 2.0));
    let segments = JumpPipeline::default().detect(&session);
    assert!(segments.iter().all(|s| s.features.is_some()));

    AnnotationBatch::from_segments(&session, &segments).save(&batch_path).unwrap();
    let batch = AnnotationBatch::load(&batch_path).unwrap();
    assert_eq!(batch.items.len(), 2);
    assert!((batch.items[0].start_s - 1.0).abs() <= 0.01);

    let mut labeled: Vec<_> = batch.segments().cloned().collect();
    let assignments = vec![
        LabelAssignment {
            session_id: session.id(),
            sensor_id: SensorId(0),
            start_index: labeled[1].start_index,
            jump_type: Some(JumpType::Loop),
            success: Some(LandingOutcome::Landed),
        },
        LabelAssignment {
            session_id: session.id(),
            sensor_id: SensorId(0),
            start_index: 1,
            jump_type: Some(JumpType::Axel),
            success: None,
        },
    ];
    let report = apply_labels(&mut labeled, &assignments);
    assert_eq!(report.applied, 1);
    assert_eq!(report.unmatched, vec![assignments[1].clone()]);

    let corpus = SegmentCorpus::new(labeled);
    corpus.save(&corpus_path).unwrap();
    let reloaded = SegmentCorpus::load(&corpus_path).unwrap();
    let labeled: Vec<_> = reloaded.labeled().collect();
    assert_eq!(labeled.len(), 1);
    assert_eq!(labeled[0].labels.jump_type, Some(JumpType::Loop));
    assert_eq!(labeled[0].features, segments[1].features);
}

#[test]
fn test_records_exported_as_json_lines() {
    let session = Session::from_samples(
        SessionId::new(),
        jump_sequence(2, &[JumpShape::default(), JumpShape::default().fall()], 2.0),
    );
    let output = JumpPipeline::default().process_session(&session).unwrap();

    let mut sink = JsonLinesSink::new(Vec::new());
    sink.write_all(&output.records).unwrap();
    let text = String::from_utf8(sink.into_inner()).unwrap();

    let parsed: Vec<JumpRecord> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(parsed, output.records);
}
