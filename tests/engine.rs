//! Integration tests for the confluence engine.
//!
//! End-to-end scenarios through the public API: feed ingest, grouping,
//! verdicts, scores, findings, search and the trade gate.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use confluence::prelude::*;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()
}

fn signal(
    id: &str,
    instrument: &str,
    pattern: &str,
    tf: Timeframe,
    direction: Direction,
    confidence: f64,
    mins_ago: i64,
) -> PatternSignal {
    PatternSignal::new(id, instrument, pattern, tf, direction, confidence)
        .triggered_at(now() - Duration::minutes(mins_ago))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn engine_with(signals: Vec<PatternSignal>) -> ConfluenceEngine {
    EngineBuilder::new().seed(signals).build().unwrap()
}

// ============================================================
// SCENARIOS
// ============================================================

#[test]
fn scenario_a_strong_bullish_confluence() {
    let engine = engine_with(vec![
        signal("x-1h", "X", "HAMMER", Timeframe::H1, Direction::Bullish, 0.8, 10),
        signal("x-4h", "X", "BREAKOUT", Timeframe::H4, Direction::Bullish, 0.75, 20),
    ]);

    let report = engine.report("X", now()).unwrap();
    assert_eq!(report.verdict.kind, VerdictKind::Strong);
    assert_eq!(report.verdict.dominant, Direction::Bullish);
    assert_eq!(report.verdict.anchor, Some(Timeframe::H4));

    let expected = (100.0 * (0.8 * 5.0 + 0.75 * 7.0) / 12.0 * 1.0 + 4.0_f64).round() as u8;
    assert_eq!(report.score.get(), expected);
    assert_eq!(report.score.get(), 81);
}

#[test]
fn scenario_b_reversal_after_expired_daily() {
    let engine = engine_with(vec![
        signal("y-1d", "Y", "SHOOTING_STAR", Timeframe::D1, Direction::Bearish, 0.7, 60 * 48),
        signal("y-15m", "Y", "HAMMER", Timeframe::M15, Direction::Bullish, 0.65, 5),
    ]);

    let report = engine.report("Y", now()).unwrap();
    let codes: Vec<_> = report.narrative.iter().map(Finding::code).collect();
    assert_eq!(codes, vec!["REVERSAL_SUSPECTED", "EXPIRY_NOTE"]);

    match &report.narrative[0] {
        Finding::ReversalSuspected { from, to, .. } => {
            assert_eq!(*from, Direction::Bearish);
            assert_eq!(*to, Direction::Bullish);
        },
        other => panic!("unexpected finding {other:?}"),
    }
    match &report.narrative[1] {
        Finding::ExpiryNote { expired_count, expired } => {
            assert_eq!(*expired_count, 1);
            assert_eq!(expired[0].pattern_id, "y-1d");
        },
        other => panic!("unexpected finding {other:?}"),
    }
}

#[test]
fn scenario_c_unconfirmed_volume_never_trades() {
    let candidate = signal("z-1", "Z", "BREAKOUT", Timeframe::H1, Direction::Bullish, 0.9, 5)
        .levels(Some(100.0), Some(97.0), Some(106.0))
        .volume_confirmed(false);

    for regime in [TradingRegime::Trending, TradingRegime::Avoid] {
        let engine = engine_with(vec![candidate.clone().regime(regime)]);
        for capital in [0.0, 1_000.0, 10_000_000.0] {
            let market = MarketContext::new(capital, 25, 12.0).unwrap();
            let decision = engine.propose("Z", &market, now());
            assert!(!decision.is_proposed());
            assert_eq!(decision.rejection().unwrap().code(), "NO_VOLUME_CONFIRMATION");
        }
    }
}

// ============================================================
// FEED INGEST
// ============================================================

const FEED: &str = r#"[
    {
        "patternId": "p-1",
        "instrumentId": "NSE:INFY",
        "patternType": "bullish engulfing",
        "timeframe": "60m",
        "triggeredAt": "2024-03-01T14:50:00Z",
        "direction": "bullish",
        "confidence": 82,
        "entryPrice": 1500.0,
        "stopLoss": 1480.0,
        "target1": 1540.0,
        "target2": 0,
        "volumeConfirmed": true,
        "tradingRegime": "trending"
    },
    {
        "patternId": "p-2",
        "instrumentId": "NSE:INFY",
        "patternType": "HAMMER",
        "timeframe": "4H",
        "triggeredAt": "2024-03-01 14:00:00",
        "confidence": 0.7
    },
    {
        "instrumentId": "NSE:TCS",
        "timeframe": "1d"
    },
    {
        "pattern_id": "p-3",
        "instrument_id": "NSE:TCS",
        "timeframe": "weird",
        "triggered_at": "not a date",
        "direction": "BEARISH",
        "confidence": 0.4
    }
]"#;

#[test]
fn ingest_json_keeps_good_records_and_reports_bad() {
    init_tracing();
    let mut engine = EngineBuilder::new().build().unwrap();
    let (stats, decoded) = engine.ingest_json(FEED).unwrap();

    assert_eq!(stats.inserted, 3);
    assert_eq!(decoded.rejected.len(), 1);
    assert!(matches!(
        decoded.rejected[0],
        ConfluenceError::MalformedRecord { index: 2, .. }
    ));

    let snap = engine.snapshot();
    let p1 = snap.get("p-1").unwrap();
    assert_eq!(p1.timeframe, Timeframe::H1);
    assert_eq!(p1.pattern_type.as_str(), "BULLISH_ENGULFING");
    assert!((p1.confidence.get() - 0.82).abs() < 1e-12);
    assert!(p1.targets[1].is_invalid());
    assert!(p1.targets[2].is_missing());
    assert!((p1.risk_reward_ratio.unwrap() - 2.0).abs() < 1e-9);

    // Direction falls back to the pattern's usual direction.
    let p2 = snap.get("p-2").unwrap();
    assert_eq!(p2.direction, Direction::Bullish);
    assert_eq!(p2.timeframe, Timeframe::H4);
    assert!(p2.triggered_at.is_some());

    // Unknown timeframe and bad timestamp degrade, never drop.
    let p3 = snap.get("p-3").unwrap();
    assert!(!p3.timeframe.is_known());
    assert_eq!(p3.timeframe.weight(), 1);
    assert!(p3.triggered_at.is_none());
    assert!(!p3.is_expired(now() + Duration::days(3650)));
}

#[test]
fn ingest_json_rejects_non_json() {
    let mut engine = EngineBuilder::new().build().unwrap();
    assert!(matches!(engine.ingest_json("{oops"), Err(ConfluenceError::Decode(_))));
    assert!(matches!(engine.ingest_json("42"), Err(ConfluenceError::Decode(_))));
}

#[test]
fn ingest_json_then_propose() {
    init_tracing();
    let mut engine = EngineBuilder::new().build().unwrap();
    engine.ingest_json(FEED).unwrap();

    let market = MarketContext::new(500_000.0, 10, 30.0).unwrap();
    let decision = engine.propose("NSE:INFY", &market, now());
    let proposal = decision.proposal().expect("proposal");
    assert_eq!(proposal.pattern_id, "p-1");
    assert_eq!(proposal.side, OptionSide::Call);
    assert!(proposal.contracts >= 1);
    assert!(proposal.levels.stop < proposal.levels.entry);
    assert!(proposal.levels.targets[1].is_invalid());
    assert_eq!(proposal.levels.targets[1].label(), "DATA_ERROR");
    assert_eq!(proposal.levels.targets[2].label(), "MISSING");
}

// ============================================================
// MERGE & OBSERVERS
// ============================================================

#[test]
fn redelivery_is_idempotent_and_last_writer_wins() {
    let mut engine = EngineBuilder::new().build().unwrap();
    let first = signal("a", "X", "HAMMER", Timeframe::H1, Direction::Bullish, 0.6, 5);
    engine.ingest(vec![first.clone()]);
    let v1 = engine.snapshot().version();

    let stats = engine.ingest(vec![first.clone()]);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(engine.snapshot().version(), v1);

    let update = first.clone().status(SignalStatus::CompletedWin);
    let stats = engine.ingest(vec![update]);
    assert_eq!(stats.replaced, 1);
    let snap = engine.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap.get("a").unwrap().status, SignalStatus::CompletedWin);
}

#[test]
fn observers_receive_every_new_snapshot() {
    let versions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&versions);

    let mut engine = EngineBuilder::new()
        .seed(vec![signal("s", "X", "DOJI", Timeframe::M5, Direction::Neutral, 0.5, 1)])
        .observer(move |snap: &Snapshot| sink.lock().unwrap().push(snap.version()))
        .build()
        .unwrap();

    engine.ingest(vec![signal("a", "X", "HAMMER", Timeframe::H1, Direction::Bullish, 0.6, 5)]);
    engine.ingest(vec![signal("b", "Y", "HAMMER", Timeframe::H1, Direction::Bullish, 0.6, 5)]);

    // The seed merge happens before observers are attached.
    assert_eq!(*versions.lock().unwrap(), vec![2, 3]);
}

#[test]
fn old_snapshot_is_unaffected_by_new_batches() {
    let mut engine = engine_with(vec![signal(
        "a", "X", "HAMMER", Timeframe::H1, Direction::Bullish, 0.8, 5,
    )]);
    let before = engine.snapshot();
    engine.ingest(vec![signal("b", "X", "HAMMER", Timeframe::H4, Direction::Bearish, 0.9, 5)]);

    let old = before.analyze(now(), Horizon::All);
    let new = engine.snapshot().analyze(now(), Horizon::All);
    assert_eq!(old[0].group.active_count(), 1);
    assert_eq!(new[0].group.active_count(), 2);
}

// ============================================================
// ANALYSIS & SEARCH
// ============================================================

fn market_universe() -> Vec<PatternSignal> {
    let mut out = Vec::new();
    for (i, inst) in ["AAA", "BBB", "CCC", "DDD", "EEE"].iter().enumerate() {
        let conf = 0.5 + i as f64 * 0.1;
        out.push(signal(&format!("{inst}-1"), inst, "HAMMER", Timeframe::M15, Direction::Bullish, conf, 3));
        out.push(signal(&format!("{inst}-2"), inst, "BREAKOUT", Timeframe::H1, Direction::Bullish, conf, 10));
        if i % 2 == 0 {
            out.push(signal(&format!("{inst}-3"), inst, "BREAKDOWN", Timeframe::D1, Direction::Bearish, 0.6, 30));
        }
    }
    out
}

#[test]
fn parallel_and_sequential_analysis_agree() {
    let engine = engine_with(market_universe());
    let snap = engine.snapshot();

    let sequential = snap.analyze(now(), Horizon::All);
    let parallel = snap.analyze_parallel(now(), Horizon::All);
    assert_eq!(sequential, parallel);
    assert_eq!(engine.reports(now()), parallel);

    for pair in parallel.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn search_across_instruments() {
    let engine = engine_with(market_universe());
    let hits = engine.search(&[
        SearchRule::new("BREAKDOWN", "1d"),
        SearchRule::new("hammer", "15m"),
    ]);
    let ids: Vec<_> = hits.iter().map(|h| h.instrument_id.as_str()).collect();
    assert_eq!(ids, vec!["AAA", "CCC", "EEE"]);

    assert!(engine.search(&[SearchRule::new("HAMMER", "15m")]).is_empty());
}

#[test]
fn horizon_from_toml_limits_grouping() {
    let engine = EngineBuilder::new()
        .config_toml(
            r#"
            horizon = { mode = "last_hours", hours = 1 }

            [gate]
            min_confidence = 0.7
            "#,
        )
        .unwrap()
        .seed(vec![
            signal("recent", "X", "HAMMER", Timeframe::D1, Direction::Bullish, 0.8, 30),
            signal("old", "X", "HAMMER", Timeframe::D1, Direction::Bearish, 0.8, 300),
        ])
        .build()
        .unwrap();

    let groups = engine.groups(now());
    assert_eq!(groups[0].history.len(), 1);
    assert_eq!(engine.config().gate.min_confidence, 0.7);

    // Search ignores the horizon.
    let hits = engine.search(&[SearchRule::new("HAMMER", "1d"), SearchRule::new("HAMMER", "1d")]);
    assert_eq!(hits.len(), 1);
}

#[test]
fn report_serializes_for_presentation() {
    let engine = engine_with(vec![
        signal("x-1h", "X", "HAMMER", Timeframe::H1, Direction::Bullish, 0.8, 10),
        signal("x-4h", "X", "BREAKOUT", Timeframe::H4, Direction::Bullish, 0.75, 20),
    ]);
    let report = engine.report("X", now()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["verdict"]["kind"], "STRONG");
    assert_eq!(json["verdict"]["dominant"], "BULLISH");
    assert_eq!(json["group"]["timeframes"][0]["timeframe"], "4h");
}
