use citerank_core::{
    CancelToken, CitationRecord, Document, ManualClock, PartitionConfig, RankError, RankerConfig, RankerState,
    RankingMode, RankingOrchestrator, RankingRecord, SledStore,
};
use std::sync::Arc;
use std::thread;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

const T0: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

struct Fixture {
    store: Arc<SledStore>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        Self { store: Arc::new(SledStore::temporary().unwrap()), clock: Arc::new(ManualClock::new(T0)) }
    }

    fn publish(&self, id: &str, at: OffsetDateTime, text: &str, cites: &[&str]) {
        let url = format!("http://news.example/{id}");
        let doc = Document { id: id.into(), partition: "tech".into(), created_at: at, url, text: text.into() };
        self.store.put_document(&doc).unwrap();
        let record = CitationRecord {
            created_at: at,
            url: format!("news.example/{id}"),
            cited: cites.iter().map(|c| c.to_string()).collect(),
        };
        self.store.put_citation_record("tech", id, &record).unwrap();
    }

    fn ranker(&self, mode: RankingMode, config: RankerConfig) -> RankingOrchestrator {
        let partition = PartitionConfig { name: "tech".into(), mode };
        RankingOrchestrator::new(&partition, config, self.store.clone(), self.clock.clone())
    }

    fn seed(&self) {
        self.publish("x", T0 - Duration::hours(2), "rust borrow checker ownership lifetimes", &[]);
        self.publish("y", T0 - Duration::minutes(90), "rust borrow checker ownership lifetimes", &[]);
        self.publish("p1", T0 - Duration::minutes(10), "gardening tomato soil", &["news.example/x", "news.example/y", "elsewhere.example/q"]);
        self.publish("p2", T0 - Duration::minutes(20), "weather rain forecast", &["news.example/x"]);
    }
}

fn ids(rows: &[(String, RankingRecord)]) -> Vec<&str> { rows.iter().map(|(id, _)| id.as_str()).collect() }

#[test]
fn popularity_cycle_persists_resolved_documents() {
    let f = Fixture::new();
    f.seed();
    let mut ranker = f.ranker(RankingMode::Popularity, RankerConfig::default());
    let cancel = CancelToken::new();
    let report = ranker.run_cycle(&cancel).unwrap();
    assert_eq!(ranker.state(), RankerState::Ready);
    assert_eq!(report.records, 4);
    assert_eq!(report.unresolved, 1);

    let rows = f.store.rankings("tech").unwrap();
    assert_eq!(ids(&rows), vec!["x", "y"]);
    assert!(matches!(rows[0].1, RankingRecord::Popularity { score } if (score - 1.0).abs() < 1e-9));
    let first_y = rows[1].1.score();
    assert!(first_y > 0.2 && first_y < 0.3);

    f.clock.advance(Duration::minutes(15));
    f.publish("p3", T0 + Duration::minutes(5), "market news", &["news.example/y"]);
    f.publish("p4", T0 + Duration::minutes(10), "more market news", &["news.example/y"]);
    let report = ranker.run_cycle(&cancel).unwrap();
    assert_eq!(report.records, 2);
    let rows = f.store.rankings("tech").unwrap();
    assert_eq!(ids(&rows), vec!["y", "x"]);
}

#[test]
fn similarity_cycle_groups_related_documents() {
    let f = Fixture::new();
    f.seed();
    let config = RankerConfig { cluster_fan_out: 1, ..RankerConfig::default() };
    let mut ranker = f.ranker(RankingMode::PopularitySimilarity, config);
    let report = ranker.run_cycle(&CancelToken::new()).unwrap();
    assert_eq!(report.clusters, 1);

    let rows = f.store.rankings("tech").unwrap();
    assert_eq!(ids(&rows), vec!["x"]);
    match &rows[0].1 {
        RankingRecord::Cluster { score, similar } => {
            assert!((score - 1.0).abs() < 1e-9);
            assert_eq!(similar.len(), 1);
            assert_eq!(similar[0].0, "y");
            assert!(similar[0].1 > 0.99);
        }
        other => panic!("expected a cluster row, got {other:?}"),
    }
}

#[test]
fn similarity_mode_with_one_document_persists_a_singleton_row() {
    let f = Fixture::new();
    f.publish("x", T0 - Duration::hours(2), "lonely story", &[]);
    let record = CitationRecord {
        created_at: T0 - Duration::minutes(10),
        url: "elsewhere.example/p1".into(),
        cited: vec!["news.example/x".into()],
    };
    f.store.put_citation_record("tech", "p1", &record).unwrap();
    let mut ranker = f.ranker(RankingMode::PopularitySimilarity, RankerConfig::default());
    let report = ranker.run_cycle(&CancelToken::new()).unwrap();
    assert_eq!(report.clusters, 1);
    assert_eq!(ranker.state(), RankerState::Ready);

    let rows = f.store.rankings("tech").unwrap();
    assert_eq!(rows, vec![("x".to_string(), RankingRecord::Cluster { score: 1.0, similar: Vec::new() })]);
    assert_eq!(rows[0].1.to_string(), "S|1.0000000000");
}

#[test]
fn clusters_take_top_k_neighbours_and_leave_a_singleton_remainder() {
    let f = Fixture::new();
    let rust = "rust borrow checker ownership lifetimes";
    f.publish("a1", T0 - Duration::hours(3), rust, &[]);
    f.publish("a2", T0 - Duration::minutes(150), rust, &[]);
    f.publish("a3", T0 - Duration::hours(2), rust, &[]);
    f.publish("g1", T0 - Duration::minutes(90), "tomato garden soil compost", &[]);
    f.publish("p1", T0 - Duration::minutes(10), "market report shares", &["news.example/a1", "news.example/g1", "news.example/a2"]);
    f.publish("p2", T0 - Duration::minutes(10), "weather rain forecast", &["news.example/a1", "news.example/a3"]);
    f.publish("p3", T0 - Duration::minutes(10), "football match result", &["news.example/a1"]);
    let config = RankerConfig { cluster_fan_out: 2, ..RankerConfig::default() };
    let mut ranker = f.ranker(RankingMode::PopularitySimilarity, config);
    let report = ranker.run_cycle(&CancelToken::new()).unwrap();
    assert_eq!(report.resolved, 4);
    assert_eq!(report.clusters, 2);

    let rows = f.store.rankings("tech").unwrap();
    assert_eq!(ids(&rows), vec!["a1", "g1"]);
    match &rows[0].1 {
        RankingRecord::Cluster { score, similar } => {
            assert!((score - 1.0).abs() < 1e-9);
            let mut members: Vec<&str> = similar.iter().map(|(id, _)| id.as_str()).collect();
            members.sort();
            assert_eq!(members, vec!["a2", "a3"]);
            assert!(similar.iter().all(|(_, sim)| *sim > 0.99));
        }
        other => panic!("expected a cluster row, got {other:?}"),
    }
    match &rows[1].1 {
        RankingRecord::Cluster { score, similar } => {
            assert!((score - 1.0 / 3.0).abs() < 1e-9);
            assert!(similar.is_empty());
        }
        other => panic!("expected a singleton cluster row, got {other:?}"),
    }
    assert!(rows[1].1.to_string().starts_with("S|0.3333333333"));
}

#[test]
fn records_written_after_a_cycle_with_older_stamps_are_counted_once() {
    let f = Fixture::new();
    f.seed();
    f.publish("p6", T0 - Duration::minutes(1), "late wire copy", &["news.example/x"]);
    let mut ranker = f.ranker(RankingMode::Popularity, RankerConfig::default());
    let cancel = CancelToken::new();
    assert_eq!(ranker.run_cycle(&cancel).unwrap().records, 5);

    f.publish("p5", T0 - Duration::seconds(5), "slow fetch", &["news.example/y"]);
    f.clock.advance(Duration::minutes(15));
    let report = ranker.run_cycle(&cancel).unwrap();
    assert_eq!(report.records, 1);
    let rows = f.store.rankings("tech").unwrap();
    assert_eq!(ids(&rows), vec!["x", "y"]);
    assert!(rows[1].1.score() > 0.25, "{rows:?}");
}

#[test]
fn reingested_document_retracts_its_previous_citations() {
    let f = Fixture::new();
    f.publish("x", T0 - Duration::hours(2), "first story", &[]);
    f.publish("y", T0 - Duration::minutes(90), "second story", &[]);
    f.publish("p1", T0 - Duration::minutes(10), "roundup", &["news.example/x"]);
    let mut ranker = f.ranker(RankingMode::Popularity, RankerConfig::default());
    let cancel = CancelToken::new();
    ranker.run_cycle(&cancel).unwrap();
    assert_eq!(ids(&f.store.rankings("tech").unwrap()), vec!["x"]);

    f.clock.advance(Duration::minutes(15));
    f.publish("p1", T0 + Duration::minutes(5), "roundup, corrected", &["news.example/y"]);
    let report = ranker.run_cycle(&cancel).unwrap();
    assert_eq!((report.records, report.retracted), (1, 1));
    assert_eq!(f.store.rankings("tech").unwrap(), vec![("y".to_string(), RankingRecord::Popularity { score: 1.0 })]);
    assert!(ranker.context().graph.citations("news.example/x").is_none());
}

#[test]
fn cancelled_cycle_persists_nothing_and_halts() {
    let f = Fixture::new();
    f.seed();
    let mut ranker = f.ranker(RankingMode::Popularity, RankerConfig::default());
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(ranker.run_cycle(&cancel), Err(RankError::Cancelled)));
    assert_eq!(ranker.state(), RankerState::Cancelled);
    assert!(f.store.rankings("tech").unwrap().is_empty());
    assert!(matches!(ranker.run_cycle(&CancelToken::new()), Err(RankError::Halted { .. })));
}

#[test]
fn run_stops_cleanly_when_cancelled_while_sleeping() {
    let f = Fixture::new();
    f.seed();
    let mut ranker = f.ranker(RankingMode::Popularity, RankerConfig::default());
    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(std::time::Duration::from_millis(100));
        remote.cancel();
    });
    ranker.run(&cancel).unwrap();
    canceller.join().unwrap();
    assert_eq!(ranker.state(), RankerState::Cancelled);
    assert_eq!(ids(&f.store.rankings("tech").unwrap()), vec!["x", "y"]);
}

#[test]
fn old_citation_records_are_pruned() {
    let f = Fixture::new();
    f.seed();
    f.publish("ancient", T0 - Duration::hours(44), "old news", &["news.example/x"]);
    let mut ranker = f.ranker(RankingMode::Popularity, RankerConfig::default());
    let report = ranker.run_cycle(&CancelToken::new()).unwrap();
    assert_eq!(report.records, 4);
    assert_eq!(report.pruned_records, 1);
}
