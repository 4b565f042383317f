use active_dedup::blocking::RuleSpec;
use active_dedup::dto::{DedupConfig, Table, DEDUPLICATION_ID_NAME};
use active_dedup::error::DedupError;
use active_dedup::features::FieldSpec;
use active_dedup::metrics::{FnMetric, SimilarityMetric};
use active_dedup::oracle::{Answer, ConsoleOracle, Query};
use active_dedup::response::Status;
use active_dedup::rules::{all_rules, PredicateRule};
use active_dedup::util::SCORED_PAIRS_TABLE_FILE;
use active_dedup::Deduplicator;
use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::Arc;

fn first_token(x: &str) -> String {
    x.split_whitespace().next().unwrap_or("").to_lowercase()
}

fn first_token_equal(a: &str, b: &str) -> f64 {
    if first_token(a) == first_token(b) {
        1.0
    } else {
        0.0
    }
}

fn name_field() -> Vec<FieldSpec> {
    let metric: Arc<dyn SimilarityMetric> = Arc::new(FnMetric::new("first_token", first_token_equal));
    vec![FieldSpec::new("name", vec![metric])]
}

fn name_rules() -> Vec<RuleSpec> {
    all_rules()
        .into_iter()
        .map(|rule| RuleSpec::new(0, "name", rule))
        .collect()
}

fn deduplicator(config: &DedupConfig) -> Deduplicator {
    Deduplicator::with_components(name_field(), name_rules(), config).unwrap()
}

fn seeded() -> DedupConfig {
    DedupConfig {
        seed: Some(42),
        ..DedupConfig::for_columns(&["name"])
    }
}

fn same_first_token(q: &Query<'_>) -> Answer {
    if first_token(&q.left[0]) == first_token(&q.right[0]) {
        Answer::Match
    } else {
        Answer::NoMatch
    }
}

fn ids(table: &Table) -> Vec<usize> {
    let col = table.column_index(DEDUPLICATION_ID_NAME).unwrap();
    table.rows.iter().map(|row| row[col].parse().unwrap()).collect()
}

const COMPANIES: [&str; 4] = ["Acme Inc", "Acme Incorporated", "Beta LLC", "Totally Different Co"];

#[test]
fn end_to_end_groups_acme() {
    let table = Table::from_column("name", &COMPANIES);
    let mut dedup = deduplicator(&seeded());
    dedup.fit(&table, 16, &mut same_first_token).unwrap();
    assert_eq!(dedup.rules_selected().unwrap(), vec!["name first_word".to_string()]);

    let result = dedup.predict(&table, 0.1, 0.5).unwrap();
    assert_eq!(result.columns, vec!["name", DEDUPLICATION_ID_NAME]);
    assert_eq!(ids(&result), vec![0, 0, 1, 2]);
}

#[test]
fn end_to_end_with_default_metrics() {
    let table = Table::from_column("name", &COMPANIES);
    let mut dedup = Deduplicator::new(&seeded()).unwrap();
    dedup.fit(&table, 16, &mut same_first_token).unwrap();
    assert_eq!(dedup.rules_selected().unwrap(), vec!["name first_word".to_string()]);
    assert_eq!(ids(&dedup.predict(&table, 0.1, 0.5).unwrap()), vec![0, 0, 1, 2]);
}

#[test]
fn end_to_end_through_console_answers() {
    let table = Table::from_column("name", &COMPANIES);
    let mut dedup = deduplicator(&seeded());
    // (Acme Inc, Acme Inc) is asked first, then the least similar pair
    let mut oracle = ConsoleOracle::new(Cursor::new("y\nn\nf\n"), Vec::new(), None);
    dedup.fit(&table, 16, &mut oracle).unwrap();
    let (result, summary) = dedup.predict_with_summary(&table, 0.1, 0.5).unwrap();
    assert_eq!(ids(&result), vec![0, 0, 1, 2]);
    assert_eq!(summary.n_records, 4);
    assert_eq!(summary.n_labeled, 2);
    assert_eq!(summary.n_candidate_pairs, 1);
    assert_eq!(summary.n_clusters, 3);
    assert_eq!(summary.largest_cluster, 2);

    let prompts = String::from_utf8(oracle.into_inner()).unwrap();
    assert!(prompts.contains("-> name: Acme Inc"));
}

fn values_differ(a: &str, b: &str) -> f64 {
    if a == b {
        0.0
    } else {
        1.0
    }
}

#[test]
fn identical_records_always_match() {
    let dir = tempfile::tempdir().unwrap();
    let config = DedupConfig {
        save_intermediate_steps: true,
        intermediate_dir: dir.path().to_string_lossy().into_owned(),
        patience: 0,
        ..seeded()
    };
    let metric: Arc<dyn SimilarityMetric> = Arc::new(FnMetric::new("differs", values_differ));
    let fields = vec![FieldSpec::new("name", vec![metric])];
    let mut dedup = Deduplicator::with_components(fields, name_rules(), &config).unwrap();
    let table = Table::from_column("name", &["Acme", "Acme", "Acme Corp", "Beta Ltd"]);
    // only distinct names sharing a first word are matches, so the classifier
    // learns that identical names are not
    let mut oracle = |q: &Query<'_>| {
        if q.left != q.right && first_token(&q.left[0]) == first_token(&q.right[0]) {
            Answer::Match
        } else {
            Answer::NoMatch
        }
    };
    dedup.fit(&table, 16, &mut oracle).unwrap();
    let result = dedup.predict(&table, 0.1, 0.5).unwrap();
    let ids = ids(&result);
    assert_eq!(ids[0], ids[1]);

    let scored = std::fs::read_to_string(dir.path().join(SCORED_PAIRS_TABLE_FILE)).unwrap();
    assert!(scored.lines().any(|line| line == "0|Acme|1|Acme|0|1"));
    assert!(dir.path().join("pairs_table.csv").exists());
}

#[test]
fn predict_is_idempotent() {
    let names = [
        "Acme Inc",
        "Beta LLC",
        "Acme Incorporated",
        "Gamma Holding",
        "Beta Limited",
        "Delta",
        "Gamma Group",
        "Acme Corp",
    ];
    let table = Table::from_column("name", &names);
    let mut dedup = deduplicator(&seeded());
    dedup.fit(&table, 64, &mut same_first_token).unwrap();
    let first = ids(&dedup.predict(&table, 0.1, 0.5).unwrap());
    let second = ids(&dedup.predict(&table, 0.1, 0.5).unwrap());
    assert_eq!(first, second);

    // every row has exactly one id and ids are dense
    assert_eq!(first.len(), names.len());
    let distinct: BTreeSet<usize> = first.iter().copied().collect();
    assert_eq!(distinct.len(), first.iter().max().unwrap() + 1);
    assert_eq!(first[0], first[2]);
    assert_eq!(first[0], first[7]);
    assert_eq!(first[1], first[4]);
    assert_ne!(first[0], first[1]);
    assert_ne!(first[5], first[3]);
}

#[test]
fn degenerate_tables_do_not_crash() {
    let single = Table::from_column("name", &["Acme"]);
    let mut dedup = deduplicator(&seeded());
    dedup.fit(&single, 100, &mut same_first_token).unwrap();
    assert_eq!(ids(&dedup.predict(&single, 0.1, 0.5).unwrap()), vec![0]);

    let empty = Table::from_column("name", &[]);
    let result = dedup.predict(&empty, 0.1, 0.5).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.columns.len(), 2);

    let err = deduplicator(&seeded())
        .fit(&empty, 100, &mut same_first_token)
        .err()
        .unwrap();
    assert_eq!(err.status, Status::InvalidInput);
}

#[test]
fn identical_sample_collapses_to_one_cluster() {
    let table = Table::from_column("name", &["same", "same", "same"]);
    let mut dedup = deduplicator(&seeded());
    dedup.fit(&table, 9, &mut same_first_token).unwrap();
    assert_eq!(ids(&dedup.predict(&table, 0.1, 0.5).unwrap()), vec![0, 0, 0]);
}

struct Exploding;

impl PredicateRule for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    fn apply(&self, value: &str) -> Result<Option<String>, DedupError> {
        if value == "boom" {
            Err(DedupError::function_failed("cannot handle boom"))
        } else {
            Ok(Some(value.to_string()))
        }
    }
}

#[test]
fn failing_rule_aborts_fit() {
    let rules = vec![RuleSpec::new(0, "name", Arc::new(Exploding))];
    let mut dedup = Deduplicator::with_components(name_field(), rules, &seeded()).unwrap();
    let table = Table::from_column("name", &["ok", "boom"]);
    let mut equal_values = |q: &Query<'_>| {
        if q.left == q.right {
            Answer::Match
        } else {
            Answer::NoMatch
        }
    };
    let err = dedup.fit(&table, 4, &mut equal_values).err().unwrap();
    assert_eq!(err.status, Status::FunctionFailed);
    assert!(err.msg.contains("exploding"));
}

#[test]
fn config_errors_surface_at_construction() {
    let config: DedupConfig = serde_json::from_str(r#"{"col_names": []}"#).unwrap();
    assert_eq!(Deduplicator::new(&config).err().unwrap().status, Status::InvalidConfig);

    let config: DedupConfig =
        serde_json::from_str(r#"{"col_names": ["name"], "rules": ["no_such_rule"]}"#).unwrap();
    assert_eq!(Deduplicator::new(&config).err().unwrap().status, Status::InvalidConfig);

    assert!(serde_json::from_str::<DedupConfig>(r#"{"col_names": ["name"], "unknown": 1}"#).is_err());
}
