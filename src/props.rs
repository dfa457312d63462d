use crate::path::{Key, PathBuf};
use crate::value::Value;
use proptest::prelude::*;

/// Installs the test tracing subscriber. Safe to call from every test.
pub fn init_logging() {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;
    tracing_log::LogTracer::init().ok();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_span_events(FmtSpan::ACTIVE | FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_panics::init();
}

pub fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,3}".prop_map(Value::from),
    ]
}

pub fn arb_value() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(4, 64, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(|items| Value::seq(items)),
            prop::collection::btree_map("[a-z]{1,2}", inner, 0..5)
                .prop_map(|fields| fields.into_iter().collect::<Value>()),
        ]
    })
}

pub fn arb_field_path() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec("[a-z]{1,2}", 1..4)
        .prop_map(|fields| fields.iter().map(|f| Key::from(f.as_str())).collect())
}

/// Two field paths guaranteed to address disjoint subtrees.
pub fn arb_disjoint_field_paths() -> impl Strategy<Value = (PathBuf, PathBuf)> {
    (arb_field_path(), arb_field_path()).prop_map(|(p, q)| {
        let mut left: PathBuf = [Key::from("l")].into_iter().collect();
        left.extend(p.as_path());
        let mut right: PathBuf = [Key::from("r")].into_iter().collect();
        right.extend(q.as_path());
        (left, right)
    })
}

fn keyed_item(id: u64) -> Value {
    Value::map([("id", Value::from(id))])
}

/// Two sequences of uniquely keyed items with arbitrary overlap and order.
pub fn arb_resequencing() -> impl Strategy<Value = (Vec<Value>, Vec<Value>)> {
    let keys = || prop::collection::btree_set(0u64..16, 0..8);
    (keys(), keys())
        .prop_flat_map(|(a, b)| {
            let a: Vec<u64> = a.into_iter().collect();
            let b: Vec<u64> = b.into_iter().collect();
            (Just(a).prop_shuffle(), Just(b).prop_shuffle())
        })
        .prop_map(|(a, b)| {
            (
                a.into_iter().map(keyed_item).collect(),
                b.into_iter().map(keyed_item).collect(),
            )
        })
}
