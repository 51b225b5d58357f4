//! Schema-version detection and legacy-config migration.
//!
//! Input documents arrive in one of two layouts: the canonical flattened
//! schema (see [`Config::template`]) or the older nested layout with a
//! `live_config` block (`global`/`long`/`short`) and an optional `args`
//! block of CLI-style overrides. Detection is explicit: a document whose
//! key set recursively covers the canonical template is canonical;
//! everything else goes through migration.
//!
//! Migration never mutates the caller's document. The disabled-side
//! exposure zeroing is applied to a private clone, in the same order as the
//! rest of the mapping reads it (zero the legacy field, then map), so
//! derived fields still come out zero.

use super::schema::Config;
use super::ConfigError;
use crate::domain::Side;
use serde_json::{Map, Value};

/// Detected layout of a raw config document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// Canonical flattened schema; no migration needed.
    V7,
    /// Older nested schema (`live_config` + optional `args`).
    Legacy,
}

/// Legacy field name → canonical field name.
const FIELD_MIGRATIONS: [(&str, &str); 9] = [
    ("ddown_factor", "entry_grid_double_down_factor"),
    ("initial_eprice_ema_dist", "entry_initial_ema_dist"),
    ("initial_qty_pct", "entry_initial_qty_pct"),
    ("markup_range", "close_grid_markup_range"),
    ("min_markup", "close_grid_min_markup"),
    ("rentry_pprice_dist", "entry_grid_spacing_pct"),
    (
        "rentry_pprice_dist_wallet_exposure_weighting",
        "entry_grid_spacing_weight",
    ),
    ("ema_span_0", "ema_span_0"),
    ("ema_span_1", "ema_span_1"),
];

/// A side whose exposure limit is at or below this is considered disabled.
const EXPOSURE_EPSILON: f64 = 1e-5;

fn template_value() -> Value {
    serde_json::to_value(Config::template()).expect("canonical template serializes")
}

/// Classify a raw document by layout.
///
/// Canonical detection is a recursive key-superset test against the
/// template: every key (at every nesting level) of the template must be
/// present in the candidate. Values are not inspected.
pub fn detect_version(raw: &Value) -> SchemaVersion {
    if contains_keys(&template_value(), raw) {
        SchemaVersion::V7
    } else {
        SchemaVersion::Legacy
    }
}

fn contains_keys(template: &Value, candidate: &Value) -> bool {
    match template {
        Value::Object(template_map) => match candidate {
            Value::Object(candidate_map) => template_map.iter().all(|(key, tv)| {
                candidate_map
                    .get(key)
                    .is_some_and(|cv| contains_keys(tv, cv))
            }),
            _ => false,
        },
        _ => true,
    }
}

/// Normalize an arbitrary config document into the canonical schema.
///
/// Canonical documents decode directly (idempotent path); legacy documents
/// are migrated. The input is never mutated.
pub fn normalize(raw: &Value) -> Result<Config, ConfigError> {
    if !raw.is_object() {
        return Err(ConfigError::NotAnObject);
    }
    match detect_version(raw) {
        SchemaVersion::V7 => {
            serde_json::from_value(raw.clone()).map_err(|e| ConfigError::Malformed(e.to_string()))
        }
        SchemaVersion::Legacy => migrate_legacy(raw),
    }
}

fn migrate_legacy(raw: &Value) -> Result<Config, ConfigError> {
    let mut formatted = template_value();
    // Overrides are applied to a private clone; the caller's document
    // stays untouched.
    let mut doc = raw.clone();

    if doc.get("args").is_some() {
        apply_args_overrides(&mut formatted, &mut doc)?;
    }

    let has_full_live_config = doc.get("live_config").is_some_and(|lc| {
        ["global", "long", "short"]
            .iter()
            .all(|k| lc.get(*k).is_some())
    });
    if has_full_live_config {
        let n_approved = formatted
            .get("approved_symbols")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let live = doc
            .get("live_config")
            .cloned()
            .expect("checked live_config presence above");
        for side in Side::BOTH {
            migrate_side(&mut formatted, &live, side, n_approved)?;
        }
    }

    serde_json::from_value(formatted).map_err(|e| ConfigError::Malformed(e.to_string()))
}

/// Copy CLI-style overrides from the `args` block, and zero the legacy
/// exposure limit of any disabled side before the side mapping reads it.
fn apply_args_overrides(formatted: &mut Value, doc: &mut Value) -> Result<(), ConfigError> {
    let args = doc
        .get("args")
        .cloned()
        .expect("checked args presence above");

    for key in ["start_date", "end_date", "starting_balance", "exchange"] {
        let value = args
            .get(key)
            .ok_or_else(|| ConfigError::MissingField(format!("args.{key}")))?;
        let backtest = formatted
            .get_mut("backtest")
            .and_then(Value::as_object_mut)
            .expect("template has a backtest block");
        if backtest.contains_key(key) {
            backtest.insert(key.to_string(), value.clone());
        }
    }

    let symbols = args
        .get("symbols")
        .ok_or_else(|| ConfigError::MissingField("args.symbols".to_string()))?;
    formatted["approved_symbols"] = symbols.clone();

    for side in Side::BOTH {
        let flag_key = format!("{side}_enabled");
        let flag = args
            .get(&flag_key)
            .ok_or_else(|| ConfigError::MissingField(format!("args.{flag_key}")))?;
        let enabled = flag
            .as_bool()
            .ok_or_else(|| ConfigError::TypeMismatch(format!("args.{flag_key}")))?;
        if !enabled {
            let global = doc
                .get_mut("live_config")
                .and_then(|lc| lc.get_mut("global"))
                .and_then(Value::as_object_mut)
                .ok_or_else(|| ConfigError::MissingField("live_config.global".to_string()))?;
            global.insert(format!("TWE_{side}"), Value::from(0.0));
        }
    }

    Ok(())
}

fn migrate_side(
    formatted: &mut Value,
    live: &Value,
    side: Side,
    n_approved: usize,
) -> Result<(), ConfigError> {
    let side_block = live
        .get(side.as_str())
        .and_then(Value::as_object)
        .ok_or_else(|| ConfigError::MissingField(format!("live_config.{side}")))?;
    let global = live
        .get("global")
        .and_then(Value::as_object)
        .ok_or_else(|| ConfigError::MissingField("live_config.global".to_string()))?;
    let target = formatted
        .get_mut(side.as_str())
        .and_then(Value::as_object_mut)
        .expect("template has both side blocks");

    apply_field_migrations(target, side_block);

    // Zero n_close_orders divides to a non-finite pct, which the final
    // decode rejects.
    let n_close_orders = require_f64(side_block, &format!("live_config.{side}"), "n_close_orders")?;
    target.insert(
        "close_grid_qty_pct".to_string(),
        Value::from(1.0 / n_close_orders.round()),
    );

    let loss_allowance = global
        .get("loss_allowance_pct")
        .ok_or_else(|| ConfigError::MissingField("live_config.global.loss_allowance_pct".into()))?;
    target.insert("unstuck_loss_allowance_pct".to_string(), loss_allowance.clone());

    let stuck_threshold = global
        .get("stuck_threshold")
        .ok_or_else(|| ConfigError::MissingField("live_config.global.stuck_threshold".into()))?;
    target.insert("unstuck_threshold".to_string(), stuck_threshold.clone());

    let exposure = require_f64(global, "live_config.global", &format!("TWE_{side}"))?;
    target.insert(
        "total_wallet_exposure_limit".to_string(),
        Value::from(exposure),
    );

    let n_positions = if exposure > EXPOSURE_EPSILON { n_approved } else { 0 };
    target.insert("n_positions".to_string(), Value::from(n_positions as u64));

    // Legacy configs predate trailing grids.
    target.insert("close_trailing_grid_ratio".to_string(), Value::from(0.0));
    target.insert("entry_trailing_grid_ratio".to_string(), Value::from(0.0));

    Ok(())
}

/// Apply the direct renames. Fields absent from the migration map, or whose
/// target is absent from the template, are dropped.
fn apply_field_migrations(target: &mut Map<String, Value>, side_block: &Map<String, Value>) {
    for (key, value) in side_block {
        let Some((_, canonical)) = FIELD_MIGRATIONS.iter().find(|(from, _)| from == key) else {
            continue;
        };
        if target.contains_key(*canonical) {
            target.insert(canonical.to_string(), value.clone());
        }
    }
}

fn require_f64(
    map: &Map<String, Value>,
    parent: &str,
    key: &str,
) -> Result<f64, ConfigError> {
    let value = map
        .get(key)
        .ok_or_else(|| ConfigError::MissingField(format!("{parent}.{key}")))?;
    value
        .as_f64()
        .ok_or_else(|| ConfigError::TypeMismatch(format!("{parent}.{key}")))
}
