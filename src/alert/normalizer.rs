use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::types::{Indicator, IndicatorUpdate, PayloadShape, SignalPolicy, SkippedSignal};

/// Accepted spellings of the optional price target field.
const PRICE_TARGET_KEYS: &[&str] = &["analystPriceTarget", "analyst_price_target"];

/// Turn a raw webhook body into a validated update.
///
/// Two payload shapes are accepted:
/// - `{ticker, indicator?, signal}`: a single value. A missing `indicator`
///   targets the primary signal. Any invalid part rejects the payload.
/// - `{ticker, signals: [{indicator, signal}, ...]}`: several values. Invalid
///   entries are skipped with a warning so one bad signal does not block the
///   rest.
///
/// Optional numeric fields never reject a payload; unparseable values become
/// absent.
pub fn normalize(raw: &Value, policy: &SignalPolicy) -> Result<IndicatorUpdate, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let ticker = match obj.get("ticker").and_then(Value::as_str) {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => return Err(ValidationError::MissingTicker),
    };

    let (values, shape, skipped) = match obj.get("signals").filter(|v| !v.is_null()) {
        Some(list) => {
            if obj.get("indicator").is_some_and(|v| !v.is_null()) {
                return Err(ValidationError::MixedPayloadShape);
            }
            let (values, skipped) = normalize_signal_list(&ticker, list, policy)?;
            (values, PayloadShape::Multi, skipped)
        }
        None => {
            let (indicator, value) = normalize_single(obj, policy)?;
            let mut values = BTreeMap::new();
            values.insert(indicator, value);
            (values, PayloadShape::Single, Vec::new())
        }
    };

    let analyst_price_target = PRICE_TARGET_KEYS
        .iter()
        .find_map(|k| obj.get(*k).map(|v| (*k, v)))
        .and_then(|(k, v)| parse_optional_number(&ticker, k, v));
    let strength = obj
        .get("strength")
        .and_then(|v| parse_optional_number(&ticker, "strength", v));
    let comment = obj
        .get("comment")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    debug!(
        ticker = %ticker,
        fields = values.len(),
        skipped = skipped.len(),
        ?analyst_price_target,
        ?strength,
        ?comment,
        "alert normalized"
    );

    Ok(IndicatorUpdate {
        ticker,
        values,
        analyst_price_target,
        strength,
        comment,
        shape,
        skipped,
    })
}

fn normalize_single(
    obj: &serde_json::Map<String, Value>,
    policy: &SignalPolicy,
) -> Result<(Indicator, String), ValidationError> {
    let indicator = match obj.get("indicator") {
        None | Some(Value::Null) => Indicator::Signal,
        Some(Value::String(name)) => name
            .parse::<Indicator>()
            .map_err(ValidationError::InvalidIndicator)?,
        Some(other) => return Err(ValidationError::InvalidIndicator(other.to_string())),
    };

    let raw = obj
        .get("signal")
        .and_then(signal_text)
        .ok_or_else(|| ValidationError::MissingSignal(indicator.to_string()))?;
    if raw.trim().is_empty() {
        return Err(ValidationError::MissingSignal(indicator.to_string()));
    }
    let value = policy.accept(&raw).ok_or_else(|| ValidationError::InvalidSignal {
        indicator: indicator.to_string(),
        value: raw.clone(),
    })?;

    Ok((indicator, value))
}

fn normalize_signal_list(
    ticker: &str,
    list: &Value,
    policy: &SignalPolicy,
) -> Result<(BTreeMap<Indicator, String>, Vec<SkippedSignal>), ValidationError> {
    let entries = list.as_array().ok_or(ValidationError::InvalidSignalList)?;

    let mut values = BTreeMap::new();
    let mut skipped = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        match normalize_entry(entry, policy) {
            Ok((indicator, value)) => {
                // Later duplicates win, same as applying the entries in order.
                values.insert(indicator, value);
            }
            Err(reason) => {
                warn!(ticker = %ticker, index, %reason, "skipping signal entry");
                skipped.push(SkippedSignal { index, reason });
            }
        }
    }

    if values.is_empty() {
        return Err(ValidationError::NoValidSignals(skipped.len()));
    }
    Ok((values, skipped))
}

fn normalize_entry(entry: &Value, policy: &SignalPolicy) -> Result<(Indicator, String), String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| "entry is not an object".to_string())?;

    let name = obj
        .get("indicator")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing indicator".to_string())?;
    let indicator = name
        .parse::<Indicator>()
        .map_err(|n| format!("unknown indicator {n:?}"))?;

    let raw = obj
        .get("signal")
        .and_then(signal_text)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| format!("missing signal for {indicator}"))?;

    policy
        .accept(&raw)
        .map(|v| (indicator, v))
        .ok_or_else(|| format!("signal {raw:?} not accepted for {indicator}"))
}

/// Signals arrive as strings or as numeric codes (`2`, `-1`).
fn signal_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Schema-flexible optional number.
///
/// `null`, `""`, `"false"` and `false` mean "no value". Numbers and numeric
/// strings are parsed. Anything else is logged and treated as absent.
pub fn parse_optional_number(ticker: &str, field: &str, v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Null | Value::Bool(false) => return None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("false") {
                return None;
            }
            s.parse::<f64>().ok()
        }
        _ => None,
    };

    match parsed {
        Some(n) if n.is_finite() => Some(n),
        _ => {
            warn!(ticker = %ticker, field, value = %v, "ignoring non-numeric value");
            None
        }
    }
}
