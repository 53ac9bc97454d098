use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Indicator
// ---------------------------------------------------------------------------

/// Every tracked signal source. Each variant owns exactly one storage column,
/// so SQL column lists are built from this type and never from request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// The primary signal. Changes to it drive `signal_changed_at`.
    Signal,
    SmaStrategy,
    Occ,
    AdaptiveSupertrend,
    RangeFilterDaily,
    RangeFilterWeekly,
    Pmax,
    ShinoharaIntensityRatio,
    OscillatorsDailyWeekly,
    MonthlyOscillator,
}

impl Indicator {
    pub const ALL: [Indicator; 10] = [
        Indicator::Signal,
        Indicator::SmaStrategy,
        Indicator::Occ,
        Indicator::AdaptiveSupertrend,
        Indicator::RangeFilterDaily,
        Indicator::RangeFilterWeekly,
        Indicator::Pmax,
        Indicator::ShinoharaIntensityRatio,
        Indicator::OscillatorsDailyWeekly,
        Indicator::MonthlyOscillator,
    ];

    /// Storage column (and JSON field) name.
    pub fn column(self) -> &'static str {
        match self {
            Indicator::Signal => "signal",
            Indicator::SmaStrategy => "sma_strategy",
            Indicator::Occ => "occ",
            Indicator::AdaptiveSupertrend => "adaptive_supertrend",
            Indicator::RangeFilterDaily => "range_filter_daily",
            Indicator::RangeFilterWeekly => "range_filter_weekly",
            Indicator::Pmax => "pmax",
            Indicator::ShinoharaIntensityRatio => "shinohara_intensity_ratio",
            Indicator::OscillatorsDailyWeekly => "oscillators_daily_weekly",
            Indicator::MonthlyOscillator => "monthly_oscillator",
        }
    }
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

impl FromStr for Indicator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Indicator::ALL
            .into_iter()
            .find(|i| i.column().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Signal policy
// ---------------------------------------------------------------------------

/// How signal values are validated before they reach storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SignalPolicy {
    /// Any non-empty value is stored as supplied.
    #[default]
    FreeText,
    /// Only the listed values (case-insensitive) are accepted; stored lowercase.
    Enumerated(Vec<String>),
}

impl SignalPolicy {
    /// Returns the value to store, or None if the policy rejects it.
    pub fn accept(&self, value: &str) -> Option<String> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match self {
            SignalPolicy::FreeText => Some(value.to_string()),
            SignalPolicy::Enumerated(allowed) => allowed
                .iter()
                .find(|a| a.eq_ignore_ascii_case(value))
                .map(|a| a.to_lowercase()),
        }
    }
}

// ---------------------------------------------------------------------------
// IndicatorUpdate: output of the normalizer, input of the merger
// ---------------------------------------------------------------------------

/// Which inbound payload shape an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{ticker, indicator?, signal}`
    Single,
    /// `{ticker, signals: [{indicator, signal}, ...]}`
    Multi,
}

/// A multi-signal entry dropped during normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSignal {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorUpdate {
    pub ticker: String,
    /// Never empty. Keys are drawn from the closed `Indicator` set.
    pub values: BTreeMap<Indicator, String>,
    pub analyst_price_target: Option<f64>,
    pub strength: Option<f64>,
    pub comment: Option<String>,
    pub shape: PayloadShape,
    pub skipped: Vec<SkippedSignal>,
}

impl IndicatorUpdate {
    pub fn carries_signal(&self) -> bool {
        self.values.contains_key(&Indicator::Signal)
    }
}

// ---------------------------------------------------------------------------
// IndicatorRecord: one row of `securities`
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorRecord {
    pub ticker: String,
    #[serde(flatten)]
    pub values: BTreeMap<Indicator, String>,
    pub analyst_price_target: Option<f64>,
    pub date_updated: DateTime<Utc>,
    pub signal_changed_at: Option<DateTime<Utc>>,
}

impl IndicatorRecord {
    /// Stored value of an indicator; empty string when never set.
    pub fn value(&self, indicator: Indicator) -> &str {
        self.values.get(&indicator).map(String::as_str).unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Sheet columns
// ---------------------------------------------------------------------------

/// One column of the mirrored sheet, addressed by record field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetColumn {
    Ticker,
    Indicator(Indicator),
    AnalystPriceTarget,
    DateUpdated,
    SignalChangedAt,
}

impl SheetColumn {
    /// Default order: ticker, every indicator, target, timestamps.
    pub fn default_layout() -> Vec<SheetColumn> {
        let mut cols = vec![SheetColumn::Ticker];
        cols.extend(Indicator::ALL.into_iter().map(SheetColumn::Indicator));
        cols.push(SheetColumn::AnalystPriceTarget);
        cols.push(SheetColumn::DateUpdated);
        cols.push(SheetColumn::SignalChangedAt);
        cols
    }

    pub fn name(self) -> &'static str {
        match self {
            SheetColumn::Ticker => "ticker",
            SheetColumn::Indicator(i) => i.column(),
            SheetColumn::AnalystPriceTarget => "analyst_price_target",
            SheetColumn::DateUpdated => "date_updated",
            SheetColumn::SignalChangedAt => "signal_changed_at",
        }
    }
}

impl FromStr for SheetColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ticker" => Ok(SheetColumn::Ticker),
            "analyst_price_target" => Ok(SheetColumn::AnalystPriceTarget),
            "date_updated" => Ok(SheetColumn::DateUpdated),
            "signal_changed_at" => Ok(SheetColumn::SignalChangedAt),
            other => other.parse::<Indicator>().map(SheetColumn::Indicator),
        }
    }
}
