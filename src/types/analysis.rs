use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Clamp a sentiment score to the valid [-1.0, 1.0] range.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Outcome of analyzing one event or post. The analyzer always produces a
/// result; unrecoverable failures surface as a neutral score with the
/// failure recorded in `meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub score: f64,
    pub reasoning: String,

    /// Tickers the model identified (posts only), first occurrence order.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Per-ticker sentiment (posts only); keys ⊆ `symbols`.
    #[serde(default)]
    pub symbol_sentiments: HashMap<String, f64>,

    /// The provider's response as persisted alongside the score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,

    pub meta: AnalysisMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub model: String,
    pub retries: u32,
    #[serde(default)]
    pub image_download_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl AnalysisResult {
    /// A neutral result recording why analysis could not complete.
    pub fn failed(model: &str, retries: u32, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            score: 0.0,
            reasoning: String::new(),
            symbols: Vec::new(),
            symbol_sentiments: HashMap::new(),
            raw_response: Some(serde_json::json!({ "error": reason })),
            meta: AnalysisMeta {
                model: model.to_string(),
                retries,
                image_download_failed: false,
                failure_reason: Some(reason),
            },
        }
    }

    /// Enforce score bounds and the symbol_sentiments ⊆ symbols invariant.
    pub fn normalized(mut self) -> Self {
        self.score = clamp_score(self.score);
        for v in self.symbol_sentiments.values_mut() {
            *v = clamp_score(*v);
        }
        let symbols = std::mem::take(&mut self.symbols);
        let mut seen = std::collections::HashSet::new();
        self.symbols = symbols
            .into_iter()
            .filter(|s| seen.insert(s.clone()))
            .collect();
        self.symbol_sentiments
            .retain(|ticker, _| self.symbols.iter().any(|s| s == ticker));
        self
    }
}
