use serde::{Deserialize, Serialize};

/// Model tiers available for fix suggestions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// Fast, cheap model for simple, high-volume failures (gpt-oss-120b)
    Speed,
    /// Good reasoning at medium cost (claude-sonnet-4.5)
    #[default]
    Balanced,
    /// Best reasoning for hard failures (claude-opus-4.5)
    Smart,
}

/// Maximum tokens for all model tiers
const MODEL_MAX_TOKENS: u32 = 16384;

impl Model {
    pub fn id(&self) -> &'static str {
        match self {
            Model::Speed => "openai/gpt-oss-120b:nitro",
            Model::Balanced => "anthropic/claude-sonnet-4.5:nitro",
            Model::Smart => "anthropic/claude-opus-4.5:nitro",
        }
    }

    pub fn max_tokens(&self) -> u32 {
        MODEL_MAX_TOKENS
    }

    /// Whether this model supports JSON response formatting.
    pub fn supports_json_mode(&self) -> bool {
        matches!(self, Model::Speed | Model::Balanced | Model::Smart)
    }
}

/// API usage information from OpenRouter
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    /// Actual cost in USD as reported by OpenRouter (`total_cost` in the usage object)
    #[serde(default, alias = "total_cost")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Reported cost, or 0.0 when OpenRouter did not include one. Never estimated.
    pub fn cost(&self) -> f64 {
        self.cost.unwrap_or(0.0)
    }

    /// Add another call's usage into this one
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.cost = match (self.cost, other.cost) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ids() {
        assert!(Model::Speed.id().contains("gpt"));
        assert!(Model::Balanced.id().contains("claude"));
        assert!(Model::Smart.id().contains("claude"));
        assert_eq!(Model::default(), Model::Balanced);
    }

    #[test]
    fn test_usage_deserialize_with_total_cost() {
        let json = r#"{"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150, "total_cost": 0.0025}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.cost(), 0.0025);
    }

    #[test]
    fn test_usage_accumulate() {
        let mut total = Usage::default();
        assert_eq!(total.cost(), 0.0);

        total.accumulate(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost: None,
        });
        assert_eq!(total.cost, None);

        total.accumulate(&Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            cost: Some(0.5),
        });
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.cost(), 0.5);
    }
}
