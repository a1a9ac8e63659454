//! 结构化购买需求
//!
//! RequirementSpec 是 LLM 从自然语言中抽取出的检索意图，约束为固定
//! schema 后才允许进入检索节点。价格区间在构造与反序列化时统一校验
//! min ≤ max。

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 商品成色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductCondition {
    New,
    LikeNew,
    Good,
    Fair,
    Refurbished,
}

/// 目标交易市场
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Amazon,
    Walmart,
    Ebay,
    Kroger,
    Target,
}

impl std::fmt::Display for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Marketplace::Amazon => write!(f, "amazon"),
            Marketplace::Walmart => write!(f, "walmart"),
            Marketplace::Ebay => write!(f, "ebay"),
            Marketplace::Kroger => write!(f, "kroger"),
            Marketplace::Target => write!(f, "target"),
        }
    }
}

fn default_marketplaces() -> Vec<Marketplace> {
    vec![Marketplace::Amazon, Marketplace::Walmart]
}

fn default_currency() -> String {
    "USD".to_string()
}

/// 价格区间过滤条件
///
/// 不变式：min 与 max 同时存在时 min ≤ max。通过 `try_from` 在
/// 反序列化路径上同样生效，LLM 产出的非法区间在进入状态机前即被拒绝。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "RawPriceFilter")]
pub struct PriceFilter {
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Deserialize, JsonSchema)]
struct RawPriceFilter {
    min: Option<f64>,
    max: Option<f64>,
    #[serde(default = "default_currency")]
    currency: String,
}

impl TryFrom<RawPriceFilter> for PriceFilter {
    type Error = String;

    fn try_from(raw: RawPriceFilter) -> Result<Self, Self::Error> {
        PriceFilter::new(raw.min, raw.max, raw.currency)
    }
}

impl PriceFilter {
    pub fn new(min: Option<f64>, max: Option<f64>, currency: String) -> Result<Self, String> {
        if let Some(v) = min {
            if v < 0.0 {
                return Err(format!("price.min must be non-negative, got {}", v));
            }
        }
        if let Some(v) = max {
            if v < 0.0 {
                return Err(format!("price.max must be non-negative, got {}", v));
            }
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(format!(
                    "price.min ({}) must not exceed price.max ({})",
                    lo, hi
                ));
            }
        }
        Ok(Self { min, max, currency })
    }

    pub fn max_only(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
            currency: default_currency(),
        }
    }

    /// 价格是否落在区间内（开区间端视为不限）
    pub fn contains(&self, price: f64) -> bool {
        if let Some(lo) = self.min {
            if price < lo {
                return false;
            }
        }
        if let Some(hi) = self.max {
            if price > hi {
                return false;
            }
        }
        true
    }
}

/// 结构化检索意图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequirementSpec {
    /// 商品类别，如 "laptop"、"phone"
    pub product_type: String,
    /// 具体属性约束（ram_gb、color 等自由键值）
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// 其他检索过滤条件
    #[serde(default)]
    pub filters: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceFilter>,
    /// 品牌偏好，按优先级排列
    #[serde(default)]
    pub brand_preferences: Vec<String>,
    /// 最低评分（0-5）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ProductCondition>,
    #[serde(default = "default_marketplaces")]
    pub marketplaces: Vec<Marketplace>,
}

impl RequirementSpec {
    pub fn new(product_type: impl Into<String>) -> Self {
        Self {
            product_type: product_type.into(),
            attributes: HashMap::new(),
            filters: HashMap::new(),
            price: None,
            brand_preferences: Vec::new(),
            rating_min: None,
            condition: None,
            marketplaces: default_marketplaces(),
        }
    }

    /// 是否具备至少一个有意义的约束（预算 / 品牌 / 评分 / 成色 / 属性）
    ///
    /// 仅有 product_type 的需求视为信息不足，需要澄清。
    pub fn has_meaningful_constraint(&self) -> bool {
        let price_ok = self
            .price
            .as_ref()
            .map(|p| p.min.is_some() || p.max.is_some())
            .unwrap_or(false);
        price_ok
            || !self.brand_preferences.is_empty()
            || self.rating_min.is_some()
            || self.condition.is_some()
            || !self.attributes.is_empty()
    }

    pub fn has_product_type(&self) -> bool {
        !self.product_type.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_filter_rejects_inverted_range() {
        let err = PriceFilter::new(Some(500.0), Some(100.0), "USD".to_string());
        assert!(err.is_err());
    }

    #[test]
    fn price_filter_rejects_negative() {
        assert!(PriceFilter::new(Some(-1.0), None, "USD".to_string()).is_err());
    }

    #[test]
    fn price_filter_deserialization_enforces_invariant() {
        let bad: Result<PriceFilter, _> =
            serde_json::from_str(r#"{"min": 1200, "max": 300, "currency": "USD"}"#);
        assert!(bad.is_err());

        let ok: PriceFilter = serde_json::from_str(r#"{"max": 1000}"#).unwrap();
        assert_eq!(ok.max, Some(1000.0));
        assert_eq!(ok.currency, "USD");
    }

    #[test]
    fn price_filter_contains() {
        let f = PriceFilter::new(Some(100.0), Some(500.0), "USD".to_string()).unwrap();
        assert!(f.contains(100.0));
        assert!(f.contains(500.0));
        assert!(!f.contains(99.9));
        assert!(!f.contains(500.1));
    }

    #[test]
    fn meaningful_constraint_detection() {
        let mut spec = RequirementSpec::new("phone");
        assert!(!spec.has_meaningful_constraint());

        spec.price = Some(PriceFilter::max_only(800.0));
        assert!(spec.has_meaningful_constraint());
    }

    #[test]
    fn spec_round_trips_with_defaults() {
        let spec: RequirementSpec = serde_json::from_str(
            r#"{"product_type": "laptop", "price": {"max": 1000}}"#,
        )
        .unwrap();
        assert_eq!(spec.product_type, "laptop");
        assert_eq!(
            spec.marketplaces,
            vec![Marketplace::Amazon, Marketplace::Walmart]
        );
    }
}
