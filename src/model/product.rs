//! 商品结果模型

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::requirement::{Marketplace, ProductCondition, RequirementSpec};

/// 单个排序后的商品
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResult {
    pub product_id: String,
    pub marketplace: Marketplace,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ProductCondition>,
    pub availability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// 客户端跳转链接
    pub deep_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// 排序理由（面向用户的一句话说明）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_ranked: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// 检索协作服务返回的聚合结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub products: Vec<ProductResult>,
    pub total_count: usize,
    #[serde(default)]
    pub marketplaces_searched: Vec<Marketplace>,
    #[serde(default)]
    pub search_duration_ms: u64,
}

impl SearchResults {
    pub fn empty() -> Self {
        Self {
            products: Vec::new(),
            total_count: 0,
            marketplaces_searched: Vec::new(),
            search_duration_ms: 0,
        }
    }
}

/// 按固定加权打分：价格贴合度 + 评分 + 属性匹配度
///
/// 违反价格区间的商品在排序前被过滤，不参与打分。
pub fn rank_score(product: &ProductResult, spec: &RequirementSpec) -> f64 {
    let price_score = 1.0 / (1.0 + product.price.max(0.0));
    let rating_score = product.rating.unwrap_or(0.0) / 5.0;
    let attr_score = attribute_match_ratio(product, spec);
    price_score * 0.35 + rating_score * 0.45 + attr_score * 0.20
}

/// 需求属性键在商品属性中出现的比例（无需求属性时记 0）
fn attribute_match_ratio(product: &ProductResult, spec: &RequirementSpec) -> f64 {
    if spec.attributes.is_empty() {
        return 0.0;
    }
    let hits = spec
        .attributes
        .keys()
        .filter(|k| product.attributes.contains_key(*k))
        .count();
    hits as f64 / spec.attributes.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, price: f64, rating: Option<f64>) -> ProductResult {
        ProductResult {
            product_id: id.to_string(),
            marketplace: Marketplace::Amazon,
            title: format!("Product {}", id),
            description: None,
            price,
            currency: "USD".to_string(),
            rating,
            review_count: None,
            condition: None,
            availability: "in_stock".to_string(),
            image_url: None,
            deep_link: format!("https://example.com/{}", id),
            marketplace_url: None,
            seller_name: None,
            attributes: HashMap::new(),
            why_ranked: None,
        }
    }

    #[test]
    fn higher_rating_wins_at_similar_price() {
        let spec = RequirementSpec::new("laptop");
        let a = product("a", 900.0, Some(4.8));
        let b = product("b", 900.0, Some(3.1));
        assert!(rank_score(&a, &spec) > rank_score(&b, &spec));
    }

    #[test]
    fn attribute_match_lifts_score() {
        let mut spec = RequirementSpec::new("laptop");
        spec.attributes
            .insert("ram_gb".to_string(), serde_json::json!(16));

        let mut matching = product("a", 900.0, Some(4.0));
        matching
            .attributes
            .insert("ram_gb".to_string(), serde_json::json!(16));
        let plain = product("b", 900.0, Some(4.0));

        assert!(rank_score(&matching, &spec) > rank_score(&plain, &spec));
    }
}
