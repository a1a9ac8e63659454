//! 判定节点提示词
//!
//! 提示词要求模型只输出 JSON；需求抽取节点把 RequirementSpec 的
//! JSON Schema 内嵌进提示词以约束输出结构。

use schemars::schema_for;

use crate::model::{ImageAttributes, RequirementSpec};

pub fn need_media_ops(message: &str, audio_count: usize, image_count: usize) -> String {
    format!(
        "You are analyzing a shopping request to decide whether attached media must be processed.\n\
         \n\
         User message: {message}\n\
         Attached media: {audio_count} audio file(s), {image_count} image(s)\n\
         \n\
         Rules:\n\
         1. Attached audio MUST be transcribed to understand the spoken request.\n\
         2. Analyze an image only when it likely shows the product or visual details the user refers to.\n\
         3. If the text alone is clear and complete, skip media processing.\n\
         \n\
         Respond ONLY with valid JSON:\n\
         {{\"need_stt\": true/false, \"need_vision\": true/false, \"reasoning\": \"brief explanation\"}}"
    )
}

pub fn build_requirement(
    message: &str,
    transcript: Option<&str>,
    image_attributes: Option<&ImageAttributes>,
    current_spec: Option<&RequirementSpec>,
) -> String {
    let schema = schema_for!(RequirementSpec);
    let schema_json = serde_json::to_string_pretty(&schema).unwrap_or_default();

    let transcript_section = match transcript {
        Some(t) if !t.is_empty() => format!("Audio transcript: {t}\n"),
        _ => String::new(),
    };
    let image_section = match image_attributes {
        Some(attrs) if !attrs.is_empty() => format!(
            "Image analysis: labels={:?}, text={:?}, objects={:?}, colors={:?}\n",
            attrs.labels, attrs.text, attrs.objects, attrs.colors
        ),
        _ => String::new(),
    };
    let current = current_spec
        .and_then(|s| serde_json::to_string(s).ok())
        .unwrap_or_else(|| "(none)".to_string());

    format!(
        "You convert natural language into a structured product search specification.\n\
         \n\
         User request: {message}\n\
         {transcript_section}{image_section}\
         Previous specification: {current}\n\
         \n\
         If a previous specification exists, MERGE the new information into it; do not\n\
         drop fields unless the user explicitly contradicts them. If unsure about a\n\
         value, omit it rather than guessing.\n\
         \n\
         Respond ONLY with a JSON object conforming to this schema:\n\
         {schema_json}"
    )
}

pub fn need_clarify(spec_json: &str, clarification_count: u32) -> String {
    format!(
        "You are evaluating whether we have enough information to search for products.\n\
         \n\
         Specification so far:\n{spec_json}\n\
         Clarifying questions already asked: {clarification_count} (max allowed: 2)\n\
         \n\
         Guidelines:\n\
         1. A clear product type is required to search.\n\
         2. At least one constraint (price range, brand, or key feature) should be present.\n\
         3. Do not ask for clarification when the information is already sufficient.\n\
         \n\
         Respond ONLY with valid JSON:\n\
         {{\"needs_clarification\": true/false, \"reason\": \"what is missing or why we can proceed\", \"confidence\": 0.0-1.0}}"
    )
}

pub fn ask_clarifying(
    message: &str,
    spec_json: &str,
    reason: &str,
    clarification_count: u32,
) -> String {
    format!(
        "You are a helpful shopping assistant asking ONE clarifying question.\n\
         \n\
         User's request: {message}\n\
         Current specification: {spec_json}\n\
         What is missing or unclear: {reason}\n\
         Question {n} of 2.\n\
         \n\
         Ask about the single most important missing piece (product type > budget > key\n\
         feature), keep it short and friendly, and offer a few tappable suggestions.\n\
         \n\
         Respond ONLY with valid JSON:\n\
         {{\"question\": \"...\", \"suggestions\": [\"...\", \"...\"], \"context\": \"...\"}}",
        n = clarification_count + 1
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_prompt_embeds_schema_and_prior_spec() {
        let spec = RequirementSpec::new("laptop");
        let prompt = build_requirement("something faster", None, None, Some(&spec));
        assert!(prompt.contains("product_type"));
        assert!(prompt.contains("laptop"));
        assert!(prompt.contains("MERGE"));
    }

    #[test]
    fn clarify_prompt_counts_from_one() {
        let prompt = ask_clarifying("phone", "{}", "missing budget", 0);
        assert!(prompt.contains("Question 1 of 2"));
    }
}
