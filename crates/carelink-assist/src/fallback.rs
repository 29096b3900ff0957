//! Static replies used when the provider fails or misses its deadline.

use carelink_core::models::SuggestionCategory;

/// A canned four-point reply selected by keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FallbackTemplate {
    pub keywords: &'static [&'static str],
    pub reply: &'static str,
    pub category: SuggestionCategory,
}

/// Model name recorded on suggestions that came from a template.
pub const FALLBACK_MODEL: &str = "fallback-template";

/// Checked in order; the first template with a matching keyword wins.
const TEMPLATES: &[FallbackTemplate] = &[
    FallbackTemplate {
        keywords: &["胸痛", "chest pain"],
        reply: "建议回复：1. 疼痛的具体位置在哪里？\n2. 是否伴有出汗、呼吸困难等症状？\n3. 疼痛持续多长时间？\n4. 是否服用了硝酸甘油？如有不适请及时就医。",
        category: SuggestionCategory::Urgent,
    },
    FallbackTemplate {
        keywords: &["血糖", "blood sugar", "glucose"],
        reply: "建议回复：1. 请告知您最近的血糖监测值\n2. 您是否按时服用降糖药物？\n3. 最近的饮食情况如何？\n4. 有进行运动锻炼吗？",
        category: SuggestionCategory::Medication,
    },
    FallbackTemplate {
        keywords: &["血压", "blood pressure"],
        reply: "建议回复：1. 请提供您最近的血压测量值\n2. 是否规律服用降压药？\n3. 有注意限制盐分摄入吗？\n4. 作息时间是否规律？",
        category: SuggestionCategory::Medication,
    },
    FallbackTemplate {
        keywords: &["头痛", "headache"],
        reply: "建议回复：1. 头痛的部位在哪里？\n2. 是持续性还是间歇性疼痛？\n3. 是否测量了血压？\n4. 有其他不适症状吗？",
        category: SuggestionCategory::Visit,
    },
];

const DEFAULT_TEMPLATE: FallbackTemplate = FallbackTemplate {
    keywords: &[],
    reply: "建议回复：1. 请详细描述您的具体症状\n2. 症状持续多长时间了？\n3. 是否进行过相关检查？\n4. 目前是否在服用任何药物？",
    category: SuggestionCategory::Visit,
};

/// Pick the template for a patient message. Never returns an empty reply.
pub fn fallback_for(content: &str) -> &'static FallbackTemplate {
    let lowered = content.to_lowercase();
    TEMPLATES
        .iter()
        .find(|t| t.keywords.iter().any(|k| lowered.contains(k)))
        .unwrap_or(&DEFAULT_TEMPLATE)
}
