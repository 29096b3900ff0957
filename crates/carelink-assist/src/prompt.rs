//! System prompt rendering for the suggestion provider.

use carelink_core::models::{FollowUpRecord, MedicalRecord, PatientProfile};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Demographics, allergies and chronic conditions, then the most recent
/// clinical and follow-up records in fenced blocks.
pub fn render_system_prompt(
    patient: &PatientProfile,
    medical_records: &[MedicalRecord],
    follow_ups: &[FollowUpRecord],
) -> String {
    let mut prompt = format!(
        "你是一位专业的医生，请基于以下患者信息提供专业的建议：\n\n\
         患者信息：\n\
         - 姓名：{}\n\
         - 性别：{}\n\
         - 年龄：{}岁\n\
         - 血型：{}\n\
         - 过敏史：{}\n\
         - 慢性病史：{}\n\n\
         请根据患者的问题和历史对话，给出专业、准确、易懂的建议。\n\
         注意：\n\
         1. 考虑患者的年龄和性别特点\n\
         2. 特别注意患者的过敏史和慢性病史\n\
         3. 使用患者容易理解的语言\n\
         4. 以医生的口吻去回答患者",
        patient.name,
        patient.gender,
        patient.age,
        patient.blood_type,
        join_or_none(&patient.allergies),
        join_or_none(&patient.chronic_diseases),
    );

    if !medical_records.is_empty() {
        prompt.push_str("\n\n近期诊疗记录：\n");
        for record in medical_records {
            prompt.push_str(&format!(
                "```诊疗记录\n诊断日期: {}\n诊断结果: {}\n治疗方案: {}\n处方: {}\n备注: {}\n```\n",
                record.diagnosis_date.format(DATE_FORMAT),
                record.diagnosis,
                record.treatment,
                record.prescription,
                record.notes,
            ));
        }
    }

    if !follow_ups.is_empty() {
        prompt.push_str("\n近期随访记录：\n");
        for record in follow_ups {
            prompt.push_str(&format!(
                "```随访记录: {}\n随访日期: {}\n随访内容: {}\n```\n",
                record.title,
                record.follow_up_date.format(DATE_FORMAT),
                record.content,
            ));
        }
    }

    prompt
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "无".to_string()
    } else {
        items.join("、")
    }
}
