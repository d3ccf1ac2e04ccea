//! Stock financial-analysis templates.
//!
//! Agent ids name worker capabilities; deployments register a dispatcher
//! for each one they use (see [`crate::dispatch::registry::AgentRegistry`]).

use std::time::Duration;

use crate::template::{StepDefinition, WorkflowTemplate};

pub const COMPREHENSIVE_ANALYSIS: &str = "comprehensive_analysis";
pub const RISK_ASSESSMENT: &str = "risk_assessment";
pub const INVESTMENT_RESEARCH: &str = "investment_research";
pub const ESG_EVALUATION: &str = "esg_evaluation";

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

fn step(name: &str, agent_id: &str, deps: &[&str], timeout_minutes: u64) -> StepDefinition {
    StepDefinition::new(name, agent_id)
        .with_dependencies(deps.iter().copied())
        .with_timeout(minutes(timeout_minutes))
}

/// All stock templates, in a stable order.
pub fn templates() -> Vec<WorkflowTemplate> {
    vec![
        comprehensive_analysis(),
        risk_assessment(),
        investment_research(),
        esg_evaluation(),
    ]
}

pub fn comprehensive_analysis() -> WorkflowTemplate {
    let steps = [
        step("data_extraction", "data_extraction_agent", &[], 5),
        step("data_validation", "data_validation_agent", &["data_extraction"], 3),
        step("financial_analysis", "financial_analysis_agent", &["data_validation"], 8),
        step("risk_assessment", "risk_assessment_agent", &["financial_analysis"], 6),
        step("market_analysis", "market_analysis_agent", &["data_validation"], 5),
        step("industry_analysis", "industry_expert_agent", &["market_analysis"], 4),
        step(
            "benchmarking",
            "benchmarking_agent",
            &["financial_analysis", "industry_analysis"],
            5,
        ),
        step("esg_analysis", "esg_analysis_agent", &["data_validation"], 6),
        step("technical_analysis", "technical_analysis_agent", &["market_analysis"], 4),
        step(
            "forecasting",
            "forecasting_agent",
            &["financial_analysis", "market_analysis"],
            7,
        ),
        step(
            "compliance_check",
            "compliance_agent",
            &["financial_analysis", "risk_assessment"],
            5,
        ),
        step(
            "recommendations",
            "recommendation_agent",
            &["benchmarking", "forecasting", "compliance_check"],
            6,
        ),
        step("quality_assurance", "quality_assurance_agent", &["recommendations"], 4),
        step("report_generation", "report_generation_agent", &["quality_assurance"], 8),
    ];

    steps.into_iter().fold(
        WorkflowTemplate::new(COMPREHENSIVE_ANALYSIS, "Comprehensive Financial Analysis")
            .with_description(
                "Full financial analysis covering every aspect of a company or investment",
            )
            .with_estimated_duration(minutes(45)),
        WorkflowTemplate::with_step,
    )
}

pub fn risk_assessment() -> WorkflowTemplate {
    let steps = [
        step("data_extraction", "data_extraction_agent", &[], 4),
        step("data_validation", "data_validation_agent", &["data_extraction"], 3),
        step("financial_analysis", "financial_analysis_agent", &["data_validation"], 6),
        step("risk_assessment", "risk_assessment_agent", &["financial_analysis"], 8),
        step("compliance_check", "compliance_agent", &["risk_assessment"], 4),
        step("recommendations", "recommendation_agent", &["compliance_check"], 5),
        step("report_generation", "report_generation_agent", &["recommendations"], 6),
    ];

    steps.into_iter().fold(
        WorkflowTemplate::new(RISK_ASSESSMENT, "Specialized Risk Assessment")
            .with_description("Financial, operational and market risk assessment")
            .with_estimated_duration(minutes(25)),
        WorkflowTemplate::with_step,
    )
}

pub fn investment_research() -> WorkflowTemplate {
    let steps = [
        step("data_extraction", "data_extraction_agent", &[], 4),
        step("market_analysis", "market_analysis_agent", &["data_extraction"], 6),
        step("industry_analysis", "industry_expert_agent", &["market_analysis"], 7),
        step("regional_analysis", "regional_analysis_agent", &["market_analysis"], 5),
        step("technical_analysis", "technical_analysis_agent", &["market_analysis"], 5),
        step("benchmarking", "benchmarking_agent", &["industry_analysis"], 6),
        step(
            "forecasting",
            "forecasting_agent",
            &["benchmarking", "technical_analysis"],
            8,
        ),
        step("recommendations", "recommendation_agent", &["forecasting"], 6),
        step("report_generation", "report_generation_agent", &["recommendations"], 8),
    ];

    steps.into_iter().fold(
        WorkflowTemplate::new(INVESTMENT_RESEARCH, "Advanced Investment Research")
            .with_description("Investment research with sector analysis and peer comparison")
            .with_estimated_duration(minutes(35)),
        WorkflowTemplate::with_step,
    )
}

pub fn esg_evaluation() -> WorkflowTemplate {
    let steps = [
        step("data_extraction", "data_extraction_agent", &[], 3),
        step("esg_analysis", "esg_analysis_agent", &["data_extraction"], 10),
        step("compliance_check", "compliance_agent", &["esg_analysis"], 4),
        step("recommendations", "recommendation_agent", &["compliance_check"], 5),
        step("report_generation", "report_generation_agent", &["recommendations"], 6),
    ];

    steps.into_iter().fold(
        WorkflowTemplate::new(ESG_EVALUATION, "ESG Sustainability Evaluation")
            .with_description("Environmental, social and governance performance evaluation")
            .with_estimated_duration(minutes(20)),
        WorkflowTemplate::with_step,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_builtin_templates_validate() {
        for template in templates() {
            assert!(template.validate().is_ok(), "{} failed validation", template.id);
        }
    }

    #[test]
    fn test_step_counts() {
        assert_eq!(comprehensive_analysis().steps.len(), 14);
        assert_eq!(risk_assessment().steps.len(), 7);
        assert_eq!(investment_research().steps.len(), 9);
        assert_eq!(esg_evaluation().steps.len(), 5);
    }

    #[test]
    fn test_comprehensive_analysis_layering() {
        let waves = comprehensive_analysis().dependency_graph().waves().unwrap();
        assert_eq!(waves[0], vec!["data_extraction".to_string()]);
        assert_eq!(waves[1], vec!["data_validation".to_string()]);
        assert_eq!(
            waves[2],
            vec![
                "financial_analysis".to_string(),
                "market_analysis".to_string(),
                "esg_analysis".to_string(),
            ]
        );
        assert_eq!(waves.last().unwrap(), &vec!["report_generation".to_string()]);
    }

    #[test]
    fn test_timeouts_in_minutes() {
        let esg = esg_evaluation();
        assert_eq!(esg.step("esg_analysis").unwrap().timeout, Duration::from_secs(600));
        assert_eq!(esg.estimated_duration, Duration::from_secs(20 * 60));
    }
}
