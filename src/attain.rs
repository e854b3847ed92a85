use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::tools::{AssessmentTool, ToolKind};

/// outcomeId -> value on the 0-3 rating scale.
pub type OutcomeMap = BTreeMap<String, f64>;

/// coId -> outcomeId -> correlation strength (1-3).
pub type CourseMatrix = BTreeMap<String, OutcomeMap>;

/// Outcomes whose total attainment falls below this are reported for
/// improvement actions.
pub const IMPROVEMENT_THRESHOLD: f64 = 1.9;

/// Normalization factor for mapping ratings onto percentages (0-3 scale).
pub const RATING_SCALE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelThresholds {
    pub level3: f64,
    pub level2: f64,
    pub level1: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            level3: 70.0,
            level2: 60.0,
            level1: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalWeightage {
    pub direct: f64,
    pub indirect: f64,
}

impl Default for FinalWeightage {
    fn default() -> Self {
        Self {
            direct: 80.0,
            indirect: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectSplit {
    pub cie: f64,
    pub see: f64,
}

impl Default for DirectSplit {
    fn default() -> Self {
        Self {
            cie: 50.0,
            see: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttainmentRules {
    #[serde(default = "default_pass_threshold")]
    pub student_pass_threshold: f64,
    #[serde(default = "default_max_level")]
    pub max_attainment_level: f64,
    #[serde(default)]
    pub level_thresholds: LevelThresholds,
    #[serde(default)]
    pub final_weightage: FinalWeightage,
    #[serde(default)]
    pub direct_split: DirectSplit,
}

fn default_pass_threshold() -> f64 {
    50.0
}

fn default_max_level() -> f64 {
    3.0
}

impl Default for AttainmentRules {
    fn default() -> Self {
        Self {
            student_pass_threshold: default_pass_threshold(),
            max_attainment_level: default_max_level(),
            level_thresholds: LevelThresholds::default(),
            final_weightage: FinalWeightage::default(),
            direct_split: DirectSplit::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndirectTool {
    pub id: String,
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default)]
    pub attainment_rules: AttainmentRules,
    #[serde(default = "default_indirect_tools")]
    pub indirect_tools: Vec<IndirectTool>,
}

fn default_indirect_tools() -> Vec<IndirectTool> {
    vec![
        IndirectTool {
            id: "exit".to_string(),
            name: "Course Exit Survey".to_string(),
            weight: 40.0,
        },
        IndirectTool {
            id: "employer".to_string(),
            name: "Employer Survey".to_string(),
            weight: 30.0,
        },
        IndirectTool {
            id: "alumni".to_string(),
            name: "Alumni Survey".to_string(),
            weight: 30.0,
        },
    ]
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            attainment_rules: AttainmentRules::default(),
            indirect_tools: default_indirect_tools(),
        }
    }
}

impl GlobalConfig {
    /// Weight sums are hard invariants; violations block the save.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let fw = &self.attainment_rules.final_weightage;
        if (fw.direct + fw.indirect - 100.0).abs() > 1e-9 {
            problems.push(format!(
                "final weightage must sum to 100 (direct {} + indirect {})",
                fw.direct, fw.indirect
            ));
        }
        let ds = &self.attainment_rules.direct_split;
        if (ds.cie + ds.see - 100.0).abs() > 1e-9 {
            problems.push(format!(
                "direct split must sum to 100 (CIE {} + SEE {})",
                ds.cie, ds.see
            ));
        }
        problems
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySet {
    #[serde(default)]
    pub exit_survey: OutcomeMap,
    #[serde(default)]
    pub employer_survey: OutcomeMap,
    #[serde(default)]
    pub alumni_survey: OutcomeMap,
}

/// Per-course outcome averages: for each outcome, the mean of the non-zero
/// correlation strengths across the course's COs. Outcomes no CO maps to are
/// left out entirely rather than reported as zero.
pub fn course_outcome_averages(matrix: &CourseMatrix, outcome_ids: &[String]) -> OutcomeMap {
    let mut averages = OutcomeMap::new();
    for outcome_id in outcome_ids {
        let mut sum = 0.0;
        let mut count = 0usize;
        for co_map in matrix.values() {
            if let Some(&v) = co_map.get(outcome_id) {
                if v > 0.0 {
                    sum += v;
                    count += 1;
                }
            }
        }
        if count > 0 {
            averages.insert(outcome_id.clone(), sum / count as f64);
        }
    }
    averages
}

/// Direct attainment: mean of the per-course averages, counting only courses
/// that produced an average for the outcome.
pub fn direct_attainment(per_course: &[OutcomeMap], outcome_ids: &[String]) -> OutcomeMap {
    let mut direct = OutcomeMap::new();
    for outcome_id in outcome_ids {
        let mut sum = 0.0;
        let mut count = 0usize;
        for averages in per_course {
            if let Some(&v) = averages.get(outcome_id) {
                sum += v;
                count += 1;
            }
        }
        if count > 0 {
            direct.insert(outcome_id.clone(), sum / count as f64);
        }
    }
    direct
}

/// Indirect attainment: mean of the non-zero survey ratings. The divisor is
/// the number of sources that actually rated the outcome; zero sources yields
/// zero, never NaN.
pub fn indirect_attainment(surveys: &SurveySet, outcome_ids: &[String]) -> OutcomeMap {
    let mut indirect = OutcomeMap::new();
    for outcome_id in outcome_ids {
        let ratings = [
            surveys.exit_survey.get(outcome_id).copied().unwrap_or(0.0),
            surveys
                .employer_survey
                .get(outcome_id)
                .copied()
                .unwrap_or(0.0),
            surveys.alumni_survey.get(outcome_id).copied().unwrap_or(0.0),
        ];
        let total: f64 = ratings.iter().sum();
        let divisor = ratings.iter().filter(|&&v| v != 0.0).count();
        let value = if divisor > 0 {
            total / divisor as f64
        } else {
            0.0
        };
        indirect.insert(outcome_id.clone(), value);
    }
    indirect
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub direct: OutcomeMap,
    pub indirect: OutcomeMap,
    pub weighted_direct: OutcomeMap,
    pub weighted_indirect: OutcomeMap,
    pub total: OutcomeMap,
    pub percentage: OutcomeMap,
}

/// Combines direct and indirect attainment with the configured weights.
/// Missing direct values resolve to 0 before weighting so every requested
/// outcome appears in the totals.
pub fn evaluation_summary(
    direct: &OutcomeMap,
    indirect: &OutcomeMap,
    rules: &AttainmentRules,
    outcome_ids: &[String],
) -> EvaluationSummary {
    let w_direct = rules.final_weightage.direct / 100.0;
    let w_indirect = rules.final_weightage.indirect / 100.0;

    let mut weighted_direct = OutcomeMap::new();
    let mut weighted_indirect = OutcomeMap::new();
    let mut total = OutcomeMap::new();
    let mut percentage = OutcomeMap::new();

    for outcome_id in outcome_ids {
        let a = direct.get(outcome_id).copied().unwrap_or(0.0);
        let b = indirect.get(outcome_id).copied().unwrap_or(0.0);
        let c = a * w_direct;
        let d = b * w_indirect;
        weighted_direct.insert(outcome_id.clone(), c);
        weighted_indirect.insert(outcome_id.clone(), d);
        total.insert(outcome_id.clone(), c + d);
        percentage.insert(outcome_id.clone(), (c + d) / RATING_SCALE * 100.0);
    }

    EvaluationSummary {
        direct: direct.clone(),
        indirect: indirect.clone(),
        weighted_direct,
        weighted_indirect,
        total,
        percentage,
    }
}

const SUGGESTIONS: &[(&str, &[&str])] = &[
    (
        "PO1",
        &[
            "Conduct remedial classes on fundamental engineering concepts.",
            "Introduce technical quizzes to reinforce basic knowledge.",
        ],
    ),
    (
        "PO2",
        &[
            "Increase problem-solving sessions during tutorials.",
            "Assign complex case studies requiring analytical thinking.",
        ],
    ),
    (
        "PO3",
        &[
            "Include more design-oriented projects in the curriculum.",
            "Organize workshops on system design and development.",
        ],
    ),
    (
        "PO4",
        &[
            "Encourage participation in research-based projects.",
            "Introduce mini-projects requiring data analysis and interpretation.",
        ],
    ),
    (
        "PO5",
        &[
            "Integrate modern tools into laboratory sessions.",
            "Conduct training sessions on industry-standard software.",
        ],
    ),
    (
        "PO6",
        &[
            "Organize guest lectures on the role of engineers in society.",
            "Include social impact analysis in project reports.",
        ],
    ),
    (
        "PO7",
        &[
            "Promote projects focused on sustainability and environment.",
            "Introduce modules on green technology.",
        ],
    ),
    (
        "PO8",
        &[
            "Conduct workshops on professional ethics and cyber laws.",
            "Include case studies on ethical dilemmas in engineering.",
        ],
    ),
    (
        "PO9",
        &[
            "Assign group projects to enhance team dynamics.",
            "Encourage participation in team-based hackathons.",
        ],
    ),
    (
        "PO10",
        &[
            "Organize soft skills training and presentation sessions.",
            "Mandate technical report writing for all major projects.",
        ],
    ),
    (
        "PO11",
        &[
            "Introduce basics of project management and finance in projects.",
            "Encourage students to plan project budgets and timelines.",
        ],
    ),
    (
        "PO12",
        &[
            "Encourage usage of MOOCs for self-learning.",
            "Promote membership in professional bodies.",
        ],
    ),
    (
        "PSO1",
        &[
            "Strengthen coding bootcamps and algorithmic problem solving.",
            "Host hackathons focused on domain-specific challenges.",
        ],
    ),
    (
        "PSO2",
        &[
            "Facilitate internships with core industry partners.",
            "Focus on end-to-end software development lifecycles in projects.",
        ],
    ),
];

const GENERIC_SUGGESTIONS: &[&str] = &[
    "Review curriculum gaps for this outcome.",
    "Consult senior faculty for pedagogical improvements.",
];

pub fn improvement_suggestions(outcome_id: &str) -> &'static [&'static str] {
    SUGGESTIONS
        .iter()
        .find(|(id, _)| *id == outcome_id)
        .map(|(_, s)| *s)
        .unwrap_or(GENERIC_SUGGESTIONS)
}

/// Maps a pass percentage onto an attainment level, checking the highest
/// threshold first.
pub fn level_for(percentage: f64, thresholds: &LevelThresholds) -> i64 {
    let mut ladder = [
        (3i64, thresholds.level3),
        (2, thresholds.level2),
        (1, thresholds.level1),
    ];
    ladder.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (level, threshold) in ladder {
        if percentage >= threshold {
            return level;
        }
    }
    0
}

const ABSENT_MARKERS: &[&str] = &["AB", "ABSENT", "A", "NA", "-"];

/// Entry markers for absence ("AB", "NA", ...) exclude the attempt instead of
/// counting a zero.
pub fn is_absent_value(value: &serde_json::Value) -> bool {
    match value.as_str() {
        Some(s) => ABSENT_MARKERS.contains(&s.trim().to_uppercase().as_str()),
        None => false,
    }
}

pub fn numeric_score(value: &serde_json::Value) -> Option<f64> {
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    value.as_str().and_then(|s| s.trim().parse::<f64>().ok())
}

fn normalize_name(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Clone)]
pub struct MarkRecord {
    pub student_id: String,
    pub assessment_name: String,
    pub improvement_test_for: Option<String>,
    pub scores: BTreeMap<String, serde_json::Value>,
}

impl MarkRecord {
    fn total_over(&self, co_ids: &[&String]) -> f64 {
        self.scores
            .iter()
            .filter(|(k, _)| !k.starts_with('_') && co_ids.iter().any(|c| *c == *k))
            .filter_map(|(_, v)| numeric_score(v))
            .sum()
    }

    fn improves(&self, tool_name: &str) -> bool {
        let target = normalize_name(tool_name);
        if let Some(t) = &self.improvement_test_for {
            if normalize_name(t) == target {
                return true;
            }
        }
        self.scores
            .get("_improvementTarget")
            .and_then(|v| v.as_str())
            .map(|t| normalize_name(t) == target)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoAttainmentRow {
    pub co: String,
    pub cie_level: i64,
    pub see_level: i64,
    pub direct_attainment: f64,
    pub indirect_attainment: f64,
    pub score_index: f64,
}

#[derive(Debug, Clone, Default)]
struct PassCounter {
    cie_attempts: usize,
    cie_passed: usize,
    see_attempts: usize,
    see_passed: usize,
}

/// Per-CO attainment from mark records: CIE and SEE pass rates become levels
/// through the configured thresholds, the direct split combines them, and the
/// course's per-CO survey map supplies the indirect term.
pub fn course_co_attainment(
    co_ids: &[String],
    tools: &[AssessmentTool],
    marks: &[MarkRecord],
    indirect_by_co: &OutcomeMap,
    rules: &AttainmentRules,
) -> Vec<CoAttainmentRow> {
    let pass_threshold = rules.student_pass_threshold;
    let see_tool = tools.iter().find(|t| t.kind == ToolKind::SemesterEndExam);
    let internal_tools: Vec<&AssessmentTool> = tools
        .iter()
        .filter(|t| {
            t.kind != ToolKind::SemesterEndExam && t.kind != ToolKind::ImprovementTest
        })
        .collect();

    let mut by_student: HashMap<&str, Vec<&MarkRecord>> = HashMap::new();
    for record in marks {
        by_student
            .entry(record.student_id.as_str())
            .or_default()
            .push(record);
    }

    let mut counters: BTreeMap<String, PassCounter> = co_ids
        .iter()
        .map(|co| (co.clone(), PassCounter::default()))
        .collect();

    for records in by_student.values() {
        if let Some(see) = see_tool {
            tally_see(see, records, co_ids, pass_threshold, &mut counters);
        }
        for tool in &internal_tools {
            tally_internal(tool, records, co_ids, pass_threshold, &mut counters);
        }
    }

    counters
        .into_iter()
        .map(|(co, counter)| {
            let cie_perc = percentage_of(counter.cie_passed, counter.cie_attempts);
            let see_perc = percentage_of(counter.see_passed, counter.see_attempts);
            let cie_level = level_for(cie_perc, &rules.level_thresholds);
            let see_level = level_for(see_perc, &rules.level_thresholds);

            let direct = cie_level as f64 * (rules.direct_split.cie / 100.0)
                + see_level as f64 * (rules.direct_split.see / 100.0);
            // COs never surveyed default to full marks rather than dragging
            // the index down before any feedback exists.
            let indirect = indirect_by_co.get(&co).copied().unwrap_or(RATING_SCALE);
            let score_index = direct * (rules.final_weightage.direct / 100.0)
                + indirect * (rules.final_weightage.indirect / 100.0);

            CoAttainmentRow {
                co,
                cie_level,
                see_level,
                direct_attainment: direct,
                indirect_attainment: indirect,
                score_index,
            }
        })
        .collect()
}

fn percentage_of(passed: usize, attempts: usize) -> f64 {
    if attempts == 0 {
        return 0.0;
    }
    passed as f64 / attempts as f64 * 100.0
}

fn tally_see(
    see_tool: &AssessmentTool,
    records: &[&MarkRecord],
    co_ids: &[String],
    pass_threshold: f64,
    counters: &mut BTreeMap<String, PassCounter>,
) {
    let record = records.iter().find(|m| {
        m.assessment_name == see_tool.name
            || m.assessment_name == "SEE"
            || m.assessment_name == "Semester End Exam"
    });
    let Some(record) = record else {
        return;
    };
    if record.scores.is_empty() || record.scores.values().any(is_absent_value) {
        return;
    }

    let obtained: f64 = record.scores.values().filter_map(numeric_score).sum();
    let target = see_tool.max_marks * pass_threshold / 100.0;

    // SEE maps onto its distribution keys, or every CO when none are defined.
    let mapped: Vec<String> = if see_tool.co_distribution.is_empty() {
        co_ids.to_vec()
    } else {
        see_tool.co_distribution.keys().cloned().collect()
    };

    for co in mapped {
        if let Some(counter) = counters.get_mut(&co) {
            counter.see_attempts += 1;
            if obtained >= target {
                counter.see_passed += 1;
            }
        }
    }
}

fn tally_internal(
    tool: &AssessmentTool,
    records: &[&MarkRecord],
    co_ids: &[String],
    pass_threshold: f64,
    counters: &mut BTreeMap<String, PassCounter>,
) {
    let record = records.iter().find(|m| m.assessment_name == tool.name);
    let mut scores = record.map(|m| m.scores.clone()).unwrap_or_default();

    let mut distribution = tool.co_distribution.clone();
    if distribution.is_empty() && tool.max_marks > 0.0 {
        for co in co_ids {
            distribution.insert(co.clone(), tool.max_marks);
        }
    }

    // An improvement test replaces the original scores when it did better.
    let co_refs: Vec<&String> = distribution.keys().collect();
    if let Some(improvement) = records.iter().find(|m| m.improves(&tool.name)) {
        let original_total = record.map(|m| m.total_over(&co_refs)).unwrap_or(0.0);
        if improvement.total_over(&co_refs) > original_total {
            scores = improvement.scores.clone();
        }
    }

    for (co, max_val) in &distribution {
        let Some(counter) = counters.get_mut(co) else {
            continue;
        };
        let mut value = scores.get(co).cloned();
        if value.is_none() {
            // Single-component tools are often entered under one key only.
            let visible: Vec<&serde_json::Value> = scores
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(_, v)| v)
                .collect();
            if visible.len() == 1 {
                value = Some(visible[0].clone());
            }
        }
        let Some(value) = value else {
            continue;
        };
        if is_absent_value(&value) {
            continue;
        }
        if let Some(score) = numeric_score(&value) {
            counter.cie_attempts += 1;
            if score >= max_val * pass_threshold / 100.0 {
                counter.cie_passed += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoAttainmentRow {
    pub outcome: String,
    pub attained: f64,
    pub percentage: f64,
}

/// Per-course PO attainment: each CO's score index is scaled by its mapping
/// strength over the rating scale, then averaged per outcome over the COs
/// that actually map to it.
pub fn course_po_attainment(
    matrix: &CourseMatrix,
    co_rows: &[CoAttainmentRow],
) -> Vec<PoAttainmentRow> {
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    for row in co_rows {
        let Some(mappings) = matrix.get(&row.co) else {
            continue;
        };
        for (outcome_id, &strength) in mappings {
            if strength <= 0.0 {
                continue;
            }
            let actual = strength * row.score_index / RATING_SCALE;
            *sums.entry(outcome_id.clone()).or_insert(0.0) += actual;
            *counts.entry(outcome_id.clone()).or_insert(0) += 1;
        }
    }

    sums.into_iter()
        .map(|(outcome, sum)| {
            let count = counts.get(&outcome).copied().unwrap_or(1);
            let attained = sum / count as f64;
            PoAttainmentRow {
                outcome,
                attained,
                percentage: attained / RATING_SCALE * 100.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome_ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn matrix_from(entries: &[(&str, &[(&str, f64)])]) -> CourseMatrix {
        entries
            .iter()
            .map(|(co, maps)| {
                (
                    co.to_string(),
                    maps.iter().map(|(o, v)| (o.to_string(), *v)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn course_average_skips_unmapped_outcomes() {
        let matrix = matrix_from(&[
            ("CO1", &[("PO1", 3.0), ("PO2", 1.0)]),
            ("CO2", &[("PO1", 1.0)]),
        ]);
        let averages = course_outcome_averages(&matrix, &outcome_ids(&["PO1", "PO2", "PO3"]));

        assert_eq!(averages.get("PO1"), Some(&2.0));
        assert_eq!(averages.get("PO2"), Some(&1.0));
        // No CO maps to PO3: excluded, not reported as zero.
        assert_eq!(averages.get("PO3"), None);
    }

    #[test]
    fn single_course_single_co_direct_is_the_strength() {
        let matrix = matrix_from(&[("CO1", &[("PO1", 3.0), ("PO2", 1.0)])]);
        let ids = outcome_ids(&["PO1", "PO2"]);
        let per_course = vec![course_outcome_averages(&matrix, &ids)];
        let direct = direct_attainment(&per_course, &ids);
        assert_eq!(direct.get("PO1"), Some(&3.0));
    }

    #[test]
    fn direct_excludes_non_contributing_courses() {
        let ids = outcome_ids(&["PO1"]);
        let contributing = course_outcome_averages(&matrix_from(&[("CO1", &[("PO1", 2.0)])]), &ids);
        let silent = course_outcome_averages(&matrix_from(&[("CO1", &[("PO2", 3.0)])]), &ids);

        let direct = direct_attainment(&[contributing, silent], &ids);
        // Only one course has an average for PO1; the other is not zero-filled.
        assert_eq!(direct.get("PO1"), Some(&2.0));
    }

    #[test]
    fn indirect_divides_by_nonzero_source_count() {
        let mut surveys = SurveySet::default();
        surveys.exit_survey.insert("PO1".to_string(), 3.0);
        surveys.alumni_survey.insert("PO1".to_string(), 2.0);

        let indirect = indirect_attainment(&surveys, &outcome_ids(&["PO1", "PO2"]));
        assert_eq!(indirect.get("PO1"), Some(&2.5));
        // No source rated PO2.
        assert_eq!(indirect.get("PO2"), Some(&0.0));
    }

    #[test]
    fn weighted_total_matches_configured_split() {
        let mut direct = OutcomeMap::new();
        direct.insert("PO1".to_string(), 2.4);
        let mut indirect = OutcomeMap::new();
        indirect.insert("PO1".to_string(), 2.0);

        let rules = AttainmentRules::default();
        let summary = evaluation_summary(&direct, &indirect, &rules, &outcome_ids(&["PO1"]));

        let total = summary.total.get("PO1").copied().unwrap();
        assert!((total - 2.32).abs() < 1e-9);
        let pct = summary.percentage.get("PO1").copied().unwrap();
        assert!((pct - 2.32 / 3.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn attainment_values_stay_on_rating_scale() {
        let matrix = matrix_from(&[
            ("CO1", &[("PO1", 3.0), ("PO2", 3.0)]),
            ("CO2", &[("PO1", 3.0)]),
        ]);
        let ids = outcome_ids(&["PO1", "PO2"]);
        let per_course = vec![course_outcome_averages(&matrix, &ids)];
        let direct = direct_attainment(&per_course, &ids);

        let mut surveys = SurveySet::default();
        surveys.exit_survey.insert("PO1".to_string(), 3.0);
        surveys.employer_survey.insert("PO1".to_string(), 3.0);
        surveys.alumni_survey.insert("PO1".to_string(), 3.0);
        let indirect = indirect_attainment(&surveys, &ids);

        for v in direct.values().chain(indirect.values()) {
            assert!(*v >= 0.0 && *v <= 3.0);
        }
    }

    #[test]
    fn level_ladder_checks_highest_first() {
        let thresholds = LevelThresholds::default();
        assert_eq!(level_for(85.0, &thresholds), 3);
        assert_eq!(level_for(70.0, &thresholds), 3);
        assert_eq!(level_for(65.0, &thresholds), 2);
        assert_eq!(level_for(50.0, &thresholds), 1);
        assert_eq!(level_for(49.9, &thresholds), 0);
    }

    #[test]
    fn suggestions_fall_back_to_generic_list() {
        assert_eq!(improvement_suggestions("PO2").len(), 2);
        assert!(improvement_suggestions("PO2")[0].contains("problem-solving"));
        assert_eq!(improvement_suggestions("PSO9"), GENERIC_SUGGESTIONS);
    }

    #[test]
    fn absence_markers_are_case_insensitive() {
        assert!(is_absent_value(&json!("AB")));
        assert!(is_absent_value(&json!("absent")));
        assert!(is_absent_value(&json!(" na ")));
        assert!(!is_absent_value(&json!("12")));
        assert!(!is_absent_value(&json!(12)));
    }

    #[test]
    fn config_validation_flags_bad_weight_sums() {
        let mut config = GlobalConfig::default();
        assert!(config.validate().is_empty());

        config.attainment_rules.final_weightage.direct = 70.0;
        config.attainment_rules.direct_split.cie = 60.0;
        let problems = config.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("final weightage"));
        assert!(problems[1].contains("direct split"));
    }

    fn tool(name: &str, kind: ToolKind, max_marks: f64, dist: &[(&str, f64)]) -> AssessmentTool {
        AssessmentTool {
            id: name.to_string(),
            name: name.to_string(),
            kind,
            sub_type: String::new(),
            custom_name: String::new(),
            linked_assessment: String::new(),
            max_marks,
            weightage: 0.0,
            co_distribution: dist.iter().map(|(co, m)| (co.to_string(), *m)).collect(),
        }
    }

    fn mark(student: &str, assessment: &str, scores: &[(&str, f64)]) -> MarkRecord {
        MarkRecord {
            student_id: student.to_string(),
            assessment_name: assessment.to_string(),
            improvement_test_for: None,
            scores: scores
                .iter()
                .map(|(co, v)| (co.to_string(), json!(v)))
                .collect(),
        }
    }

    #[test]
    fn co_levels_reflect_pass_rates() {
        let co_ids = vec!["CO1".to_string()];
        let tools = vec![tool(
            "Internal Assessment 1",
            ToolKind::InternalAssessment,
            20.0,
            &[("CO1", 20.0)],
        )];
        // Pass mark is 10 of 20. Three of four students pass (75% -> level 3).
        let marks = vec![
            mark("s1", "Internal Assessment 1", &[("CO1", 15.0)]),
            mark("s2", "Internal Assessment 1", &[("CO1", 12.0)]),
            mark("s3", "Internal Assessment 1", &[("CO1", 10.0)]),
            mark("s4", "Internal Assessment 1", &[("CO1", 4.0)]),
        ];

        let rows = course_co_attainment(
            &co_ids,
            &tools,
            &marks,
            &OutcomeMap::new(),
            &AttainmentRules::default(),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cie_level, 3);
        assert_eq!(rows[0].see_level, 0);
        // Unsurveyed CO defaults the indirect term to the full rating.
        assert_eq!(rows[0].indirect_attainment, 3.0);
    }

    #[test]
    fn improvement_test_overrides_when_higher() {
        let co_ids = vec!["CO1".to_string()];
        let tools = vec![tool(
            "Internal Assessment 1",
            ToolKind::InternalAssessment,
            20.0,
            &[("CO1", 20.0)],
        )];
        let mut improvement = mark("s1", "Improvement Test", &[("CO1", 14.0)]);
        improvement.improvement_test_for = Some("Internal Assessment 1".to_string());
        let marks = vec![
            mark("s1", "Internal Assessment 1", &[("CO1", 4.0)]),
            improvement,
        ];

        let rows = course_co_attainment(
            &co_ids,
            &tools,
            &marks,
            &OutcomeMap::new(),
            &AttainmentRules::default(),
        );
        // 14/20 clears the 50% pass mark, so the student counts as passed.
        assert_eq!(rows[0].cie_level, 3);
    }

    #[test]
    fn absent_see_entry_is_not_an_attempt() {
        let co_ids = vec!["CO1".to_string()];
        let tools = vec![tool(
            "Semester End Exam",
            ToolKind::SemesterEndExam,
            100.0,
            &[],
        )];
        let mut absent = mark("s1", "Semester End Exam", &[]);
        absent.scores.insert("CO1".to_string(), json!("AB"));
        let present = mark("s2", "Semester End Exam", &[("CO1", 62.0)]);

        let rows = course_co_attainment(
            &co_ids,
            &tools,
            &[absent, present],
            &OutcomeMap::new(),
            &AttainmentRules::default(),
        );
        // One attempt, one pass: 100% -> level 3.
        assert_eq!(rows[0].see_level, 3);
    }

    #[test]
    fn po_attainment_scales_by_mapping_strength() {
        let matrix = matrix_from(&[("CO1", &[("PO1", 3.0)]), ("CO2", &[("PO1", 1.0)])]);
        let rows = vec![
            CoAttainmentRow {
                co: "CO1".to_string(),
                cie_level: 3,
                see_level: 3,
                direct_attainment: 3.0,
                indirect_attainment: 3.0,
                score_index: 3.0,
            },
            CoAttainmentRow {
                co: "CO2".to_string(),
                cie_level: 0,
                see_level: 0,
                direct_attainment: 0.0,
                indirect_attainment: 3.0,
                score_index: 0.6,
            },
        ];

        let po = course_po_attainment(&matrix, &rows);
        assert_eq!(po.len(), 1);
        // (3*3/3 + 1*0.6/3) / 2 = 1.6
        assert!((po[0].attained - 1.6).abs() < 1e-9);
        assert!((po[0].percentage - 1.6 / 3.0 * 100.0).abs() < 1e-9);
    }
}
