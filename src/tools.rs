use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const SUB_TYPES: &[&str] = &["1", "2", "3", "Other"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    #[serde(rename = "Internal Assessment")]
    InternalAssessment,
    #[serde(rename = "Assignment")]
    Assignment,
    #[serde(rename = "Semester End Exam")]
    SemesterEndExam,
    #[serde(rename = "Activity")]
    Activity,
    #[serde(rename = "Improvement Test")]
    ImprovementTest,
}

impl Default for ToolKind {
    fn default() -> Self {
        ToolKind::InternalAssessment
    }
}

impl ToolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::InternalAssessment => "Internal Assessment",
            ToolKind::Assignment => "Assignment",
            ToolKind::SemesterEndExam => "Semester End Exam",
            ToolKind::Activity => "Activity",
            ToolKind::ImprovementTest => "Improvement Test",
        }
    }

    /// Mark-bearing kinds must distribute their conducted marks across COs.
    pub fn requires_distribution(self) -> bool {
        matches!(self, ToolKind::InternalAssessment | ToolKind::Assignment)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentTool {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ToolKind,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub custom_name: String,
    #[serde(default)]
    pub linked_assessment: String,
    #[serde(default)]
    pub max_marks: f64,
    #[serde(default)]
    pub weightage: f64,
    #[serde(default)]
    pub co_distribution: BTreeMap<String, f64>,
}

impl AssessmentTool {
    /// Canonical display name from the tagged parts. The name column is
    /// never edited directly; it is always reconstructed through this rule
    /// table.
    pub fn derived_name(&self) -> String {
        match self.kind {
            ToolKind::SemesterEndExam => "Semester End Exam".to_string(),
            ToolKind::ImprovementTest => {
                if self.linked_assessment.is_empty() {
                    "Improvement Test".to_string()
                } else {
                    format!("Improvement Test ({})", self.linked_assessment)
                }
            }
            ToolKind::Activity => {
                if self.custom_name.is_empty() {
                    "Activity".to_string()
                } else {
                    format!("Activity - {}", self.custom_name)
                }
            }
            ToolKind::InternalAssessment | ToolKind::Assignment => {
                if self.sub_type == "Other" {
                    self.custom_name.clone()
                } else {
                    format!("{} {}", self.kind.as_str(), self.sub_type)
                }
            }
        }
    }

    /// Rebuilds the tagged parts from a stored display name. Inverse of
    /// [`derived_name`] for every name that rule table can produce.
    pub fn parse_parts(name: &str) -> (ToolKind, String, String, String) {
        if name == "Semester End Exam" {
            return (ToolKind::SemesterEndExam, String::new(), String::new(), String::new());
        }
        if let Some(rest) = name.strip_prefix("Improvement Test") {
            let linked = rest
                .trim()
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .unwrap_or("")
                .to_string();
            return (ToolKind::ImprovementTest, String::new(), String::new(), linked);
        }
        if name.starts_with("Activity") {
            let custom = name
                .strip_prefix("Activity - ")
                .unwrap_or("")
                .to_string();
            return (ToolKind::Activity, String::new(), custom, String::new());
        }
        for kind in [ToolKind::InternalAssessment, ToolKind::Assignment] {
            if let Some(rest) = name.strip_prefix(kind.as_str()) {
                let rest = rest.trim();
                if SUB_TYPES.contains(&rest) && rest != "Other" {
                    return (kind, rest.to_string(), String::new(), String::new());
                }
                return (kind, "Other".to_string(), name.to_string(), String::new());
            }
        }
        (
            ToolKind::InternalAssessment,
            "Other".to_string(),
            name.to_string(),
            String::new(),
        )
    }

    /// Resyncs the tagged parts with the stored name. Used when loading
    /// records that only carry the display name.
    pub fn normalize(&mut self) {
        if self.name.is_empty() {
            self.name = self.derived_name();
            return;
        }
        let (kind, sub_type, custom_name, linked) = Self::parse_parts(&self.name);
        self.kind = kind;
        self.sub_type = sub_type;
        self.custom_name = custom_name;
        self.linked_assessment = linked;
    }

    pub fn allocated_marks(&self) -> f64 {
        self.co_distribution.values().sum()
    }
}

/// Pre-save validation of a course's tool set. Every problem is reported at
/// once so the caller can list them per tool.
pub fn validate_tools(tools: &[AssessmentTool]) -> Vec<String> {
    let mut problems = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for tool in tools {
        if tool.name.is_empty() || tool.name == "Activity" {
            problems.push("an assessment tool is missing a valid name".to_string());
        } else if !seen.insert(tool.name.as_str()) {
            problems.push(format!("duplicate assessment name: {}", tool.name));
        }

        if tool.kind.requires_distribution() {
            let allocated = tool.allocated_marks();
            if (allocated - tool.max_marks).abs() > 1e-9 {
                problems.push(format!(
                    "{}: allocated {} marks, but max marks is {}",
                    tool.name, allocated, tool.max_marks
                ));
            }
        }
    }

    problems
}
