//! Task model produced by the analyst stage.
//!
//! Field names on the wire follow what the analyst prompt asks the model for
//! (`storyPoints`, `recommended_pattern`), so they are renamed explicitly.

use serde::{Deserialize, Deserializer, Serialize, de};

/// Tasks estimated above this many story points are split by another analyst
/// call before execution.
pub const DEFAULT_SPLIT_THRESHOLD: u32 = 21;

/// Task priority. The analyst emits it as an integer `0..=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Medium),
            2 => Ok(Self::High),
            other => Err(format!("priority must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        match p {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub recommended_pattern: String,
}

/// A unit of work for the developer stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub number: u32,
    #[serde(default = "default_task_name")]
    pub name: String,
    #[serde(default)]
    pub dependency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, deserialize_with = "story_points")]
    pub story_points: u32,
}

fn default_task_name() -> String {
    "No name".to_string()
}

/// Models write estimates as integers, floats or numeric strings.
fn story_points<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Points {
        Int(u64),
        Float(f64),
        Text(String),
    }

    let points = match Points::deserialize(deserializer)? {
        Points::Int(n) => u32::try_from(n).ok(),
        Points::Float(f) if f.is_finite() && f >= 0.0 => Some(f.round() as u32),
        Points::Float(_) => None,
        Points::Text(s) => s.trim().parse::<u32>().ok(),
    };
    points.ok_or_else(|| de::Error::custom("storyPoints must be a non-negative number"))
}

impl Task {
    pub fn new(number: u32, name: &str, description: &str, story_points: u32) -> Self {
        Self {
            number,
            name: name.to_string(),
            dependency: String::new(),
            description: description.to_string(),
            architecture: Architecture::default(),
            priority: Priority::default(),
            story_points,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_architecture(mut self, layers: Vec<String>, pattern: &str) -> Self {
        self.architecture = Architecture {
            layers,
            recommended_pattern: pattern.to_string(),
        };
        self
    }

    /// Whether this task is too large to hand to the developer stage as-is.
    pub fn is_oversized(&self, threshold: u32) -> bool {
        self.story_points > threshold
    }

    /// Attach failure context before the task is re-submitted. Description is
    /// the only field allowed to change after creation.
    pub fn append_error_context(&mut self, errors: &str) {
        if errors.is_empty() {
            return;
        }
        if !self.description.is_empty() {
            self.description.push(' ');
        }
        self.description.push_str(errors);
    }

    pub fn layers_display(&self) -> String {
        if self.architecture.layers.is_empty() {
            "No layers".to_string()
        } else {
            self.architecture.layers.join(", ")
        }
    }

    pub fn pattern_display(&self) -> &str {
        if self.architecture.recommended_pattern.is_empty() {
            "No recommended pattern"
        } else {
            &self.architecture.recommended_pattern
        }
    }
}

/// Ordered tasks; insertion order is execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSet {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskSet {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Append split children at the end, keeping every existing task in place.
    pub fn append(&mut self, children: Vec<Task>) {
        self.tasks.extend(children);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }
}

impl IntoIterator for TaskSet {
    type Item = Task;
    type IntoIter = std::vec::IntoIter<Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parses_analyst_json() {
        let json = r#"{
            "tasks": [{
                "number": 1,
                "name": "Add jump",
                "dependency": "",
                "description": "Player can jump",
                "architecture": {"layers": ["Gameplay"], "recommended_pattern": "Component"},
                "priority": 2,
                "storyPoints": 5
            }]
        }"#;
        let set: TaskSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.len(), 1);
        let task = &set.tasks[0];
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.story_points, 5);
        assert_eq!(task.architecture.recommended_pattern, "Component");
    }

    #[test]
    fn test_priority_rejects_out_of_range() {
        let json = r#"{"name": "x", "priority": 3}"#;
        assert!(serde_json::from_str::<Task>(json).is_err());
    }

    #[test]
    fn test_task_serializes_wire_names() {
        let task = Task::new(1, "n", "d", 8).with_priority(Priority::Medium);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["storyPoints"], 8);
        assert_eq!(value["priority"], 1);
        assert!(value["architecture"].get("recommended_pattern").is_some());
    }

    #[test]
    fn test_append_error_context_only_touches_description() {
        let mut task = Task::new(3, "Fix spawn", "Spawner crashes", 3);
        task.append_error_context("NullReferenceException at Spawn()");
        assert_eq!(
            task.description,
            "Spawner crashes NullReferenceException at Spawn()"
        );
        assert_eq!(task.story_points, 3);
        task.append_error_context("");
        assert!(task.description.ends_with("Spawn()"));
    }

    #[test]
    fn test_oversized_uses_strict_threshold() {
        assert!(!Task::new(1, "a", "", 21).is_oversized(DEFAULT_SPLIT_THRESHOLD));
        assert!(Task::new(2, "b", "", 34).is_oversized(DEFAULT_SPLIT_THRESHOLD));
        assert!(!Task::new(3, "c", "", 2).is_oversized(DEFAULT_SPLIT_THRESHOLD));
    }

    #[test]
    fn test_loose_task_fields() {
        let task: Task = serde_json::from_str(r#"{"storyPoints": "5"}"#).unwrap();
        assert_eq!(task.name, "No name");
        assert_eq!(task.story_points, 5);
        let task: Task = serde_json::from_str(r#"{"name": "x", "storyPoints": 7.6}"#).unwrap();
        assert_eq!(task.story_points, 8);
        assert!(serde_json::from_str::<Task>(r#"{"name": "x", "storyPoints": -3}"#).is_err());
        assert!(serde_json::from_str::<Task>(r#"{"name": "x", "storyPoints": "lots"}"#).is_err());
    }

    #[test]
    fn test_append_preserves_existing_order() {
        let mut set = TaskSet::new(vec![Task::new(1, "a", "", 1), Task::new(2, "b", "", 34)]);
        set.append(vec![Task::new(3, "b.1", "", 8), Task::new(4, "b.2", "", 8)]);
        let names: Vec<_> = set.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "b.1", "b.2"]);
    }

    #[test]
    fn test_display_fallbacks() {
        let task = Task::new(1, "n", "d", 1);
        assert_eq!(task.layers_display(), "No layers");
        assert_eq!(task.pattern_display(), "No recommended pattern");
        let task = task.with_architecture(vec!["UI".into(), "Data".into()], "MVC");
        assert_eq!(task.layers_display(), "UI, Data");
        assert_eq!(task.pattern_display(), "MVC");
    }
}
