//! Layer 2: whole-plan validation before any step runs.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use agent_runtime_core::config::PlanLimits;
use agent_runtime_core::traits::ToolRegistry;
use agent_runtime_core::types::{codes, AgentPlan, ToolCategory, ValidationResult};

/// Estimated wall time and cost of one step in a category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEstimate {
    pub duration_ms: u64,
    pub cost_usd: f64,
}

const DEFAULT_ESTIMATE: StepEstimate = StepEstimate {
    duration_ms: 2_000,
    cost_usd: 0.01,
};

pub fn estimate_for(category: Option<ToolCategory>) -> StepEstimate {
    let (duration_ms, cost_usd) = match category {
        Some(ToolCategory::Shell) => (5_000, 0.01),
        Some(ToolCategory::File) => (1_000, 0.001),
        Some(ToolCategory::Browser) => (10_000, 0.05),
        Some(ToolCategory::Search) => (3_000, 0.02),
        Some(ToolCategory::Webdev) => (30_000, 0.10),
        _ => return DEFAULT_ESTIMATE,
    };
    StepEstimate { duration_ms, cost_usd }
}

/// Tool-name runs that should not appear back to back.
const DANGEROUS_SEQUENCES: &[&[&str]] = &[
    &["file.delete", "file.delete", "file.delete"],
    &["shell.exec", "shell.exec", "shell.exec", "shell.exec", "shell.exec"],
    &["browser.navigate", "browser.click", "browser.type"],
];

/// Layer 2 validator.
#[derive(Clone, Default)]
pub struct PlanValidator {
    limits: PlanLimits,
    registry: Option<Arc<dyn ToolRegistry>>,
}

impl PlanValidator {
    pub fn new(limits: PlanLimits) -> Self {
        Self { limits, registry: None }
    }

    /// Also check that every step names a registered tool.
    pub fn with_registry(mut self, registry: Arc<dyn ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn validate(&self, plan: &AgentPlan) -> ValidationResult {
        let started = Instant::now();
        let mut out = ValidationResult::new();

        if plan.steps.is_empty() {
            out.error(codes::EMPTY_PLAN, "plan has no steps", None);
            return out.finish(started);
        }

        self.check_step_count(plan, &mut out);
        check_dependencies(plan, &mut out);
        self.check_duplicates(plan, &mut out);
        self.check_budget(plan, &mut out);
        check_sequences(plan, &mut out);
        self.check_tools(plan, &mut out);
        check_permissions(plan, &mut out);

        out.finish(started)
    }

    fn check_step_count(&self, plan: &AgentPlan, out: &mut ValidationResult) {
        let count = plan.steps.len();
        let max = self.limits.max_steps;
        if count > max {
            out.error(
                codes::TOO_MANY_STEPS,
                format!("plan has {} steps, limit {}", count, max),
                Some("steps"),
            );
        } else if count * 10 >= max * 8 {
            out.warn(
                codes::STEP_COUNT_NEAR_LIMIT,
                format!("plan has {} of {} allowed steps", count, max),
                Some("steps"),
            );
        }
    }

    fn check_duplicates(&self, plan: &AgentPlan, out: &mut ValidationResult) {
        let mut seen: HashMap<String, (usize, &str)> = HashMap::new();
        for step in &plan.steps {
            let fingerprint = format!("{}:{}", step.tool_name, step.params);
            let digest = format!("{:x}", Sha256::digest(fingerprint.as_bytes()));
            seen.entry(digest).or_insert((0, step.tool_name.as_str())).0 += 1;
        }
        let mut repeated: Vec<_> = seen
            .into_values()
            .filter(|(n, _)| *n > self.limits.duplicate_step_threshold)
            .collect();
        repeated.sort();
        for (n, tool) in repeated {
            out.warn(
                codes::DUPLICATE_STEPS,
                format!("identical `{}` step repeated {} times; possible loop", tool, n),
                Some("steps"),
            );
        }
    }

    fn check_budget(&self, plan: &AgentPlan, out: &mut ValidationResult) {
        let (duration_ms, cost_usd) = plan.steps.iter().fold((0u64, 0f64), |(d, c), step| {
            let est = estimate_for(ToolCategory::from_tool_name(&step.tool_name));
            (d + est.duration_ms, c + est.cost_usd)
        });
        // Compare at micro-dollar precision; ten $0.10 steps are $1.00.
        let cost_usd = (cost_usd * 1e6).round() / 1e6;

        let max_ms = self.limits.max_duration_ms;
        if duration_ms > max_ms {
            out.error(
                codes::DURATION_EXCEEDED,
                format!("estimated {} ms, limit {} ms", duration_ms, max_ms),
                None,
            );
        } else if duration_ms * 10 >= max_ms * 8 {
            out.warn(
                codes::DURATION_NEAR_LIMIT,
                format!("estimated {} ms of {} ms", duration_ms, max_ms),
                None,
            );
        }

        let max_cost = self.limits.max_cost_usd;
        if cost_usd > max_cost {
            out.error(
                codes::COST_EXCEEDED,
                format!("estimated ${:.3}, limit ${:.2}", cost_usd, max_cost),
                None,
            );
        } else if cost_usd >= max_cost * 0.8 {
            out.warn(
                codes::COST_NEAR_LIMIT,
                format!("estimated ${:.3} of ${:.2}", cost_usd, max_cost),
                None,
            );
        }
    }

    fn check_tools(&self, plan: &AgentPlan, out: &mut ValidationResult) {
        let Some(ref registry) = self.registry else {
            return;
        };
        for step in &plan.steps {
            if !registry.contains(&step.tool_name) {
                out.error(
                    codes::TOOL_NOT_FOUND,
                    format!("step {} uses unknown tool `{}`", step.id, step.tool_name),
                    Some(&step.id),
                );
            }
        }
    }
}

fn check_dependencies(plan: &AgentPlan, out: &mut ValidationResult) {
    let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();

    for step in &plan.steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                out.critical(
                    codes::SELF_DEPENDENCY,
                    format!("step {} depends on itself", step.id),
                    Some(&step.id),
                );
            } else if !ids.contains(dep.as_str()) {
                out.error(
                    codes::UNKNOWN_DEPENDENCY,
                    format!("step {} depends on unknown step {}", step.id, dep),
                    Some(&step.id),
                );
            }
        }
    }

    for cycle in find_cycles(plan) {
        out.critical(
            codes::CIRCULAR_DEPENDENCY,
            format!("circular dependency: {}", cycle.join(" -> ")),
            cycle.first().map(String::as_str),
        );
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Cycles in the `depends_on` graph, found by an iterative DFS that keeps the
/// recursion stack explicit. Self edges are reported separately and skipped.
fn find_cycles(plan: &AgentPlan) -> Vec<Vec<String>> {
    let index: HashMap<&str, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| {
            s.depends_on
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .filter(|&j| j != i)
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; plan.steps.len()];
    let mut cycles = Vec::new();

    for root in 0..plan.steps.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnStack;

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if let Some(&child) = edges[node].get(next) {
                top.1 += 1;
                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::OnStack;
                        stack.push((child, 0));
                    }
                    Mark::OnStack => {
                        let from = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[from..].iter().map(|&(n, _)| plan.steps[n].id.clone()).collect();
                        cycle.push(plan.steps[child].id.clone());
                        cycles.push(cycle);
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    cycles
}

fn check_sequences(plan: &AgentPlan, out: &mut ValidationResult) {
    let names: Vec<&str> = plan.steps.iter().map(|s| s.tool_name.as_str()).collect();
    for sequence in DANGEROUS_SEQUENCES {
        let Some(at) = names.windows(sequence.len()).position(|w| w == *sequence) else {
            continue;
        };
        let message = format!(
            "steps {}..{} form dangerous sequence {}",
            at,
            at + sequence.len() - 1,
            sequence.join(" -> ")
        );
        let field = Some(plan.steps[at].id.as_str());
        if sequence.iter().any(|t| t.contains("delete")) {
            out.error(codes::DANGEROUS_SEQUENCE, message, field);
        } else {
            out.warn(codes::DANGEROUS_SEQUENCE, message, field);
        }
    }
}

fn check_permissions(plan: &AgentPlan, out: &mut ValidationResult) {
    let mut missing: Vec<ToolCategory> = plan
        .steps
        .iter()
        .filter_map(|s| ToolCategory::from_tool_name(&s.tool_name))
        .filter(|c| !plan.required_permissions.contains(c))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    missing.sort();
    for category in missing {
        out.warn(
            codes::MISSING_PERMISSION,
            format!("plan uses `{}` tools without declaring the permission", category),
            Some("required_permissions"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::mocks::MockToolRegistry;
    use agent_runtime_core::types::{PlanStep, ToolDefinition};
    use serde_json::json;

    fn step(id: &str, tool: &str) -> PlanStep {
        PlanStep::new(id, tool, json!({"id": id}))
    }

    fn plan(steps: Vec<PlanStep>) -> AgentPlan {
        steps
            .into_iter()
            .fold(AgentPlan::new("p").with_permissions(ToolCategory::ALL), |p, s| p.with_step(s))
    }

    #[test]
    fn test_empty_plan() {
        let result = PlanValidator::default().validate(&AgentPlan::new("p"));
        assert!(result.has_error(codes::EMPTY_PLAN));
    }

    #[test]
    fn test_mutual_dependency_is_circular() {
        let p = plan(vec![
            step("A", "plan.update").depends_on(["B"]),
            step("B", "plan.update").depends_on(["A"]),
        ]);
        let result = PlanValidator::default().validate(&p);
        assert!(!result.valid);
        assert!(result.has_error(codes::CIRCULAR_DEPENDENCY));
        assert!(result.has_critical());
    }

    #[test]
    fn test_self_dependency() {
        let p = plan(vec![step("A", "plan.update").depends_on(["A"])]);
        let result = PlanValidator::default().validate(&p);
        assert!(result.has_error(codes::SELF_DEPENDENCY));
        assert!(!result.has_error(codes::CIRCULAR_DEPENDENCY));
    }

    #[test]
    fn test_longer_cycle_reports_members() {
        let p = plan(vec![
            step("A", "plan.update").depends_on(["B"]),
            step("B", "plan.update").depends_on(["C"]),
            step("C", "plan.update").depends_on(["A"]),
            step("D", "plan.update").depends_on(["A"]),
        ]);
        let result = PlanValidator::default().validate(&p);
        let cycles: Vec<_> = result
            .errors
            .iter()
            .filter(|e| e.code == codes::CIRCULAR_DEPENDENCY)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].message.contains("A -> B -> C -> A"));
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let p = plan(vec![
            step("A", "plan.update"),
            step("B", "plan.update").depends_on(["A"]),
            step("C", "plan.update").depends_on(["A"]),
            step("D", "plan.update").depends_on(["B", "C"]),
        ]);
        let result = PlanValidator::default().validate(&p);
        assert!(result.valid, "{}", result.summary());
    }

    #[test]
    fn test_unknown_dependency() {
        let p = plan(vec![step("A", "plan.update").depends_on(["Z"])]);
        assert!(PlanValidator::default().validate(&p).has_error(codes::UNKNOWN_DEPENDENCY));
    }

    #[test]
    fn test_step_ceiling() {
        let steps = (0..51).map(|i| step(&format!("s{i}"), "plan.update")).collect();
        let result = PlanValidator::default().validate(&plan(steps));
        assert!(!result.valid);
        assert!(result.has_error(codes::TOO_MANY_STEPS));

        let steps = (0..40).map(|i| step(&format!("s{i}"), "plan.update")).collect();
        let result = PlanValidator::default().validate(&plan(steps));
        assert!(result.valid);
        assert!(result.has_warning(codes::STEP_COUNT_NEAR_LIMIT));
    }

    #[test]
    fn test_duplicate_steps_warn() {
        let steps = (0..6)
            .map(|i| PlanStep::new(format!("s{i}"), "search.web", json!({"q": "rust"})))
            .collect();
        let result = PlanValidator::default().validate(&plan(steps));
        assert!(result.valid);
        assert!(result.has_warning(codes::DUPLICATE_STEPS));
    }

    #[test]
    fn test_budget_ceilings() {
        let steps = (0..11).map(|i| step(&format!("s{i}"), "webdev.deploy")).collect();
        let result = PlanValidator::default().validate(&plan(steps));
        assert!(result.has_error(codes::DURATION_EXCEEDED));
        assert!(result.has_error(codes::COST_EXCEEDED));
    }

    fn webdev_steps(n: usize) -> AgentPlan {
        plan((0..n).map(|i| step(&format!("s{i}"), "webdev.init")).collect())
    }

    #[test]
    fn test_duration_near_limit_and_boundary() {
        let within = |max_duration_ms| {
            PlanValidator::new(PlanLimits {
                max_duration_ms,
                ..PlanLimits::default()
            })
        };
        // Two shell steps: 10 000 ms.
        let p = plan(vec![step("a", "shell.exec"), step("b", "shell.exec")]);

        let near = within(12_000).validate(&p);
        assert!(near.valid);
        assert!(near.has_warning(codes::DURATION_NEAR_LIMIT));
        assert!(!near.has_warning(codes::COST_NEAR_LIMIT));

        let at_limit = within(10_000).validate(&p);
        assert!(at_limit.valid);
        assert!(!at_limit.has_error(codes::DURATION_EXCEEDED));
        assert!(at_limit.has_warning(codes::DURATION_NEAR_LIMIT));

        let under = within(13_000).validate(&p);
        assert!(!under.has_warning(codes::DURATION_NEAR_LIMIT));

        assert!(within(9_999).validate(&p).has_error(codes::DURATION_EXCEEDED));
    }

    #[test]
    fn test_cost_near_limit_and_boundary() {
        let validator = PlanValidator::new(PlanLimits {
            max_duration_ms: 10 * 60 * 60 * 1000,
            ..PlanLimits::default()
        });

        let near = validator.validate(&webdev_steps(9));
        assert!(near.valid);
        assert!(near.has_warning(codes::COST_NEAR_LIMIT));
        assert!(!near.has_warning(codes::DURATION_NEAR_LIMIT));

        let at_limit = validator.validate(&webdev_steps(10));
        assert!(at_limit.valid);
        assert!(!at_limit.has_error(codes::COST_EXCEEDED));
        assert!(at_limit.has_warning(codes::COST_NEAR_LIMIT));

        assert!(!validator.validate(&webdev_steps(7)).has_warning(codes::COST_NEAR_LIMIT));
        assert!(validator.validate(&webdev_steps(11)).has_error(codes::COST_EXCEEDED));
    }

    #[test]
    fn test_default_budget_warns_before_refusing() {
        // Nine webdev steps: 270 000 ms and $0.90.
        let result = PlanValidator::default().validate(&webdev_steps(9));
        assert!(result.valid);
        assert!(result.has_warning(codes::DURATION_NEAR_LIMIT));
        assert!(result.has_warning(codes::COST_NEAR_LIMIT));
    }

    #[test]
    fn test_dangerous_sequences() {
        let deletes = plan(vec![
            step("a", "file.delete"),
            step("b", "file.delete"),
            step("c", "file.delete"),
        ]);
        assert!(PlanValidator::default().validate(&deletes).has_error(codes::DANGEROUS_SEQUENCE));

        let browse = plan(vec![
            step("a", "browser.navigate"),
            step("b", "browser.click"),
            step("c", "browser.type"),
        ]);
        let result = PlanValidator::default().validate(&browse);
        assert!(result.valid);
        assert!(result.has_warning(codes::DANGEROUS_SEQUENCE));
    }

    #[test]
    fn test_tool_existence_and_permissions() {
        let registry = Arc::new(MockToolRegistry::with_definitions(vec![ToolDefinition::new(
            "search.web",
            ToolCategory::Search,
        )]));
        let validator = PlanValidator::default().with_registry(registry);
        let p = AgentPlan::new("p")
            .with_step(step("a", "search.web"))
            .with_step(step("b", "shell.exec"));
        let result = validator.validate(&p);
        assert!(result.has_error(codes::TOOL_NOT_FOUND));
        assert!(result.has_warning(codes::MISSING_PERMISSION));
    }
}
